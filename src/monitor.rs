//! Screen monitor: repeatedly recognizes the foreground screen and prints
//! transitions. Useful when building a profile for a new app.

use std::sync::Arc;
use std::time::Duration;

use idlewalk_core::{Finder, Recognizer, ScreenKind, ScreenRegistry, StopFlag, UiDriver};
use tokio::time::sleep;

use crate::Result;

pub async fn watch(
    driver: Arc<dyn UiDriver>,
    registry: ScreenRegistry,
    interval: Duration,
    stop: StopFlag,
) -> Result<()> {
    let finder = Finder::new(driver);
    let mut recognizer = Recognizer::new(finder, registry);
    let mut last: Option<Option<ScreenKind>> = None;

    println!("watching screens (ctrl-c to stop)...");
    while stop.is_running() {
        let kind = recognizer.recognize().await?.map(|s| s.kind);
        if last.as_ref() != Some(&kind) {
            match kind {
                Some(kind) => println!("screen: {}", kind),
                None => println!("screen: (unrecognized)"),
            }
            last = Some(kind);
        }
        sleep(interval).await;
    }
    Ok(())
}
