//! Declarative element locators and timeout-bounded resolution.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::driver::{UiDriver, UiElement};
use crate::{Error, Result};

/// How often `wait_for` re-polls the driver while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Wildcard query behind the description-pattern family: list every element
/// that carries a content description, then filter client-side.
const DESC_WILDCARD_XPATH: &str = "//*[@content-desc]";

/// Locator strategy. `Id`, `ClassName` and `XPath` are resolved natively by
/// the driver; `DescriptionPattern` is a derived family resolved client-side
/// because the driver's query language cannot express regex attribute
/// matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Strategy {
    Id,
    ClassName,
    XPath,
    DescriptionPattern,
}

impl Strategy {
    /// WebDriver `using` string for native strategies.
    pub fn as_webdriver(&self) -> Option<&'static str> {
        match self {
            Strategy::Id => Some("id"),
            Strategy::ClassName => Some("class name"),
            Strategy::XPath => Some("xpath"),
            Strategy::DescriptionPattern => None,
        }
    }
}

/// A declarative query identifying zero or more UI elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub strategy: Strategy,
    pub value: String,
}

impl Locator {
    pub fn id(value: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::Id,
            value: value.into(),
        }
    }

    pub fn class_name(value: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::ClassName,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::XPath,
            value: value.into(),
        }
    }

    /// Regex over the element's content description, anchored at the start.
    pub fn description_pattern(value: impl Into<String>) -> Self {
        Self {
            strategy: Strategy::DescriptionPattern,
            value: value.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.strategy {
            Strategy::Id => "id",
            Strategy::ClassName => "class",
            Strategy::XPath => "xpath",
            Strategy::DescriptionPattern => "desc~",
        };
        write!(f, "{}:{}", s, self.value)
    }
}

/// Resolves locators against the live UI tree with bounded waits.
///
/// A timeout elapsing without the element appearing is a normal outcome
/// (`Ok(None)` / `Ok(false)`), never an error. Unexpected driver failures
/// propagate.
#[derive(Clone)]
pub struct Finder {
    driver: Arc<dyn UiDriver>,
    /// Where diagnostic screenshots land on fatal wait failures.
    artifact_dir: PathBuf,
}

impl Finder {
    pub fn new(driver: Arc<dyn UiDriver>) -> Self {
        Self {
            driver,
            artifact_dir: PathBuf::from("."),
        }
    }

    /// Override the directory for diagnostic screenshots.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    pub fn driver(&self) -> &Arc<dyn UiDriver> {
        &self.driver
    }

    /// Wait up to `timeout` for the locator to resolve to an element.
    pub async fn wait_for(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Option<Box<dyn UiElement>>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_now(locator).await {
                Ok(Some(el)) => return Ok(Some(el)),
                Ok(None) => {}
                Err(Error::Driver(e)) if e.is_transient() => {
                    debug!("transient failure resolving {}: {}", locator, e);
                }
                Err(e) => {
                    self.capture_diagnostic(locator).await;
                    return Err(e);
                }
            }
            if Instant::now() >= deadline {
                debug!("element not found within {:?}: {}", timeout, locator);
                return Ok(None);
            }
            sleep(POLL_INTERVAL.min(timeout)).await;
        }
    }

    /// Whether the locator resolves to a visible element within `timeout`.
    pub async fn is_present(&self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let Some(el) = self.wait_for(locator, timeout).await? else {
            return Ok(false);
        };
        match el.is_displayed().await {
            Ok(displayed) => Ok(displayed),
            Err(e) if e.is_transient() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve and click. Returns false if the element never appeared.
    pub async fn click(&self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let Some(el) = self.wait_for(locator, timeout).await? else {
            return Ok(false);
        };
        match el.click().await {
            Ok(()) => Ok(true),
            Err(e) if e.is_transient() => {
                warn!("click on {} hit a stale element", locator);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Single resolution pass, no waiting.
    async fn find_now(&self, locator: &Locator) -> Result<Option<Box<dyn UiElement>>> {
        match locator.strategy {
            Strategy::DescriptionPattern => self.find_by_description(&locator.value).await,
            _ => {
                let el = self.driver.find_one(locator).await?;
                Ok(el)
            }
        }
    }

    /// Description-pattern family: list elements carrying a content
    /// description, filter by regex (anchored at the start) and visibility.
    async fn find_by_description(&self, pattern: &str) -> Result<Option<Box<dyn UiElement>>> {
        let re = Regex::new(pattern)?;
        let candidates = self
            .driver
            .find_many(&Locator::xpath(DESC_WILDCARD_XPATH))
            .await?;
        for el in candidates {
            let desc = match el.attribute("content-desc").await {
                Ok(d) => d,
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e.into()),
            };
            let Some(desc) = desc else { continue };
            if !matches_at_start(&re, &desc) {
                continue;
            }
            match el.is_displayed().await {
                Ok(true) => return Ok(Some(el)),
                Ok(false) => continue,
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Best-effort screen capture when a wait fails fatally. Capture failure
    /// must not mask the original error, so everything here is swallowed.
    async fn capture_diagnostic(&self, locator: &Locator) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = self.artifact_dir.join(format!("error_screenshot_{}.png", ts));
        match self.driver.screenshot(&path).await {
            Ok(()) => warn!("saved diagnostic screenshot: {}", path.display()),
            Err(e) => warn!("diagnostic screenshot failed for {}: {}", locator, e),
        }
    }
}

/// Regex match anchored at the start of the haystack.
fn matches_at_start(re: &Regex, haystack: &str) -> bool {
    re.find(haystack).is_some_and(|m| m.start() == 0)
}
