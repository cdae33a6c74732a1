//! The browse task: walk the feed, inspect items, visit matches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::driver::{UiDriver, UiElement};
use crate::feed::{DedupTracker, FeedScanner, FeedSelectors};
use crate::gesture::{ScrollBands, ScrollController, SwipeDirection};
use crate::locator::Finder;
use crate::matcher::TitlePredicate;
use crate::screen::{Recognizer, RecognizerConfig, ScreenKind, ScreenRegistry};
use crate::task::{StopFlag, Task, TaskInfo, TaskReport};
use crate::Result;

/// Tuning for the browse loop. Time ranges are (min, max) milliseconds,
/// sampled per use; tests shrink them to keep runs fast.
#[derive(Debug, Clone)]
pub struct BrowseConfig {
    /// Retry budget for stale-prone feed operations.
    pub retries: u32,
    /// Attempts to reach the feed screen before backing off a whole cycle.
    pub ensure_feed_attempts: u32,
    /// Pause before retrying the cycle when the feed stays unreachable.
    pub feed_backoff: Duration,
    /// How long to wait for the detail screen after clicking a match.
    pub detail_wait: Duration,
    /// Feed swipe duration in milliseconds.
    pub scroll_duration_ms: u64,
    /// Detail-screen swipe duration in milliseconds.
    pub detail_scroll_duration_ms: u64,
    /// Number of dwell scrolls on the detail screen, inclusive range.
    pub dwell_scrolls: (u32, u32),
    /// Pause between dwell scrolls.
    pub dwell_pause_ms: (u64, u64),
    /// Final pause on the detail screen before navigating back.
    pub final_dwell_ms: (u64, u64),
    /// Chance a dwell scroll goes back up instead of down the page.
    pub upward_drift_chance: f64,
    /// Settle time after clicking into an item.
    pub post_click_settle: Duration,
    /// Settle time after navigating back to the feed.
    pub post_back_settle: Duration,
    /// Settle time after a feed swipe.
    pub post_scroll_settle: Duration,
    /// Pause between scan cycles.
    pub scan_pause: Duration,
    /// Recognition probe timeouts.
    pub recognizer: RecognizerConfig,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            ensure_feed_attempts: 3,
            feed_backoff: Duration::from_secs(3),
            detail_wait: Duration::from_secs(5),
            scroll_duration_ms: 1000,
            detail_scroll_duration_ms: 1500,
            dwell_scrolls: (3, 5),
            dwell_pause_ms: (1000, 3000),
            final_dwell_ms: (2000, 4000),
            upward_drift_chance: 0.2,
            post_click_settle: Duration::from_secs(2),
            post_back_settle: Duration::from_secs(1),
            post_scroll_settle: Duration::from_millis(1500),
            scan_pause: Duration::from_secs(1),
            recognizer: RecognizerConfig::default(),
        }
    }
}

/// Browses the item feed, deduplicating items per viewport, matching titles
/// against the injected predicate, and visiting matches' detail screens with
/// simulated reading behavior.
pub struct BrowseTask {
    driver: Arc<dyn UiDriver>,
    registry: ScreenRegistry,
    selectors: FeedSelectors,
    predicate: TitlePredicate,
    bands: ScrollBands,
    config: BrowseConfig,
}

impl BrowseTask {
    pub const INFO: TaskInfo = TaskInfo {
        id: "browse_items",
        name: "Browse items",
        description: "Walk the feed and visit matching item detail screens",
    };

    pub fn new(
        driver: Arc<dyn UiDriver>,
        registry: ScreenRegistry,
        selectors: FeedSelectors,
        predicate: TitlePredicate,
    ) -> Self {
        Self::with_config(
            driver,
            registry,
            selectors,
            predicate,
            BrowseConfig::default(),
        )
    }

    pub fn with_config(
        driver: Arc<dyn UiDriver>,
        registry: ScreenRegistry,
        selectors: FeedSelectors,
        predicate: TitlePredicate,
        config: BrowseConfig,
    ) -> Self {
        Self {
            driver,
            registry,
            selectors,
            predicate,
            bands: ScrollBands::default(),
            config,
        }
    }

    /// Override the swipe geometry bands.
    pub fn with_bands(mut self, bands: ScrollBands) -> Self {
        self.bands = bands;
        self
    }

    /// One full run of the control loop, until stopped or a fatal driver
    /// failure.
    async fn browse(&self, stop: &StopFlag, report: &mut TaskReport) -> Result<()> {
        let finder = Finder::new(Arc::clone(&self.driver));
        let mut recognizer = Recognizer::with_config(
            finder,
            self.registry.clone(),
            self.config.recognizer.clone(),
        );
        let scanner = FeedScanner::new(Arc::clone(&self.driver), self.selectors.clone());
        let scroller = ScrollController::with_bands(Arc::clone(&self.driver), self.bands.clone());
        let mut dedup = DedupTracker::new();

        while stop.is_running() {
            if !self.ensure_feed(&mut recognizer, stop).await? {
                if !stop.is_running() {
                    break;
                }
                debug!("feed unreachable, backing off before next cycle");
                sleep(self.config.feed_backoff).await;
                continue;
            }

            let Some(container) = scanner.container(self.config.retries).await? else {
                sleep(self.config.scan_pause).await;
                continue;
            };
            let items = scanner.items(container.as_ref(), self.config.retries).await?;
            if items.is_empty() {
                // Nothing visible yet is not an error; advance the feed.
                self.advance_feed(&scroller, &mut dedup).await?;
                continue;
            }

            let mut saw_new = false;
            for item in &items {
                if !stop.is_running() {
                    return Ok(());
                }
                let inspected = self
                    .process_item(
                        item.as_ref(),
                        &scanner,
                        &scroller,
                        &mut recognizer,
                        &mut dedup,
                        stop,
                        report,
                    )
                    .await?;
                saw_new = saw_new || inspected;
            }

            if !saw_new {
                info!(
                    "viewport exhausted, advancing feed ({} items processed so far)",
                    report.total_processed
                );
                self.advance_feed(&scroller, &mut dedup).await?;
            }
            sleep(self.config.scan_pause).await;
        }
        Ok(())
    }

    /// Make sure the feed screen is showing. A detail screen gets a
    /// back-navigation; anything else gets a short wait. Gives up after the
    /// configured attempts so the caller can back off the whole cycle.
    async fn ensure_feed(&self, recognizer: &mut Recognizer, stop: &StopFlag) -> Result<bool> {
        for attempt in 1..=self.config.ensure_feed_attempts {
            if !stop.is_running() {
                return Ok(false);
            }
            match recognizer.recognize().await? {
                Some(screen) if screen.kind == ScreenKind::Feed => return Ok(true),
                Some(screen) if screen.kind == ScreenKind::Detail => {
                    debug!(
                        "on detail screen, navigating back (attempt {}/{})",
                        attempt, self.config.ensure_feed_attempts
                    );
                    self.navigate_back().await?;
                    sleep(self.config.post_back_settle).await;
                }
                Some(screen) => {
                    debug!("on {} screen, waiting for feed", screen.kind);
                    sleep(self.config.scan_pause).await;
                }
                None => {
                    debug!(
                        "screen unrecognized (attempt {}/{})",
                        attempt, self.config.ensure_feed_attempts
                    );
                    sleep(self.config.scan_pause).await;
                }
            }
        }
        warn!(
            "feed screen not reached after {} attempts",
            self.config.ensure_feed_attempts
        );
        Ok(false)
    }

    /// Inspect one item. Returns true if the item was newly processed
    /// (title read and fingerprint marked), regardless of match outcome.
    #[allow(clippy::too_many_arguments)]
    async fn process_item(
        &self,
        item: &dyn UiElement,
        scanner: &FeedScanner,
        scroller: &ScrollController,
        recognizer: &mut Recognizer,
        dedup: &mut DedupTracker,
        stop: &StopFlag,
        report: &mut TaskReport,
    ) -> Result<bool> {
        let fingerprint = match item.attribute("bounds").await {
            Ok(Some(bounds)) => bounds,
            Ok(None) => return Ok(false),
            Err(e) if e.is_transient() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if dedup.seen(&fingerprint) {
            return Ok(false);
        }
        match item.is_displayed().await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) if e.is_transient() => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        let Some(title) = scanner.title(item, self.config.retries).await? else {
            // May still be rendering; leave it unmarked for the next pass.
            return Ok(false);
        };

        // Processed once inspected, whether or not it matches.
        dedup.mark(fingerprint);
        report.total_processed += 1;
        info!("[{}] inspected: {}", report.total_processed, title);

        if !(self.predicate)(&title) {
            return Ok(true);
        }
        report.matched += 1;
        info!("=== matched [{}]: {} ===", report.matched, title);

        if !stop.is_running() {
            return Ok(true);
        }
        match item.click().await {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!("matched item went stale before click, abandoning");
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        }
        sleep(self.config.post_click_settle).await;

        if !stop.is_running() {
            return Ok(true);
        }
        if recognizer
            .wait_for(ScreenKind::Detail, self.config.detail_wait)
            .await?
        {
            self.dwell_on_detail(scroller, stop).await?;
            self.navigate_back().await?;
            sleep(self.config.post_back_settle).await;
        } else {
            // The clicked element is likely stale by now; never re-click.
            warn!("detail screen never appeared, abandoning item");
        }
        Ok(true)
    }

    /// Simulated reading: a few randomized scrolls with randomized pauses,
    /// then a final dwell.
    async fn dwell_on_detail(&self, scroller: &ScrollController, stop: &StopFlag) -> Result<()> {
        let scrolls = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.config.dwell_scrolls.0..=self.config.dwell_scrolls.1)
        };
        info!("dwelling on detail screen: {} scrolls planned", scrolls);
        for i in 0..scrolls {
            if !stop.is_running() {
                return Ok(());
            }
            let direction = {
                let mut rng = rand::thread_rng();
                if rng.gen_bool(self.config.upward_drift_chance) {
                    SwipeDirection::Down
                } else {
                    SwipeDirection::Up
                }
            };
            if !scroller
                .swipe(direction, self.config.detail_scroll_duration_ms)
                .await?
            {
                warn!("dwell scroll {}/{} failed, cutting dwell short", i + 1, scrolls);
                break;
            }
            sleep(sample_ms(self.config.dwell_pause_ms)).await;
        }
        sleep(sample_ms(self.config.final_dwell_ms)).await;
        Ok(())
    }

    /// One feed swipe plus the dedup reset that must accompany it.
    async fn advance_feed(
        &self,
        scroller: &ScrollController,
        dedup: &mut DedupTracker,
    ) -> Result<()> {
        if !scroller
            .swipe(SwipeDirection::Up, self.config.scroll_duration_ms)
            .await?
        {
            warn!("feed swipe failed, will retry next cycle");
        }
        // Exactly one reset per scroll: fingerprints are viewport-scoped.
        dedup.reset();
        sleep(self.config.post_scroll_settle).await;
        Ok(())
    }

    async fn navigate_back(&self) -> Result<()> {
        match self.driver.back().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                warn!("back navigation hiccup: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Task for BrowseTask {
    fn info(&self) -> TaskInfo {
        Self::INFO
    }

    async fn run(&self, stop: StopFlag) -> Result<TaskReport> {
        let mut report = TaskReport::default();
        let result = self.browse(&stop, &mut report).await;
        report.stopped = !stop.is_running();
        result.map(|()| report)
    }
}

fn sample_ms(range: (u64, u64)) -> Duration {
    let ms = {
        let mut rng = rand::thread_rng();
        rng.gen_range(range.0..=range.1)
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_field_constraints() {
        let cfg = BrowseConfig::default();
        assert!(cfg.retries >= 1);
        assert!(cfg.dwell_scrolls.0 <= cfg.dwell_scrolls.1);
        assert!(cfg.dwell_pause_ms.0 <= cfg.dwell_pause_ms.1);
        assert!(cfg.final_dwell_ms.0 <= cfg.final_dwell_ms.1);
        assert!((0.0..=1.0).contains(&cfg.upward_drift_chance));
    }

    #[test]
    fn info_is_static_metadata() {
        assert_eq!(BrowseTask::INFO.id, "browse_items");
        assert!(!BrowseTask::INFO.description.is_empty());
    }
}
