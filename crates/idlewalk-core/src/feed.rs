//! Feed scanning and per-viewport deduplication.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::driver::{UiDriver, UiElement};
use crate::locator::Locator;
use crate::Result;

/// Pause between retry attempts on a stale failure.
const RETRY_DELAY: Duration = Duration::from_millis(300);

/// Locators for the scrollable feed and its item structure.
#[derive(Debug, Clone)]
pub struct FeedSelectors {
    /// The scrollable item container.
    pub container: Locator,
    /// Item frames inside the container.
    pub item: Locator,
    /// Text-bearing descendants of an item frame.
    pub title: Locator,
}

/// Lists currently visible feed items and reads their titles, retrying a
/// bounded number of times on stale-element races. Virtualized lists recycle
/// nodes between query and use; that race is expected, so exhausting retries
/// yields "nothing found" rather than an error.
pub struct FeedScanner {
    driver: Arc<dyn UiDriver>,
    selectors: FeedSelectors,
}

impl FeedScanner {
    pub fn new(driver: Arc<dyn UiDriver>, selectors: FeedSelectors) -> Self {
        Self { driver, selectors }
    }

    /// Resolve the scrollable item container, `None` if absent or never
    /// visible within the retry budget.
    pub async fn container(&self, retries: u32) -> Result<Option<Box<dyn UiElement>>> {
        for attempt in 1..=retries.max(1) {
            match self.try_container().await {
                Ok(Some(el)) => return Ok(Some(el)),
                Ok(None) => return Ok(None),
                Err(e) if e.is_transient() => {
                    debug!("container lookup stale (attempt {}/{})", attempt, retries);
                }
                Err(e) => return Err(e.into()),
            }
            sleep(RETRY_DELAY).await;
        }
        warn!("feed container not available after {} attempts", retries);
        Ok(None)
    }

    async fn try_container(&self) -> crate::driver::DriverResult<Option<Box<dyn UiElement>>> {
        let Some(el) = self.driver.find_one(&self.selectors.container).await? else {
            return Ok(None);
        };
        if el.is_displayed().await? {
            Ok(Some(el))
        } else {
            Ok(None)
        }
    }

    /// List the currently visible item elements inside `container`.
    /// Off-screen recycled nodes are excluded.
    pub async fn items(
        &self,
        container: &dyn UiElement,
        retries: u32,
    ) -> Result<Vec<Box<dyn UiElement>>> {
        for attempt in 1..=retries.max(1) {
            match self.try_items(container).await {
                Ok(items) => {
                    debug!("found {} visible items", items.len());
                    return Ok(items);
                }
                Err(e) if e.is_transient() => {
                    debug!("item listing stale (attempt {}/{})", attempt, retries);
                }
                Err(e) => return Err(e.into()),
            }
            sleep(RETRY_DELAY).await;
        }
        warn!("item listing failed after {} attempts", retries);
        Ok(Vec::new())
    }

    async fn try_items(
        &self,
        container: &dyn UiElement,
    ) -> crate::driver::DriverResult<Vec<Box<dyn UiElement>>> {
        let candidates = container.children(&self.selectors.item).await?;
        let mut visible = Vec::with_capacity(candidates.len());
        for el in candidates {
            if el.is_displayed().await? {
                visible.push(el);
            }
        }
        Ok(visible)
    }

    /// First non-empty, visible title text inside an item. Items mid-
    /// transition legitimately render without readable text; that yields
    /// `None`, logged but not an error.
    pub async fn title(&self, item: &dyn UiElement, retries: u32) -> Result<Option<String>> {
        for attempt in 1..=retries.max(1) {
            match self.try_title(item).await {
                Ok(Some(title)) => return Ok(Some(title)),
                Ok(None) => {
                    debug!("item has no readable title");
                    return Ok(None);
                }
                Err(e) if e.is_transient() => {
                    debug!("title read stale (attempt {}/{})", attempt, retries);
                }
                Err(e) => return Err(e.into()),
            }
            sleep(RETRY_DELAY).await;
        }
        Ok(None)
    }

    async fn try_title(
        &self,
        item: &dyn UiElement,
    ) -> crate::driver::DriverResult<Option<String>> {
        let texts = item.children(&self.selectors.title).await?;
        for el in texts {
            if !el.is_displayed().await? {
                continue;
            }
            let text = el.text().await?;
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
        Ok(None)
    }
}

/// Per-viewport set of item fingerprints (on-screen bounds strings).
///
/// Fingerprints are valid only until the next scroll: the browse loop calls
/// `reset` exactly once per scroll step. Known risk carried over from the
/// original: if list virtualization reuses identical geometry for different
/// items across a scroll, a too-early reset can double-process or a missed
/// reset can skip items.
#[derive(Debug, Default)]
pub struct DedupTracker {
    seen: HashSet<String>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this fingerprint was already processed in this viewport.
    pub fn seen(&self, fingerprint: &str) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Record a processed fingerprint. Idempotent.
    pub fn mark(&mut self, fingerprint: impl Into<String>) {
        self.seen.insert(fingerprint.into());
    }

    /// Forget everything; called once per scroll/pagination step.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_marks_and_resets() {
        let mut tracker = DedupTracker::new();
        assert!(!tracker.seen("[0,0][100,50]"));
        tracker.mark("[0,0][100,50]");
        assert!(tracker.seen("[0,0][100,50]"));
        tracker.reset();
        assert!(!tracker.seen("[0,0][100,50]"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn dedup_mark_is_idempotent() {
        let mut tracker = DedupTracker::new();
        tracker.mark("b");
        tracker.mark("b");
        assert_eq!(tracker.len(), 1);
    }
}
