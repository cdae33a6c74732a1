//! Screen fingerprinting and recognition.

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::driver::UiElement;
use crate::locator::{Finder, Locator};
use crate::Result;

/// How often `wait_for` re-recognizes while waiting for a screen.
const RECHECK_INTERVAL: Duration = Duration::from_millis(500);

/// The logical screens this engine can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenKind {
    /// The scrollable item feed.
    Feed,
    /// An item detail view.
    Detail,
    /// The city-services variant of the home screen.
    Services,
}

impl fmt::Display for ScreenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScreenKind::Feed => "feed",
            ScreenKind::Detail => "detail",
            ScreenKind::Services => "services",
        };
        f.write_str(s)
    }
}

/// A named, ordered set of locators that fingerprints one logical screen.
///
/// Identifiers are ordered most-discriminating-first: the first one doubles
/// as the cheap re-validation probe, and a screen is confirmed only when all
/// of them resolve to a visible element.
#[derive(Debug, Clone)]
pub struct ScreenDescriptor {
    pub kind: ScreenKind,
    pub identifiers: Vec<Locator>,
}

impl ScreenDescriptor {
    pub fn new(kind: ScreenKind, identifiers: Vec<Locator>) -> Self {
        Self { kind, identifiers }
    }
}

/// Ordered registry of screen descriptors. Registration order is priority
/// order when more than one descriptor could match.
#[derive(Debug, Clone, Default)]
pub struct ScreenRegistry {
    descriptors: Vec<ScreenDescriptor>,
}

impl ScreenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Re-registering a kind replaces it in place,
    /// keeping its original priority slot.
    pub fn register(&mut self, descriptor: ScreenDescriptor) {
        debug!("registering screen: {}", descriptor.kind);
        if let Some(slot) = self
            .descriptors
            .iter_mut()
            .find(|d| d.kind == descriptor.kind)
        {
            *slot = descriptor;
        } else {
            self.descriptors.push(descriptor);
        }
    }

    pub fn get(&self, kind: ScreenKind) -> Option<&ScreenDescriptor> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScreenDescriptor> {
        self.descriptors.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// A freshly recognized screen. Transient: valid only for the current
/// control-loop iteration, never cached or shared.
pub struct RecognizedScreen {
    pub kind: ScreenKind,
    /// The element the first identifier resolved to.
    pub anchor: Box<dyn UiElement>,
}

impl fmt::Debug for RecognizedScreen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizedScreen")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Timeouts for recognition probes.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Per-identifier presence check during a full scan.
    pub identifier_timeout: Duration,
    /// Cheap re-validation of the cached screen's first identifier.
    pub revalidate_timeout: Duration,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            identifier_timeout: Duration::from_secs(1),
            revalidate_timeout: Duration::from_secs(1),
        }
    }
}

/// Determines which registered screen the app is currently showing.
///
/// Caches the last recognized kind and re-validates it cheaply before
/// falling back to a full registry scan. Every probe carries an explicit
/// timeout, so one `recognize` call is bounded by
/// descriptors x identifiers x identifier_timeout.
pub struct Recognizer {
    finder: Finder,
    registry: ScreenRegistry,
    config: RecognizerConfig,
    current: Option<ScreenKind>,
}

impl Recognizer {
    pub fn new(finder: Finder, registry: ScreenRegistry) -> Self {
        Self::with_config(finder, registry, RecognizerConfig::default())
    }

    pub fn with_config(finder: Finder, registry: ScreenRegistry, config: RecognizerConfig) -> Self {
        Self {
            finder,
            registry,
            config,
            current: None,
        }
    }

    /// Last recognized screen kind, if any.
    pub fn current(&self) -> Option<ScreenKind> {
        self.current
    }

    /// Determine the current screen, or `None` if no descriptor matches.
    pub async fn recognize(&mut self) -> Result<Option<RecognizedScreen>> {
        // Fast path: the previously recognized screen usually still holds.
        if let Some(kind) = self.current {
            if let Some(descriptor) = self.registry.get(kind) {
                if let Some(first) = descriptor.identifiers.first() {
                    if let Some(anchor) = self
                        .finder
                        .wait_for(first, self.config.revalidate_timeout)
                        .await?
                    {
                        return Ok(Some(RecognizedScreen { kind, anchor }));
                    }
                }
            }
        }

        debug!("cached screen invalid, scanning registry");
        let descriptors: Vec<ScreenDescriptor> = self.registry.iter().cloned().collect();
        for descriptor in &descriptors {
            let Some(first) = descriptor.identifiers.first() else {
                continue;
            };
            let Some(anchor) = self
                .finder
                .wait_for(first, self.config.identifier_timeout)
                .await?
            else {
                continue;
            };
            if self.confirm_rest(descriptor).await? {
                if self.current != Some(descriptor.kind) {
                    info!("screen changed: {}", descriptor.kind);
                }
                self.current = Some(descriptor.kind);
                return Ok(Some(RecognizedScreen {
                    kind: descriptor.kind,
                    anchor,
                }));
            }
        }

        self.current = None;
        debug!("no registered screen matches");
        Ok(None)
    }

    /// Wait up to `timeout` for a specific screen to be recognized.
    pub async fn wait_for(&mut self, kind: ScreenKind, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(screen) = self.recognize().await? {
                if screen.kind == kind {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(RECHECK_INTERVAL).await;
        }
    }

    /// All identifiers after the first must also be present.
    async fn confirm_rest(&self, descriptor: &ScreenDescriptor) -> Result<bool> {
        for locator in descriptor.identifiers.iter().skip(1) {
            if !self
                .finder
                .is_present(locator, self.config.identifier_timeout)
                .await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_preserves_insertion_order() {
        let mut reg = ScreenRegistry::new();
        reg.register(ScreenDescriptor::new(
            ScreenKind::Feed,
            vec![Locator::id("a")],
        ));
        reg.register(ScreenDescriptor::new(
            ScreenKind::Detail,
            vec![Locator::id("b")],
        ));
        let kinds: Vec<_> = reg.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![ScreenKind::Feed, ScreenKind::Detail]);
    }

    #[test]
    fn reregistering_keeps_priority_slot() {
        let mut reg = ScreenRegistry::new();
        reg.register(ScreenDescriptor::new(
            ScreenKind::Feed,
            vec![Locator::id("a")],
        ));
        reg.register(ScreenDescriptor::new(
            ScreenKind::Detail,
            vec![Locator::id("b")],
        ));
        reg.register(ScreenDescriptor::new(
            ScreenKind::Feed,
            vec![Locator::id("a2")],
        ));
        let kinds: Vec<_> = reg.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![ScreenKind::Feed, ScreenKind::Detail]);
        assert_eq!(reg.get(ScreenKind::Feed).unwrap().identifiers[0].value, "a2");
    }

    #[test]
    fn screen_kind_display() {
        assert_eq!(ScreenKind::Feed.to_string(), "feed");
        assert_eq!(ScreenKind::Detail.to_string(), "detail");
        assert_eq!(ScreenKind::Services.to_string(), "services");
    }
}
