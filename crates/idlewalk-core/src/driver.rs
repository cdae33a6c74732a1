//! Driver capability seam — the engine talks to the automation session
//! exclusively through these traits.

use async_trait::async_trait;
use std::path::Path;

use crate::locator::Locator;

/// Result type for raw driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Failures reported by the automation driver.
///
/// Element absence is NOT an error: lookups return `Ok(None)` or an empty
/// list. Only genuinely broken states surface here, and of those only
/// `StaleElement` is retryable — the rest mean the session is unusable.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The referenced UI node was recycled since the handle was obtained.
    #[error("stale element reference")]
    StaleElement,

    /// The driver cannot resolve this locator strategy natively.
    #[error("unsupported locator strategy: {0}")]
    UnsupportedStrategy(String),

    /// The driver session is gone or refused the command.
    #[error("session error: {0}")]
    Session(String),

    /// The driver answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Whether retrying the same operation can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::StaleElement)
    }
}

/// A handle to one on-screen element.
///
/// Handles are transient: the underlying node may be recycled by the app's
/// list virtualization at any time, after which operations return
/// [`DriverError::StaleElement`].
#[async_trait]
pub trait UiElement: Send + Sync {
    /// Whether the element is currently visible on screen.
    async fn is_displayed(&self) -> DriverResult<bool>;

    /// The element's visible text, empty if it has none.
    async fn text(&self) -> DriverResult<String>;

    /// Read a named attribute, `None` if unset.
    async fn attribute(&self, name: &str) -> DriverResult<Option<String>>;

    /// Tap the element.
    async fn click(&self) -> DriverResult<()>;

    /// Find descendant elements matching a native locator.
    async fn children(&self, locator: &Locator) -> DriverResult<Vec<Box<dyn UiElement>>>;
}

/// The automation driver session.
///
/// The session is a single exclusively-owned resource: the engine never
/// issues two driver calls concurrently.
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Find the first element matching a native locator, `None` if absent.
    async fn find_one(&self, locator: &Locator) -> DriverResult<Option<Box<dyn UiElement>>>;

    /// Find all elements matching a native locator.
    async fn find_many(&self, locator: &Locator) -> DriverResult<Vec<Box<dyn UiElement>>>;

    /// Current window size as (width, height) in pixels.
    async fn window_size(&self) -> DriverResult<(u32, u32)>;

    /// Perform a press-move-release touch gesture.
    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64)
        -> DriverResult<()>;

    /// Navigate back.
    async fn back(&self) -> DriverResult<()>;

    /// Save a screenshot of the current screen to `path`.
    async fn screenshot(&self, path: &Path) -> DriverResult<()>;

    /// End the session. Idempotent; errors are reported but the session is
    /// considered gone either way.
    async fn quit(&self) -> DriverResult<()>;
}
