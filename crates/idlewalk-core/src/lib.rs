//! Core engine for driving a mobile app's UI like an idle human browser:
//! screen recognition over declarative locators, feed scanning with
//! per-viewport deduplication, randomized scroll gestures, and a task
//! lifecycle with cooperative cancellation.
//!
//! The engine is driver-agnostic: everything talks to the UI through the
//! [`driver::UiDriver`] and [`driver::UiElement`] traits, so a concrete
//! automation backend (or a scripted fake in tests) plugs in at the edge.

pub mod driver;
pub mod feed;
pub mod gesture;
pub mod locator;
pub mod matcher;
pub mod screen;
pub mod task;

use thiserror::Error as ThisError;

pub use driver::{DriverError, UiDriver, UiElement};
pub use feed::{DedupTracker, FeedScanner, FeedSelectors};
pub use gesture::{ScrollBands, ScrollController, SwipeDirection};
pub use locator::{Finder, Locator, Strategy};
pub use matcher::{KeywordMatcher, TitlePredicate};
pub use screen::{
    RecognizedScreen, Recognizer, RecognizerConfig, ScreenDescriptor, ScreenKind, ScreenRegistry,
};
pub use task::browse::{BrowseConfig, BrowseTask};
pub use task::{StopFlag, Task, TaskInfo, TaskManager, TaskReport};

/// Engine-level error.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The automation driver failed in a non-recoverable way.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// A description-pattern locator carried an invalid regex.
    #[error("invalid locator pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// `TaskManager::run` was asked for an id nothing registered under.
    #[error("unknown task: {0}")]
    UnknownTask(String),
}

pub type Result<T> = std::result::Result<T, Error>;
