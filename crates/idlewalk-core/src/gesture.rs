//! Parametrized swipe gestures with randomized geometry.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use crate::driver::UiDriver;
use crate::Result;

/// Vertical swipe direction, in terms of feed movement: `Up` advances the
/// feed (finger moves toward the top of the screen).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Up,
    Down,
}

/// Fractional coordinate bands the gesture start/end points are sampled
/// from. Randomizing within bands keeps repeated gestures visually distinct,
/// which is a deliberate property of the browsing simulation — do not
/// collapse these to fixed pixels.
#[derive(Debug, Clone)]
pub struct ScrollBands {
    /// Horizontal band for both endpoints, as fractions of width.
    pub x: (f64, f64),
    /// Vertical band the finger starts in for an upward swipe.
    pub start_y: (f64, f64),
    /// Vertical band the finger ends in for an upward swipe.
    pub end_y: (f64, f64),
    /// Multiplicative jitter applied to the requested duration.
    pub duration_jitter: (f64, f64),
}

impl Default for ScrollBands {
    fn default() -> Self {
        Self {
            x: (0.45, 0.55),
            start_y: (0.65, 0.78),
            end_y: (0.22, 0.35),
            duration_jitter: (0.85, 1.15),
        }
    }
}

/// One swipe's concrete geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwipePlan {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub duration_ms: u64,
}

/// Sample a swipe within the configured bands. Pure over the injected rng so
/// tests can seed it.
pub fn plan_swipe<R: Rng>(
    width: u32,
    height: u32,
    direction: SwipeDirection,
    duration_ms: u64,
    bands: &ScrollBands,
    rng: &mut R,
) -> SwipePlan {
    let w = width as f64;
    let h = height as f64;
    let x1 = w * rng.gen_range(bands.x.0..=bands.x.1);
    let x2 = w * rng.gen_range(bands.x.0..=bands.x.1);
    let (y1, y2) = match direction {
        SwipeDirection::Up => (
            h * rng.gen_range(bands.start_y.0..=bands.start_y.1),
            h * rng.gen_range(bands.end_y.0..=bands.end_y.1),
        ),
        // Downward swipe mirrors the bands.
        SwipeDirection::Down => (
            h * rng.gen_range(bands.end_y.0..=bands.end_y.1),
            h * rng.gen_range(bands.start_y.0..=bands.start_y.1),
        ),
    };
    let jitter = rng.gen_range(bands.duration_jitter.0..=bands.duration_jitter.1);
    SwipePlan {
        x1: x1 as i32,
        y1: y1 as i32,
        x2: x2 as i32,
        y2: y2 as i32,
        duration_ms: (duration_ms as f64 * jitter) as u64,
    }
}

/// Issues swipe gestures against the driver.
pub struct ScrollController {
    driver: Arc<dyn UiDriver>,
    bands: ScrollBands,
}

impl ScrollController {
    pub fn new(driver: Arc<dyn UiDriver>) -> Self {
        Self::with_bands(driver, ScrollBands::default())
    }

    pub fn with_bands(driver: Arc<dyn UiDriver>, bands: ScrollBands) -> Self {
        Self { driver, bands }
    }

    /// Perform one randomized swipe. Returns false on a driver-reported
    /// gesture failure so callers can abandon a simulated-browsing sequence
    /// gracefully instead of erroring out.
    pub async fn swipe(&self, direction: SwipeDirection, duration_ms: u64) -> Result<bool> {
        let (width, height) = match self.driver.window_size().await {
            Ok(size) => size,
            Err(e) => {
                warn!("window size unavailable, skipping swipe: {}", e);
                return Ok(false);
            }
        };
        let plan = plan_swipe(
            width,
            height,
            direction,
            duration_ms,
            &self.bands,
            &mut rand::thread_rng(),
        );
        debug!(
            "swipe {:?}: ({},{}) -> ({},{}) over {}ms",
            direction, plan.x1, plan.y1, plan.x2, plan.y2, plan.duration_ms
        );
        match self
            .driver
            .swipe(plan.x1, plan.y1, plan.x2, plan.y2, plan.duration_ms)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("swipe failed: {}", e);
                Ok(false)
            }
        }
    }
}
