//! Interaction primitives: pointer clicks, scrolling and timed waits.
//!
//! Every primitive runs inside its own `tracing` span and either completes or
//! fails with an [`InputError`]. There is no retry here; a failed primitive
//! aborts the workflow step that issued it.

use enigo::{Axis, Button, Coordinate, Direction, Enigo, Mouse, Settings};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::screen::{Point, Screen};

/// Wheel units per notch, matching the Windows `WHEEL_DELTA`
pub const WHEEL_DELTA: i32 = 120;

/// Error types for input operations
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The input device could not be opened
    #[error("input device unavailable: {0}")]
    Unavailable(String),

    /// A pointer action was rejected by the platform
    #[error("{action} failed: {reason}")]
    Action {
        action: &'static str,
        reason: String,
    },
}

/// A synthetic pointer device
pub trait InputDevice {
    /// Move to `at` and press the primary button once
    fn click(&mut self, at: Point) -> Result<(), InputError>;

    /// Scroll vertically by `amount` wheel units; negative scrolls down
    fn scroll(&mut self, amount: i32) -> Result<(), InputError>;
}

/// Time-based waiting
pub trait Pacer {
    fn pause(&mut self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Drives the real pointer through `enigo`
pub struct EnigoDevice {
    enigo: Enigo,
}

impl EnigoDevice {
    pub fn new() -> Result<Self, InputError> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| InputError::Unavailable(e.to_string()))?;
        Ok(Self { enigo })
    }
}

impl InputDevice for EnigoDevice {
    fn click(&mut self, at: Point) -> Result<(), InputError> {
        self.enigo
            .move_mouse(at.x, at.y, Coordinate::Abs)
            .map_err(|e| InputError::Action {
                action: "move",
                reason: e.to_string(),
            })?;
        self.enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| InputError::Action {
                action: "click",
                reason: e.to_string(),
            })
    }

    fn scroll(&mut self, amount: i32) -> Result<(), InputError> {
        self.enigo
            .scroll(wheel_notches(amount), Axis::Vertical)
            .map_err(|e| InputError::Action {
                action: "scroll",
                reason: e.to_string(),
            })
    }
}

/// Convert wheel units (negative = down) to enigo notches (positive = down)
fn wheel_notches(amount: i32) -> i32 {
    if amount == 0 {
        return 0;
    }
    let notches = (amount.abs() / WHEEL_DELTA).max(1);
    if amount < 0 { notches } else { -notches }
}

/// Fixed displacement from a recognized anchor to the control that acts on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
}

impl Offset {
    pub const fn horizontal(dx: i32) -> Self {
        Self { dx, dy: 0 }
    }
}

/// Where to click for a control rendered at `offset` from a recognized anchor
pub fn offset_action(anchor: Point, offset: Offset) -> Point {
    Point::new(anchor.x + offset.dx, anchor.y + offset.dy)
}

/// The single screen and input device a run owns
pub struct Desktop {
    screen: Box<dyn Screen>,
    input: Box<dyn InputDevice>,
    pacer: Box<dyn Pacer>,
}

impl Desktop {
    pub fn new(
        screen: Box<dyn Screen>,
        input: Box<dyn InputDevice>,
        pacer: Box<dyn Pacer>,
    ) -> Self {
        Self {
            screen,
            input,
            pacer,
        }
    }

    pub fn screen(&mut self) -> &mut dyn Screen {
        self.screen.as_mut()
    }

    #[instrument(name = "click", skip(self), fields(x = at.x, y = at.y))]
    pub fn click(&mut self, at: Point) -> Result<(), InputError> {
        self.input.click(at)?;
        info!("clicked");
        Ok(())
    }

    /// Click the control co-located with `anchor`; returns the clicked point
    #[instrument(name = "click_offset", skip(self), fields(dx = offset.dx, dy = offset.dy))]
    pub fn click_offset(&mut self, anchor: Point, offset: Offset) -> Result<Point, InputError> {
        let at = offset_action(anchor, offset);
        self.input.click(at)?;
        info!(x = at.x, y = at.y, "clicked at offset from anchor");
        Ok(at)
    }

    #[instrument(name = "scroll", skip(self))]
    pub fn scroll(&mut self, amount: i32) -> Result<(), InputError> {
        self.input.scroll(amount)?;
        info!("scrolled");
        Ok(())
    }

    #[instrument(name = "wait", skip(self), fields(ms = duration.as_millis() as u64))]
    pub fn wait(&mut self, duration: Duration) {
        debug!("waiting");
        self.pacer.pause(duration);
    }

    /// Wait without a span, for tight retry loops
    pub(crate) fn pause(&mut self, duration: Duration) {
        self.pacer.pause(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_action() {
        let anchor = Point::new(120, 300);
        assert_eq!(offset_action(anchor, Offset::horizontal(400)), Point::new(520, 300));
        assert_eq!(offset_action(anchor, Offset { dx: -20, dy: 5 }), Point::new(100, 305));
        assert_eq!(offset_action(anchor, Offset::default()), anchor);
    }

    #[test]
    fn test_wheel_notches() {
        assert_eq!(wheel_notches(-500), 4);
        assert_eq!(wheel_notches(240), -2);
        assert_eq!(wheel_notches(-10), 1);
        assert_eq!(wheel_notches(0), 0);
    }
}
