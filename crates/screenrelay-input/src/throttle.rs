//! Pointer-move rate limiting in front of the injector.

use std::time::{Duration, Instant};

use screenrelay_ipc::InputConfig;
use tracing::trace;

use crate::action::InputAction;
use crate::error::InputError;
use crate::injector::InputInjector;
use crate::InputResult;

/// Outcome of a pointer move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The utility was invoked.
    Dispatched,

    /// Dropped without invoking the utility.
    Suppressed,
}

/// Last dispatched pointer position and when it was dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseState {
    pub position: Option<(i32, i32)>,
    pub last_dispatch: Option<Instant>,
}

/// Forwards input actions to an [`InputInjector`], suppressing redundant
/// pointer moves.
///
/// A move is dropped when it targets the last dispatched position or when
/// less than the minimum interval has passed since the last dispatched move.
/// The mouse state only changes after a successful invocation, so a failed
/// injection leaves the throttler consistent.
pub struct InputEventThrottler<I> {
    injector: I,
    state: MouseState,
    min_interval: Duration,
    enable_mouse: bool,
    enable_keyboard: bool,
    bounds: Option<(u32, u32)>,
}

impl<I: InputInjector> InputEventThrottler<I> {
    pub fn new(injector: I, config: &InputConfig) -> Self {
        Self {
            injector,
            state: MouseState::default(),
            min_interval: config.min_move_interval(),
            enable_mouse: config.enable_mouse,
            enable_keyboard: config.enable_keyboard,
            bounds: config.screen_bounds,
        }
    }

    /// Move the pointer, subject to throttling.
    pub fn move_to(&mut self, x: i32, y: i32) -> InputResult<Dispatch> {
        self.require_mouse()?;
        let (x, y) = self.clamp(x, y);

        if self.state.position == Some((x, y)) {
            trace!(x, y, "Suppressing move to current position");
            return Ok(Dispatch::Suppressed);
        }
        if let Some(last) = self.state.last_dispatch {
            if last.elapsed() < self.min_interval {
                trace!(x, y, "Suppressing move inside throttle interval");
                return Ok(Dispatch::Suppressed);
            }
        }

        self.dispatch_move(x, y)?;
        Ok(Dispatch::Dispatched)
    }

    /// Move (unthrottled) then click.
    pub fn click(&mut self, x: i32, y: i32, button: u8) -> InputResult<()> {
        self.require_mouse()?;
        let (x, y) = self.clamp(x, y);
        self.dispatch_move(x, y)?;
        self.injector.inject(&InputAction::Click { button })
    }

    /// Move (unthrottled) then double-click.
    pub fn double_click(&mut self, x: i32, y: i32, button: u8) -> InputResult<()> {
        self.require_mouse()?;
        let (x, y) = self.clamp(x, y);
        self.dispatch_move(x, y)?;
        self.injector.inject(&InputAction::DoubleClick { button })
    }

    pub fn type_text(&mut self, text: &str) -> InputResult<()> {
        self.require_keyboard()?;
        if text.is_empty() {
            return Ok(());
        }
        self.injector.inject(&InputAction::Type {
            text: text.to_string(),
        })
    }

    pub fn key(&mut self, key: &str) -> InputResult<()> {
        self.require_keyboard()?;
        self.injector.inject(&InputAction::Key {
            key: key.to_string(),
        })
    }

    pub fn mouse_state(&self) -> MouseState {
        self.state
    }

    pub fn injector(&self) -> &I {
        &self.injector
    }

    fn dispatch_move(&mut self, x: i32, y: i32) -> InputResult<()> {
        self.injector.inject(&InputAction::Move { x, y })?;
        self.state = MouseState {
            position: Some((x, y)),
            last_dispatch: Some(Instant::now()),
        };
        Ok(())
    }

    fn clamp(&self, x: i32, y: i32) -> (i32, i32) {
        match self.bounds {
            Some((w, h)) => {
                let max_x = i32::try_from(w.saturating_sub(1)).unwrap_or(i32::MAX);
                let max_y = i32::try_from(h.saturating_sub(1)).unwrap_or(i32::MAX);
                (x.clamp(0, max_x), y.clamp(0, max_y))
            }
            None => (x, y),
        }
    }

    fn require_mouse(&self) -> InputResult<()> {
        if self.enable_mouse {
            Ok(())
        } else {
            Err(InputError::Disabled("mouse"))
        }
    }

    fn require_keyboard(&self) -> InputResult<()> {
        if self.enable_keyboard {
            Ok(())
        } else {
            Err(InputError::Disabled("keyboard"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<InputAction>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<InputAction> {
            self.calls.lock().unwrap().clone()
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    impl InputInjector for Recorder {
        fn inject(&self, action: &InputAction) -> InputResult<()> {
            if *self.fail.lock().unwrap() {
                return Err(InputError::Injection {
                    action: action.name(),
                    status: "exit status: 1".into(),
                    stderr: String::new(),
                });
            }
            self.calls.lock().unwrap().push(action.clone());
            Ok(())
        }
    }

    fn throttler(interval: Duration) -> (InputEventThrottler<Recorder>, Recorder) {
        let recorder = Recorder::default();
        let config = InputConfig {
            min_move_interval_us: interval.as_micros() as u64,
            ..Default::default()
        };
        (InputEventThrottler::new(recorder.clone(), &config), recorder)
    }

    #[test]
    fn test_identical_moves_invoke_once() {
        let (mut throttler, recorder) = throttler(Duration::from_millis(16));

        assert_eq!(throttler.move_to(100, 200).unwrap(), Dispatch::Dispatched);
        assert_eq!(throttler.move_to(100, 200).unwrap(), Dispatch::Suppressed);

        assert_eq!(recorder.calls(), vec![InputAction::Move { x: 100, y: 200 }]);
    }

    #[test]
    fn test_same_position_suppressed_even_after_interval() {
        let (mut throttler, recorder) = throttler(Duration::from_millis(5));

        throttler.move_to(1, 1).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(throttler.move_to(1, 1).unwrap(), Dispatch::Suppressed);
        assert_eq!(recorder.calls().len(), 1);
    }

    #[test]
    fn test_fast_moves_are_throttled() {
        let (mut throttler, recorder) = throttler(Duration::from_millis(50));

        throttler.move_to(0, 0).unwrap();
        assert_eq!(throttler.move_to(5, 5).unwrap(), Dispatch::Suppressed);
        thread::sleep(Duration::from_millis(70));
        assert_eq!(throttler.move_to(5, 5).unwrap(), Dispatch::Dispatched);

        assert_eq!(
            recorder.calls(),
            vec![InputAction::Move { x: 0, y: 0 }, InputAction::Move { x: 5, y: 5 }]
        );
    }

    #[test]
    fn test_click_moves_then_clicks() {
        let (mut throttler, recorder) = throttler(Duration::from_secs(10));

        throttler.move_to(1, 1).unwrap();
        throttler.click(40, 50, 1).unwrap();

        assert_eq!(
            recorder.calls(),
            vec![
                InputAction::Move { x: 1, y: 1 },
                InputAction::Move { x: 40, y: 50 },
                InputAction::Click { button: 1 },
            ]
        );
        assert_eq!(throttler.mouse_state().position, Some((40, 50)));
    }

    #[test]
    fn test_double_click() {
        let (mut throttler, recorder) = throttler(Duration::from_millis(16));

        throttler.double_click(3, 4, 2).unwrap();

        assert_eq!(
            recorder.calls(),
            vec![
                InputAction::Move { x: 3, y: 4 },
                InputAction::DoubleClick { button: 2 },
            ]
        );
    }

    #[test]
    fn test_failed_injection_keeps_state() {
        let (mut throttler, recorder) = throttler(Duration::ZERO);

        throttler.move_to(10, 10).unwrap();
        let before = throttler.mouse_state();

        recorder.set_failing(true);
        assert!(matches!(
            throttler.move_to(20, 20),
            Err(InputError::Injection { action: "move", .. })
        ));
        assert_eq!(throttler.mouse_state(), before);

        recorder.set_failing(false);
        assert_eq!(throttler.move_to(20, 20).unwrap(), Dispatch::Dispatched);
    }

    #[test]
    fn test_disabled_devices() {
        let recorder = Recorder::default();
        let config = InputConfig {
            enable_mouse: false,
            enable_keyboard: false,
            ..Default::default()
        };
        let mut throttler = InputEventThrottler::new(recorder.clone(), &config);

        assert!(matches!(throttler.move_to(1, 1), Err(InputError::Disabled("mouse"))));
        assert!(matches!(throttler.click(1, 1, 1), Err(InputError::Disabled("mouse"))));
        assert!(matches!(throttler.key("a"), Err(InputError::Disabled("keyboard"))));
        assert!(matches!(throttler.type_text("hi"), Err(InputError::Disabled("keyboard"))));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn test_coordinates_are_clamped() {
        let recorder = Recorder::default();
        let config = InputConfig {
            screen_bounds: Some((1280, 720)),
            ..Default::default()
        };
        let mut throttler = InputEventThrottler::new(recorder.clone(), &config);

        throttler.click(5000, -20, 1).unwrap();

        assert_eq!(recorder.calls()[0], InputAction::Move { x: 1279, y: 0 });
    }

    #[test]
    fn test_keyboard_actions() {
        let (mut throttler, recorder) = throttler(Duration::from_millis(16));

        throttler.type_text("").unwrap();
        throttler.type_text("hello").unwrap();
        throttler.key("Return").unwrap();

        assert_eq!(
            recorder.calls(),
            vec![
                InputAction::Type { text: "hello".into() },
                InputAction::Key { key: "Return".into() },
            ]
        );
    }
}
