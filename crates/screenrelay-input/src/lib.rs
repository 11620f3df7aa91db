//! Input relay from viewers to an external injection utility.
//!
//! Every action becomes one invocation of the utility (`xdotool` by
//! default). Pointer moves pass through [`InputEventThrottler`], which
//! drops repeats and moves that arrive faster than the configured rate.

mod action;
mod error;
mod injector;
mod throttle;

pub use action::InputAction;
pub use error::InputError;
pub use injector::{InputInjector, XdotoolInjector};
pub use throttle::{Dispatch, InputEventThrottler, MouseState};

/// Result type for input operations.
pub type InputResult<T> = Result<T, InputError>;
