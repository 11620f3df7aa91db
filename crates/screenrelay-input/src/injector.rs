//! Invocation of the external injection utility.

use std::process::{Command, Stdio};

use screenrelay_ipc::InputConfig;
use tracing::{debug, trace};

use crate::action::InputAction;
use crate::error::InputError;
use crate::InputResult;

/// Performs one input action.
pub trait InputInjector: Send {
    fn inject(&self, action: &InputAction) -> InputResult<()>;
}

impl<T: InputInjector + ?Sized> InputInjector for Box<T> {
    fn inject(&self, action: &InputAction) -> InputResult<()> {
        (**self).inject(action)
    }
}

/// Runs `xdotool` (or a compatible program) once per action.
#[derive(Debug, Clone)]
pub struct XdotoolInjector {
    program: String,
    display: Option<String>,
}

impl XdotoolInjector {
    pub fn new(program: impl Into<String>, display: Option<String>) -> Self {
        Self {
            program: program.into(),
            display,
        }
    }

    pub fn from_config(config: &InputConfig) -> Self {
        Self::new(config.program.clone(), config.display.clone())
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl InputInjector for XdotoolInjector {
    fn inject(&self, action: &InputAction) -> InputResult<()> {
        let args = action.xdotool_args();
        trace!(program = %self.program, ?args, "Injecting input");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(ref display) = self.display {
            command.env("DISPLAY", display);
        }

        let output = command.output().map_err(|source| InputError::Launch {
            program: self.program.clone(),
            source,
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(action = action.name(), status = %output.status, %stderr, "Injection failed");
        Err(InputError::Injection {
            action: action.name(),
            status: output.status.to_string(),
            stderr,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_success_status() {
        let injector = XdotoolInjector::new("true", None);
        assert!(injector.inject(&InputAction::Click { button: 1 }).is_ok());
    }

    #[test]
    fn test_failure_status_is_injection_error() {
        let injector = XdotoolInjector::new("false", Some(":99".into()));
        match injector.inject(&InputAction::Key { key: "Return".into() }) {
            Err(InputError::Injection { action, .. }) => assert_eq!(action, "key"),
            other => panic!("expected injection error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_program_is_launch_error() {
        let injector = XdotoolInjector::new("/nonexistent/xdotool", None);
        assert!(matches!(
            injector.inject(&InputAction::Move { x: 1, y: 1 }),
            Err(InputError::Launch { .. })
        ));
    }
}
