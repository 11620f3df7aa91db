//! Input actions and their xdotool argument lists.

/// One input action, mapped to exactly one utility invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    /// Move the pointer to absolute screen coordinates.
    Move { x: i32, y: i32 },

    /// Click a button at the current pointer position.
    Click { button: u8 },

    /// Double-click a button at the current pointer position.
    DoubleClick { button: u8 },

    /// Type a string.
    Type { text: String },

    /// Press a key or key combination (`ctrl+c`, `Return`).
    Key { key: String },
}

impl InputAction {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Click { .. } => "click",
            Self::DoubleClick { .. } => "double_click",
            Self::Type { .. } => "type",
            Self::Key { .. } => "key",
        }
    }

    /// Arguments for `xdotool`.
    pub fn xdotool_args(&self) -> Vec<String> {
        match self {
            Self::Move { x, y } => vec!["mousemove".into(), x.to_string(), y.to_string()],
            Self::Click { button } => vec!["click".into(), button.to_string()],
            Self::DoubleClick { button } => vec![
                "click".into(),
                "--repeat".into(),
                "2".into(),
                button.to_string(),
            ],
            Self::Type { text } => vec!["type".into(), text.clone()],
            Self::Key { key } => vec!["key".into(), key.clone()],
        }
    }

    /// Whether this is a pointer action.
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            Self::Move { .. } | Self::Click { .. } | Self::DoubleClick { .. }
        )
    }
}
