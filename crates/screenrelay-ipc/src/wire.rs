//! JSON messages exchanged with viewers over the WebSocket transport.

use serde::{Deserialize, Serialize};

use crate::types::FrameFormat;

fn default_button() -> u8 {
    1
}

/// Control messages sent by a viewer, tagged by their `command` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe this connection to the live feed.
    StartStream,

    /// Drop this connection's subscriptions.
    StopStream,

    /// Move the pointer.
    Move {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
    },

    /// Move the pointer, then click.
    Click {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default = "default_button")]
        button: u8,
    },

    /// Move the pointer, then double-click.
    DoubleClick {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default = "default_button")]
        button: u8,
    },

    /// Type a string.
    Type {
        #[serde(default)]
        text: String,
    },

    /// Press a key (xdotool key name, e.g. "Return" or "ctrl+c").
    Key {
        #[serde(default)]
        key: String,
    },

    /// Free-form chat line; logged and acknowledged.
    Chat {
        #[serde(default)]
        message: String,
    },
}

impl ClientMessage {
    /// Every `command` tag a viewer may send.
    pub const COMMANDS: [&'static str; 8] = [
        "start_stream",
        "stop_stream",
        "move",
        "click",
        "double_click",
        "type",
        "key",
        "chat",
    ];

    pub fn is_known_command(name: &str) -> bool {
        Self::COMMANDS.iter().any(|command| *command == name)
    }
}

/// Media and chat messages pushed to a viewer, tagged by their `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One base64-encoded video frame. `format` is present only for
    /// payloads that are not JPEG.
    Video {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<FrameFormat>,
    },

    /// One base64-encoded audio chunk.
    Audio { data: String },

    /// Chat acknowledgement.
    Chat { message: String },
}

/// Reply to a viewer command, tagged by its `status` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Error { message: String },
}

impl Reply {
    /// Build an error reply from anything displayable.
    pub fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"command":"move","x":10,"y":20}"#).unwrap();
        assert_eq!(msg, ClientMessage::Move { x: 10, y: 20 });
    }

    #[test]
    fn test_click_button_defaults_to_left() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"command":"click","x":1,"y":2}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Click {
                x: 1,
                y: 2,
                button: 1
            }
        );
    }

    #[test]
    fn test_missing_coordinates_default_to_zero() {
        let msg: ClientMessage = serde_json::from_str(r#"{"command":"move"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Move { x: 0, y: 0 });
    }

    #[test]
    fn test_known_commands_round_trip_their_tags() {
        assert!(ClientMessage::is_known_command("double_click"));
        assert!(!ClientMessage::is_known_command("reboot"));

        let tag = serde_json::to_value(ClientMessage::StopStream).unwrap();
        assert!(ClientMessage::is_known_command(tag["command"].as_str().unwrap()));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"command":"reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let json = serde_json::to_string(&ServerMessage::Video {
            data: "AAEC".into(),
            format: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"video","data":"AAEC"}"#);

        let json = serde_json::to_string(&ServerMessage::Video {
            data: "AAEC".into(),
            format: Some(FrameFormat::Rgb24),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"video","data":"AAEC","format":"rgb24"}"#);
    }

    #[test]
    fn test_reply_shape() {
        assert_eq!(
            serde_json::to_string(&Reply::Ok).unwrap(),
            r#"{"status":"ok"}"#
        );
        assert_eq!(
            serde_json::to_string(&Reply::error("Invalid JSON")).unwrap(),
            r#"{"status":"error","message":"Invalid JSON"}"#
        );
    }
}
