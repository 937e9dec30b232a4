//! Control commands carried in kind-0 packets
//!
//! The body is a JSON map `{"cmd": <name>, "args": <value>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PacketError;

/// Session control command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Client asks to join under a username
    Join(String),
    /// Client leaves the session
    Leave(String),
    /// Client liveness assertion; never answered
    Ping,
    /// Server broadcast of the current participant list
    Participants(Vec<String>),
    /// Server acknowledgment of a JOIN, sent to the joiner only
    JoinAck,
    /// Well-formed command this build does not understand
    Unknown { cmd: String, args: Value },
}

/// Raw `{cmd, args}` map as it appears on the wire
#[derive(Debug, Serialize, Deserialize)]
struct WireCommand {
    cmd: String,
    #[serde(default)]
    args: Value,
}

impl Command {
    pub const JOIN: &'static str = "JOIN";
    pub const LEAVE: &'static str = "LEAVE";
    pub const PING: &'static str = "PING";
    pub const PARTICIPANTS: &'static str = "PARTICIPANTS";
    pub const JOIN_ACK: &'static str = "JOIN_ACK";

    /// Wire name of the command
    pub fn name(&self) -> &str {
        match self {
            Command::Join(_) => Self::JOIN,
            Command::Leave(_) => Self::LEAVE,
            Command::Ping => Self::PING,
            Command::Participants(_) => Self::PARTICIPANTS,
            Command::JoinAck => Self::JOIN_ACK,
            Command::Unknown { cmd, .. } => cmd,
        }
    }

    /// Serialize to the JSON body
    pub fn to_body(&self) -> Result<Vec<u8>, PacketError> {
        let args = match self {
            Command::Join(name) | Command::Leave(name) => Value::String(name.clone()),
            Command::Ping | Command::JoinAck => Value::Null,
            Command::Participants(list) => {
                Value::Array(list.iter().cloned().map(Value::String).collect())
            }
            Command::Unknown { args, .. } => args.clone(),
        };

        let wire = WireCommand {
            cmd: self.name().to_string(),
            args,
        };
        serde_json::to_vec(&wire).map_err(|e| PacketError::MalformedCommand(e.to_string()))
    }

    /// Parse a JSON body. Fails with `MalformedCommand` on invalid JSON, a
    /// missing `cmd`, or arguments of the wrong shape for a known command.
    pub fn from_body(body: &[u8]) -> Result<Self, PacketError> {
        let wire: WireCommand = serde_json::from_slice(body)
            .map_err(|e| PacketError::MalformedCommand(e.to_string()))?;

        let command = match wire.cmd.as_str() {
            Self::JOIN => Command::Join(string_arg(&wire)?),
            Self::LEAVE => Command::Leave(string_arg(&wire)?),
            Self::PING => Command::Ping,
            Self::JOIN_ACK => Command::JoinAck,
            Self::PARTICIPANTS => {
                let list = serde_json::from_value::<Vec<String>>(wire.args).map_err(|e| {
                    PacketError::MalformedCommand(format!("PARTICIPANTS args: {}", e))
                })?;
                Command::Participants(list)
            }
            _ => Command::Unknown {
                cmd: wire.cmd,
                args: wire.args,
            },
        };
        Ok(command)
    }
}

fn string_arg(wire: &WireCommand) -> Result<String, PacketError> {
    wire.args
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PacketError::MalformedCommand(format!("{} expects a string", wire.cmd)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_body_layout() {
        let body = Command::Join("alice".into()).to_body().unwrap();
        assert_eq!(body, br#"{"cmd":"JOIN","args":"alice"}"#);
    }

    #[test]
    fn test_ping_has_null_args() {
        let body = Command::Ping.to_body().unwrap();
        assert_eq!(body, br#"{"cmd":"PING","args":null}"#);
    }

    #[test]
    fn test_missing_args_is_null() {
        assert_eq!(Command::from_body(br#"{"cmd":"PING"}"#).unwrap(), Command::Ping);
        assert_eq!(
            Command::from_body(br#"{"cmd":"JOIN_ACK"}"#).unwrap(),
            Command::JoinAck
        );
    }

    #[test]
    fn test_missing_cmd_is_malformed() {
        let err = Command::from_body(br#"{"args":"alice"}"#).unwrap_err();
        assert!(matches!(err, PacketError::MalformedCommand(_)));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = Command::from_body(b"\xff\x00not json").unwrap_err();
        assert!(matches!(err, PacketError::MalformedCommand(_)));
    }

    #[test]
    fn test_join_with_non_string_args_is_malformed() {
        let err = Command::from_body(br#"{"cmd":"JOIN","args":42}"#).unwrap_err();
        assert!(matches!(err, PacketError::MalformedCommand(_)));
    }

    #[test]
    fn test_participants_parse() {
        let cmd = Command::from_body(br#"{"cmd":"PARTICIPANTS","args":["A","B"]}"#).unwrap();
        assert_eq!(cmd, Command::Participants(vec!["A".into(), "B".into()]));
    }

    #[test]
    fn test_unknown_command_is_preserved() {
        let cmd = Command::from_body(br#"{"cmd":"KICK","args":{"who":"bob"}}"#).unwrap();
        assert_eq!(cmd.name(), "KICK");
        let again = Command::from_body(&cmd.to_body().unwrap()).unwrap();
        assert_eq!(again, cmd);
    }
}
