//! Message contract between the control channel and the show scheduler.
//!
//! The transport side decodes inbound JSON into [`Command`]s and pushes them
//! into a queue; the scheduler answers each one with a [`Response`] on a
//! second queue. The two sides share nothing else.

use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{HustlerError, Result};

/// One operator command: a type string and an arbitrary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub command_type: String,
    pub payload: Value,
}

/// What a [`Command`] asks the show to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request<'a> {
    Stop,
    List,
    Debug(&'a Value),
    Set {
        entity: &'a str,
        parameter: &'a str,
        value: &'a Value,
    },
}

impl Command {
    pub fn new(command_type: impl Into<String>, payload: Value) -> Self {
        Self {
            command_type: command_type.into(),
            payload,
        }
    }

    pub fn stop() -> Self {
        Self::new("stop", Value::Null)
    }

    pub fn list() -> Self {
        Self::new("list", Value::Null)
    }

    pub fn set(entity: &str, parameter: &str, value: Value) -> Self {
        Self::new(format!("{entity}.{parameter}"), value)
    }

    /// Accepts `["type", payload]` (payload optional) or
    /// `{"command": "type", "payload": ...}`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(mut items) if (1..=2).contains(&items.len()) => {
                let payload = if items.len() == 2 {
                    items.pop().unwrap_or(Value::Null)
                } else {
                    Value::Null
                };
                match items.pop() {
                    Some(Value::String(command_type)) => Ok(Self::new(command_type, payload)),
                    other => Err(HustlerError::TransportDecode(format!(
                        "command type must be a string, got {}",
                        other.unwrap_or(Value::Null)
                    ))),
                }
            }
            Value::Object(mut fields) => {
                let payload = fields.remove("payload").unwrap_or(Value::Null);
                match fields.remove("command") {
                    Some(Value::String(command_type)) => Ok(Self::new(command_type, payload)),
                    _ => Err(HustlerError::TransportDecode(
                        "object is missing a string \"command\" field".to_string(),
                    )),
                }
            }
            other => Err(HustlerError::TransportDecode(format!(
                "expected [type, payload] or an object, got {other}"
            ))),
        }
    }

    /// Splits the command type into a [`Request`].
    pub fn request(&self) -> Result<Request<'_>> {
        match self.command_type.as_str() {
            "stop" => Ok(Request::Stop),
            "list" => Ok(Request::List),
            "debug" => Ok(Request::Debug(&self.payload)),
            other => {
                let mut parts = other.split('.');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(entity), Some(parameter), None)
                        if !entity.is_empty() && !parameter.is_empty() =>
                    {
                        Ok(Request::Set {
                            entity,
                            parameter,
                            value: &self.payload,
                        })
                    }
                    _ => Err(HustlerError::InvalidCommand(other.to_string())),
                }
            }
        }
    }
}

/// Decodes one inbound transport message.
pub fn decode_command(text: &str) -> Result<Command> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| HustlerError::TransportDecode(err.to_string()))?;
    Command::from_value(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Message,
    Error,
}

/// Scheduler answer to one command. On the wire it is `["kind", "text"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(ResponseKind, String)", into = "(ResponseKind, String)")]
pub struct Response {
    pub kind: ResponseKind,
    pub payload: String,
}

impl Response {
    pub fn message(payload: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Message,
            payload: payload.into(),
        }
    }

    pub fn error(payload: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            payload: payload.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<(ResponseKind, String)> for Response {
    fn from((kind, payload): (ResponseKind, String)) -> Self {
        Self { kind, payload }
    }
}

impl From<Response> for (ResponseKind, String) {
    fn from(response: Response) -> Self {
        (response.kind, response.payload)
    }
}

/// Builds the two ends of a control channel.
pub fn channel() -> (ControlChannel, ShowEndpoint) {
    let (command_tx, command_rx) = unbounded();
    let (response_tx, response_rx) = unbounded();
    (
        ControlChannel {
            commands: command_tx,
            responses: response_rx,
        },
        ShowEndpoint {
            commands: command_rx,
            responses: response_tx,
        },
    )
}

/// Transport side: enqueues commands and dequeues responses.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    commands: Sender<Command>,
    responses: Receiver<Response>,
}

impl ControlChannel {
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| HustlerError::msg("show is no longer receiving commands"))
    }

    /// Decodes and enqueues a raw transport message. Undecodable input is
    /// logged and dropped; returns whether a command was enqueued.
    pub fn send_text(&self, text: &str) -> Result<bool> {
        match decode_command(text) {
            Ok(command) => self.send(command).map(|_| true),
            Err(err) => {
                tracing::warn!(%err, input = text, "dropping undecodable command");
                Ok(false)
            }
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Response> {
        self.responses.recv_timeout(timeout).ok()
    }

    pub fn responses(&self) -> &Receiver<Response> {
        &self.responses
    }
}

/// Scheduler side of a control channel.
#[derive(Debug)]
pub struct ShowEndpoint {
    commands: Receiver<Command>,
    responses: Sender<Response>,
}

/// Result of waiting for a command.
#[derive(Debug)]
pub enum Poll {
    Command(Command),
    Timeout,
    /// Every transport handle has been dropped.
    Closed,
}

impl ShowEndpoint {
    pub fn poll(&self, timeout: Duration) -> Poll {
        match self.commands.recv_timeout(timeout) {
            Ok(command) => Poll::Command(command),
            Err(RecvTimeoutError::Timeout) => Poll::Timeout,
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }

    /// Sends a response. A closed transport is not an error for the show.
    pub fn respond(&self, response: Response) {
        if self.responses.send(response).is_err() {
            tracing::debug!("response dropped; control channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_pairs_and_objects() {
        let pair = decode_command(r#"["hue0.center", 0.25]"#).unwrap();
        assert_eq!(pair, Command::new("hue0.center", json!(0.25)));

        let bare = decode_command(r#"["stop"]"#).unwrap();
        assert_eq!(bare, Command::stop());

        let object = decode_command(r#"{"command": "trigger0.bpm", "payload": 90}"#).unwrap();
        assert_eq!(object, Command::set("trigger0", "bpm", json!(90)));
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        for text in ["{not json", "42", "[]", r#"[1, 2]"#, r#"{"payload": 1}"#, r#"["a", 1, 2]"#] {
            let err = decode_command(text).unwrap_err();
            assert!(matches!(err, HustlerError::TransportDecode(_)), "{text}");
        }
    }

    #[test]
    fn splits_command_types() {
        assert_eq!(Command::stop().request().unwrap(), Request::Stop);
        assert_eq!(Command::list().request().unwrap(), Request::List);
        let debug = Command::new("debug", json!(true));
        assert_eq!(debug.request().unwrap(), Request::Debug(&json!(true)));

        let set = Command::set("gobo_hustler", "easing", json!(0.2));
        assert_eq!(
            set.request().unwrap(),
            Request::Set {
                entity: "gobo_hustler",
                parameter: "easing",
                value: &json!(0.2),
            }
        );

        for bad in ["nonsense", "a.b.c", ".x", "x."] {
            let err = Command::new(bad, Value::Null).request().unwrap_err();
            assert!(matches!(err, HustlerError::InvalidCommand(_)), "{bad}");
        }
    }

    #[test]
    fn responses_encode_as_pairs() {
        let encoded = Response::message("Show is stopping.").encode().unwrap();
        assert_eq!(encoded, r#"["message","Show is stopping."]"#);
        let decoded: Response = serde_json::from_str(r#"["error","nope"]"#).unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded.payload, "nope");
    }

    #[test]
    fn channel_carries_commands_and_responses() {
        let (control, endpoint) = channel();
        assert!(control.send_text(r#"["list"]"#).unwrap());
        assert!(!control.send_text("garbage").unwrap());

        match endpoint.poll(Duration::from_millis(10)) {
            Poll::Command(command) => assert_eq!(command, Command::list()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(endpoint.poll(Duration::from_millis(1)), Poll::Timeout));

        endpoint.respond(Response::message("ok"));
        assert_eq!(
            control.recv_timeout(Duration::from_millis(10)),
            Some(Response::message("ok"))
        );

        drop(control);
        assert!(matches!(endpoint.poll(Duration::from_millis(1)), Poll::Closed));
    }
}
