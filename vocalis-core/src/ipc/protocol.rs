//! Line-oriented control protocol spoken by hosts.
//!
//! A message is a method name followed by `:`-separated arguments. A
//! backslash makes the next character literal, so `\:` is a colon inside an
//! argument and `\\` a backslash. Unknown methods and malformed `speak`
//! messages are ignored (no response).
//!
//! | Request | Response |
//! |---------|----------|
//! | `startService` | `idle` or `error` |
//! | `speak:<rate>:<pitch>:<volume>:<id>:<text>` | `busy`, later `end:<id>` |
//! | `stop` | none |
//! | `status` | `idle`, `busy` or `error` |
//! | `stopService` | none |

use std::fmt;

use tracing::warn;

use super::events::ServiceStatus;

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// Host prosody units per normalized unit.
pub const RATE_DIVISOR: f64 = 5.0;
pub const PITCH_DIVISOR: f64 = 3.4;
pub const VOLUME_DIVISOR: f64 = 7.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    pub rate: f64,
    pub pitch: f64,
    pub volume: f64,
    pub utterance_id: u64,
    pub text: String,
}

impl SpeakRequest {
    /// Host rate/pitch/volume mapped to the engine's normalized domain.
    pub fn normalized(&self) -> (f32, f32, f32) {
        (
            (self.rate / RATE_DIVISOR) as f32,
            (self.pitch / PITCH_DIVISOR) as f32,
            (self.volume / VOLUME_DIVISOR) as f32,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    StartService,
    Speak(SpeakRequest),
    Stop,
    Status,
    StopService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    Idle,
    Busy,
    Error,
    End(u64),
}

impl From<ServiceStatus> for ControlResponse {
    fn from(status: ServiceStatus) -> Self {
        match status {
            ServiceStatus::Idle => Self::Idle,
            ServiceStatus::Busy => Self::Busy,
            ServiceStatus::Error => Self::Error,
        }
    }
}

impl fmt::Display for ControlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Busy => f.write_str("busy"),
            Self::Error => f.write_str("error"),
            Self::End(id) => write!(f, "end:{id}"),
        }
    }
}

/// Split a raw message into its method name and unescaped arguments.
pub fn split_message(message: &str) -> (String, Vec<String>) {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // A trailing backslash has nothing to escape and stays literal.
            ESCAPE if chars.peek().is_some() => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            SEPARATOR => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);

    let method = fields.remove(0);
    (method, fields)
}

/// Escape `arg` so it survives [`split_message`] as a single argument.
pub fn escape_arg(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len());
    for c in arg.chars() {
        if c == SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Parse one control message. `None` for anything the host should get no
/// answer to.
pub fn parse_message(message: &str) -> Option<ControlMessage> {
    let (method, args) = split_message(message);
    match method.as_str() {
        "startService" => Some(ControlMessage::StartService),
        "stop" => Some(ControlMessage::Stop),
        "status" => Some(ControlMessage::Status),
        "stopService" => Some(ControlMessage::StopService),
        "speak" => parse_speak(args).map(ControlMessage::Speak),
        "" => None,
        other => {
            warn!(method = other, "ignoring unknown control method");
            None
        }
    }
}

fn parse_speak(args: Vec<String>) -> Option<SpeakRequest> {
    let Ok([rate, pitch, volume, id, text]) = <[String; 5]>::try_from(args) else {
        warn!("speak needs exactly five arguments");
        return None;
    };
    let number = |field: &str, value: &str| -> Option<f64> {
        match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                warn!(field, value, "speak argument is not a number");
                None
            }
        }
    };
    let utterance_id = match id.trim().parse::<u64>() {
        Ok(id) => id,
        Err(_) => {
            warn!(value = id.as_str(), "speak utterance id is not an unsigned integer");
            return None;
        }
    };
    Some(SpeakRequest {
        rate: number("rate", &rate)?,
        pitch: number("pitch", &pitch)?,
        volume: number("volume", &volume)?,
        utterance_id,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn splits_with_escapes() {
        let (method, args) = split_message(r"speak:1:2\:3:a\\b:");
        assert_eq!(method, "speak");
        assert_eq!(args, vec!["1", "2:3", r"a\b", ""]);

        let (method, args) = split_message(r"status\");
        assert_eq!(method, r"status\");
        assert!(args.is_empty());
    }

    #[test]
    fn escape_round_trips_through_split() {
        let text = r"Time: 10:30 \ path\to";
        let line = format!("speak:5:3.4:7:9:{}", escape_arg(text));
        let Some(ControlMessage::Speak(req)) = parse_message(&line) else {
            panic!("speak did not parse");
        };
        assert_eq!(req.text, text);
        assert_eq!(req.utterance_id, 9);
    }

    #[test]
    fn parses_simple_methods() {
        assert_eq!(parse_message("startService"), Some(ControlMessage::StartService));
        assert_eq!(parse_message("stop"), Some(ControlMessage::Stop));
        assert_eq!(parse_message("status"), Some(ControlMessage::Status));
        assert_eq!(parse_message("stopService"), Some(ControlMessage::StopService));
        assert_eq!(parse_message("dance"), None);
        assert_eq!(parse_message(""), None);
    }

    #[test]
    fn speak_requires_exactly_five_arguments() {
        assert!(parse_message("speak:1:1:1:4").is_none());
        assert!(parse_message("speak:1:1:1:4:hi:extra").is_none());
        assert!(parse_message("speak:x:1:1:4:hi").is_none());
        assert!(parse_message("speak:1:1:1:-4:hi").is_none());
    }

    #[test]
    fn speak_maps_host_units() {
        let Some(ControlMessage::Speak(req)) = parse_message("speak:2.5:1.7:3.5:12:hello") else {
            panic!("speak did not parse");
        };
        let (rate, pitch, volume) = req.normalized();
        assert_relative_eq!(rate, 0.5);
        assert_relative_eq!(pitch, 0.5);
        assert_relative_eq!(volume, 0.5);
    }

    #[test]
    fn responses_render_as_wire_strings() {
        assert_eq!(ControlResponse::Idle.to_string(), "idle");
        assert_eq!(ControlResponse::from(ServiceStatus::Busy).to_string(), "busy");
        assert_eq!(ControlResponse::Error.to_string(), "error");
        assert_eq!(ControlResponse::End(42).to_string(), "end:42");
    }
}
