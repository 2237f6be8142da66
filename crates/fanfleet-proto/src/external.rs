//! External-control protocol: what third-party automation sees.
//!
//! - state broadcast: `<out-seq>|B|<listener-port>|<timestamp>|<rows>|<cols>|<layers>|<rpm,...>`
//! - command:         `<in-seq>|<code>|<args...>`
//! - reply:           `<out-seq>|<code>|<value>` or `<out-seq>|ERROR|<message>`
//!
//! Commands are decoded in two steps. [`RawCommand::parse`] only needs a
//! sequence number and a code, so the listener can apply its idempotency
//! window before the arguments are looked at; [`ExternalRequest::from_raw`]
//! then validates the arguments.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{
    self, DecodeError, Seq, format_duty_cycle, join_duty_cycles, join_list, parse_int,
    parse_list, parse_number, parse_port, sanitize,
};
use crate::transport::Sequenced;

const KW_BROADCAST: &str = "B";
const KW_ERROR: &str = "ERROR";

// ── Grid shape ──────────────────────────────────────────────────────

/// Dimensions of the fan array as seen by external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub rows: u32,
    pub columns: u32,
    pub layers: u32,
}

impl GridShape {
    pub fn new(rows: u32, columns: u32, layers: u32) -> Self {
        Self {
            rows,
            columns,
            layers,
        }
    }

    /// Number of cells, i.e. the required length of a grid vector.
    pub fn cells(&self) -> usize {
        let cells = u64::from(self.rows) * u64::from(self.columns) * u64::from(self.layers);
        usize::try_from(cells).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.rows, self.columns, self.layers)
    }
}

// ── State broadcast ─────────────────────────────────────────────────

/// Aggregated feedback vector pushed to external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBroadcast {
    pub seq: Seq,
    /// Port of the Master's external command listener.
    pub listener_port: u16,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub shape: GridShape,
    pub values: Vec<i64>,
}

impl StateBroadcast {
    pub fn encode(&self) -> String {
        format!(
            "{}|{KW_BROADCAST}|{}|{}|{}|{}|{}|{}",
            self.seq,
            self.listener_port,
            self.timestamp_ms,
            self.shape.rows,
            self.shape.columns,
            self.shape.layers,
            join_list(&self.values)
        )
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (seq, fields) = frame::split(bytes)?;
        let [KW_BROADCAST, port, timestamp, rows, columns, layers, values] = fields.as_slice()
        else {
            return Err(DecodeError::Arity {
                expected: "8 broadcast fields",
                got: fields.len() + 1,
            });
        };

        Ok(Self {
            seq,
            listener_port: parse_port("listener_port", port)?,
            timestamp_ms: parse_int("timestamp", timestamp)?,
            shape: GridShape {
                rows: parse_int("rows", rows)?,
                columns: parse_int("columns", columns)?,
                layers: parse_int("layers", layers)?,
            },
            values: parse_list("values", values, parse_int)?,
        })
    }
}

impl Sequenced for StateBroadcast {
    fn seq(&self) -> Seq {
        self.seq
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// A command split into sequence, code and unvalidated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub seq: Seq,
    pub code: String,
    pub args: Vec<String>,
}

impl RawCommand {
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (seq, fields) = frame::split(bytes)?;
        let Some((code, args)) = fields.split_first() else {
            return Err(DecodeError::Arity {
                expected: "at least 2",
                got: 1,
            });
        };
        if code.is_empty() {
            return Err(DecodeError::UnknownKeyword(String::new()));
        }

        Ok(Self {
            seq,
            code: (*code).to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        })
    }
}

impl Sequenced for RawCommand {
    fn seq(&self) -> Seq {
        self.seq
    }
}

/// Every request an external client can make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExternalRequest {
    /// Current aggregated feedback (grid) vector.
    Feedback,
    /// Per-device network addresses.
    Network,
    /// Per-device lifecycle states.
    Slaves,
    /// Full grid of duty cycles, `rows*cols*layers` long.
    DutyCycleVector(Vec<f64>),
    /// One duty cycle for the whole array.
    DutyCycleUniform(f64),
    /// A named attribute of the loaded profile.
    ProfileAttribute(String),
    /// A named, read-only query out of a closed set.
    Eval(String),
    /// Reset the listener's input sequence.
    Reset,
}

impl ExternalRequest {
    /// Wire code; also used as the code of the matching reply.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Feedback => "F",
            Self::Network => "N",
            Self::Slaves => "S",
            Self::DutyCycleVector(_) => "DC-VECTOR",
            Self::DutyCycleUniform(_) => "DC-UNIFORM",
            Self::ProfileAttribute(_) => "PROFILE",
            Self::Eval(_) => "EVAL",
            Self::Reset => "RESET",
        }
    }

    /// Validate the arguments of a [`RawCommand`].
    pub fn from_raw(raw: &RawCommand) -> Result<Self, DecodeError> {
        let args: Vec<&str> = raw.args.iter().map(String::as_str).collect();

        match (raw.code.as_str(), args.as_slice()) {
            ("F" | "GET-F", []) => Ok(Self::Feedback),
            ("N" | "GET-N", []) => Ok(Self::Network),
            ("S" | "GET-S", []) => Ok(Self::Slaves),
            ("RESET", []) => Ok(Self::Reset),
            ("DC-VECTOR" | "SET-DC-VECTOR", [list]) => {
                Ok(Self::DutyCycleVector(parse_list("dc_vector", list, parse_number)?))
            }
            ("DC-UNIFORM" | "SET-DC-UNIFORM", [dc]) => {
                Ok(Self::DutyCycleUniform(parse_number("dc", dc)?))
            }
            ("PROFILE" | "GET-PROFILE-ATTR", [attr]) if !attr.is_empty() => {
                Ok(Self::ProfileAttribute((*attr).to_owned()))
            }
            ("EVAL", [name]) if !name.is_empty() => Ok(Self::Eval((*name).to_owned())),
            (
                "F" | "GET-F" | "N" | "GET-N" | "S" | "GET-S" | "RESET" | "DC-VECTOR"
                | "SET-DC-VECTOR" | "DC-UNIFORM" | "SET-DC-UNIFORM" | "PROFILE"
                | "GET-PROFILE-ATTR" | "EVAL",
                _,
            ) => Err(DecodeError::Arity {
                expected: "code-specific argument count",
                got: args.len() + 2,
            }),
            (other, _) => Err(DecodeError::UnknownKeyword(other.to_owned())),
        }
    }

    /// Render as a command with the given input sequence number.
    pub fn encode(&self, seq: Seq) -> String {
        let code = self.code();
        match self {
            Self::Feedback | Self::Network | Self::Slaves | Self::Reset => format!("{seq}|{code}"),
            Self::DutyCycleVector(dcs) => format!("{seq}|{code}|{}", join_duty_cycles(dcs)),
            Self::DutyCycleUniform(dc) => format!("{seq}|{code}|{}", format_duty_cycle(*dc)),
            Self::ProfileAttribute(name) | Self::Eval(name) => {
                format!("{seq}|{code}|{}", sanitize(name))
            }
        }
    }
}

// ── Replies ─────────────────────────────────────────────────────────

/// Outcome carried by a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyBody {
    Value { code: String, value: String },
    Error(String),
}

/// Reply from the Master's external listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReply {
    pub seq: Seq,
    pub body: ReplyBody,
}

impl ExternalReply {
    pub fn value(seq: Seq, code: &str, value: impl Into<String>) -> Self {
        Self {
            seq,
            body: ReplyBody::Value {
                code: code.to_owned(),
                value: value.into(),
            },
        }
    }

    pub fn error(seq: Seq, message: impl Into<String>) -> Self {
        Self {
            seq,
            body: ReplyBody::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ReplyBody::Error(_))
    }

    pub fn encode(&self) -> String {
        match &self.body {
            ReplyBody::Value { code, value } => {
                format!("{}|{}|{}", self.seq, sanitize(code), sanitize(value))
            }
            ReplyBody::Error(message) => format!("{}|{KW_ERROR}|{}", self.seq, sanitize(message)),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (seq, fields) = frame::split(bytes)?;
        let Some((code, rest)) = fields.split_first() else {
            return Err(DecodeError::Arity {
                expected: "at least 2",
                got: 1,
            });
        };
        let value = rest.join("|");

        let body = if *code == KW_ERROR {
            ReplyBody::Error(value)
        } else {
            ReplyBody::Value {
                code: (*code).to_owned(),
                value,
            }
        };
        Ok(Self { seq, body })
    }
}

impl Sequenced for ExternalReply {
    fn seq(&self) -> Seq {
        self.seq
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(text: &str) -> RawCommand {
        RawCommand::parse(text.as_bytes()).unwrap()
    }

    #[test]
    fn broadcast_wire_form() {
        let b = StateBroadcast {
            seq: 42,
            listener_port: 60169,
            timestamp_ms: 1_700_000_000_000,
            shape: GridShape::new(2, 2, 1),
            values: vec![1000, 1010, -1, 0],
        };
        insta::assert_snapshot!(b.encode(), @"42|B|60169|1700000000000|2|2|1|1000,1010,-1,0");
        assert_eq!(StateBroadcast::decode(b.encode().as_bytes()).unwrap(), b);
    }

    #[test]
    fn request_codes_and_aliases() {
        assert_eq!(ExternalRequest::from_raw(&raw("3|F")).unwrap(), ExternalRequest::Feedback);
        assert_eq!(ExternalRequest::from_raw(&raw("3|GET-N")).unwrap(), ExternalRequest::Network);
        assert_eq!(
            ExternalRequest::from_raw(&raw("3|SET-DC-UNIFORM|0.5")).unwrap(),
            ExternalRequest::DutyCycleUniform(0.5)
        );
        assert_eq!(
            ExternalRequest::from_raw(&raw("3|DC-VECTOR|0.1,0.2")).unwrap(),
            ExternalRequest::DutyCycleVector(vec![0.1, 0.2])
        );
        assert_eq!(
            ExternalRequest::from_raw(&raw("3|PROFILE|name")).unwrap(),
            ExternalRequest::ProfileAttribute("name".into())
        );
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        assert!(ExternalRequest::from_raw(&raw("3|DC-UNIFORM|half")).is_err());
        assert!(ExternalRequest::from_raw(&raw("3|DC-UNIFORM")).is_err());
        assert!(ExternalRequest::from_raw(&raw("3|F|extra")).is_err());
        assert!(matches!(
            ExternalRequest::from_raw(&raw("3|LAUNCH")),
            Err(DecodeError::UnknownKeyword(_))
        ));
    }

    #[test]
    fn raw_command_keeps_sequence_when_args_are_bad() {
        let cmd = raw("17|DC-VECTOR|x,y");
        assert_eq!(cmd.seq, 17);
        assert_eq!(cmd.code, "DC-VECTOR");
    }

    #[test]
    fn request_encoding() {
        insta::assert_snapshot!(ExternalRequest::DutyCycleUniform(0.5).encode(9), @"9|DC-UNIFORM|0.5000");
        insta::assert_snapshot!(ExternalRequest::Reset.encode(0), @"0|RESET");
    }

    #[test]
    fn reply_round_trip_and_sanitizing() {
        let ok = ExternalReply::value(5, "F", "1,2,3");
        assert_eq!(ok.encode(), "5|F|1,2,3");
        assert_eq!(ExternalReply::decode(ok.encode().as_bytes()).unwrap(), ok);

        let err = ExternalReply::error(6, "bad | input");
        assert_eq!(err.encode(), "6|ERROR|bad / input");
        assert!(ExternalReply::decode(err.encode().as_bytes()).unwrap().is_error());
    }
}
