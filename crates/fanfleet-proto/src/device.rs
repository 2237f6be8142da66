//! Device protocol: everything exchanged between the Master and a Slave.
//!
//! | message          | wire form                                                  |
//! |------------------|------------------------------------------------------------|
//! | invitation       | `0|<passcode>|<master-listener-port>`                      |
//! | invitation reply | `0|<passcode>|<hw-address>|<feedback-port>|<command-port>`  |
//! | handshake        | `0|HSK|<fb-port>,<cmd-port>,<period-ms>,<params...>`       |
//! | handshake ack    | `<seq>|SHSK`                                               |
//! | poll             | `<seq>|STD|<command-body>`                                 |
//! | data             | `<seq>|STD|<data-index>|<rpm,...>|<dc,...>`                |
//! | terminate        | `<seq>|RIP`                                                |
//!
//! Handshake parameters are space-separated inside the fourth list item:
//! `<fan-mode> <ratio-a> <ratio-b> <active-fans> <pwm-hz> <counter-counts>
//! <pulses-per-rev> <max-rpm> <min-rpm> <min-dc> <tolerance> <max-fan-timeouts>`.

use serde::{Deserialize, Serialize};

use crate::address::MacAddress;
use crate::frame::{
    self, DELIMITER, DecodeError, LIST_DELIMITER, PARAM_DELIMITER, Seq, format_duty_cycle,
    join_duty_cycles, join_list, parse_int, parse_list, parse_number, parse_port,
};
use crate::transport::Sequenced;

const KW_HANDSHAKE: &str = "HSK";
const KW_HANDSHAKE_ACK: &str = "SHSK";
const KW_STANDARD: &str = "STD";
const KW_TERMINATE: &str = "RIP";

const CMD_DUTY_CYCLES: &str = "DC";
const CMD_UNIFORM: &str = "DU";

const HANDSHAKE_PARAM_COUNT: usize = 12;

// ── Configuration carried by the handshake ──────────────────────────

/// How the fans on a Slave are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    /// Every fan is driven and measured independently.
    #[default]
    Single,
    /// Fans are paired; the pair follows `ratio_a : ratio_b`.
    Double,
}

impl FanMode {
    fn code(self) -> &'static str {
        match self {
            Self::Single => "S",
            Self::Double => "D",
        }
    }

    fn from_code(raw: &str) -> Result<Self, DecodeError> {
        match raw {
            "S" => Ok(Self::Single),
            "D" => Ok(Self::Double),
            other => Err(DecodeError::UnknownKeyword(other.to_owned())),
        }
    }
}

/// Fan-level configuration pushed to a Slave on every handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeParams {
    pub fan_mode: FanMode,
    pub ratio_a: f64,
    pub ratio_b: f64,
    pub active_fans: u32,
    pub pwm_hz: u32,
    pub counter_counts: u32,
    pub pulses_per_rev: u32,
    pub max_rpm: u32,
    pub min_rpm: u32,
    pub min_duty_cycle: f64,
    pub rpm_tolerance: f64,
    pub max_fan_timeouts: u32,
}

/// Master→Slave liveness probe; always travels with sequence 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    /// Master-side port the Slave must send feedback to.
    pub feedback_port: u16,
    /// Master-side port commands originate from.
    pub command_port: u16,
    pub period_ms: u32,
    pub params: HandshakeParams,
}

impl Handshake {
    fn encode_body(&self) -> String {
        let p = &self.params;
        let params = [
            p.fan_mode.code().to_owned(),
            p.ratio_a.to_string(),
            p.ratio_b.to_string(),
            p.active_fans.to_string(),
            p.pwm_hz.to_string(),
            p.counter_counts.to_string(),
            p.pulses_per_rev.to_string(),
            p.max_rpm.to_string(),
            p.min_rpm.to_string(),
            format_duty_cycle(p.min_duty_cycle),
            p.rpm_tolerance.to_string(),
            p.max_fan_timeouts.to_string(),
        ]
        .join(" ");

        format!(
            "{}{LIST_DELIMITER}{}{LIST_DELIMITER}{}{LIST_DELIMITER}{params}",
            self.feedback_port, self.command_port, self.period_ms
        )
    }

    fn decode_body(raw: &str) -> Result<Self, DecodeError> {
        let items: Vec<&str> = raw.splitn(4, LIST_DELIMITER).collect();
        let [feedback, command, period, params] = items.as_slice() else {
            return Err(DecodeError::Arity {
                expected: "4 handshake items",
                got: items.len(),
            });
        };

        let params: Vec<&str> = params.split(PARAM_DELIMITER).collect();
        let [
            mode,
            ratio_a,
            ratio_b,
            active,
            pwm,
            counts,
            pulses,
            max_rpm,
            min_rpm,
            min_dc,
            tolerance,
            fan_timeouts,
        ] = params.as_slice()
        else {
            return Err(DecodeError::Arity {
                expected: "12 handshake parameters",
                got: params.len(),
            });
        };
        debug_assert_eq!(params.len(), HANDSHAKE_PARAM_COUNT);

        Ok(Self {
            feedback_port: parse_port("feedback_port", feedback)?,
            command_port: parse_port("command_port", command)?,
            period_ms: parse_int("period_ms", period)?,
            params: HandshakeParams {
                fan_mode: FanMode::from_code(mode)?,
                ratio_a: parse_number("ratio_a", ratio_a)?,
                ratio_b: parse_number("ratio_b", ratio_b)?,
                active_fans: parse_int("active_fans", active)?,
                pwm_hz: parse_int("pwm_hz", pwm)?,
                counter_counts: parse_int("counter_counts", counts)?,
                pulses_per_rev: parse_int("pulses_per_rev", pulses)?,
                max_rpm: parse_int("max_rpm", max_rpm)?,
                min_rpm: parse_int("min_rpm", min_rpm)?,
                min_duty_cycle: parse_number("min_dc", min_dc)?,
                rpm_tolerance: parse_number("tolerance", tolerance)?,
                max_fan_timeouts: parse_int("max_fan_timeouts", fan_timeouts)?,
            },
        })
    }
}

// ── Steady-state payloads ───────────────────────────────────────────

/// Instruction carried by a `STD` poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlaveCommand {
    /// One duty cycle per fan, in fan order.
    DutyCycles(Vec<f64>),
    /// Same duty cycle on every fan.
    Uniform(f64),
}

impl SlaveCommand {
    fn encode_body(&self) -> String {
        match self {
            Self::DutyCycles(dcs) => format!("{CMD_DUTY_CYCLES}{DELIMITER}{}", join_duty_cycles(dcs)),
            Self::Uniform(dc) => format!("{CMD_UNIFORM}{DELIMITER}{}", format_duty_cycle(*dc)),
        }
    }

    fn decode_body(fields: &[&str]) -> Result<Self, DecodeError> {
        match fields {
            [CMD_DUTY_CYCLES, list] => Ok(Self::DutyCycles(parse_list("dc", list, parse_number)?)),
            [CMD_UNIFORM, dc] => Ok(Self::Uniform(parse_number("dc", dc)?)),
            [kw, ..] if *kw == CMD_DUTY_CYCLES || *kw == CMD_UNIFORM => Err(DecodeError::Arity {
                expected: "2 command fields",
                got: fields.len(),
            }),
            [kw, ..] => Err(DecodeError::UnknownKeyword((*kw).to_owned())),
            [] => Err(DecodeError::Arity {
                expected: "a command body",
                got: 0,
            }),
        }
    }
}

/// Feedback reported by a Slave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    /// Freshness index; strictly increasing for new readings.
    pub index: u64,
    pub rpms: Vec<u32>,
    pub duty_cycles: Vec<f64>,
}

// ── Message ─────────────────────────────────────────────────────────

/// Any datagram of the device protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Invitation {
        passcode: String,
        listener_port: u16,
    },
    InvitationReply {
        passcode: String,
        mac: MacAddress,
        feedback_port: u16,
        command_port: u16,
    },
    Handshake(Handshake),
    HandshakeAck {
        seq: Seq,
    },
    Poll {
        seq: Seq,
        command: SlaveCommand,
    },
    Data {
        seq: Seq,
        frame: DataFrame,
    },
    Terminate {
        seq: Seq,
    },
}

impl DeviceMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invitation { .. } => "HELLO",
            Self::InvitationReply { .. } => "HELLO-REPLY",
            Self::Handshake(_) => "HANDSHAKE",
            Self::HandshakeAck { .. } => "HANDSHAKE-ACK",
            Self::Poll { .. } => "POLL",
            Self::Data { .. } => "DATA",
            Self::Terminate { .. } => "TERMINATE",
        }
    }

    /// Render to wire form.
    pub fn encode(&self) -> String {
        match self {
            Self::Invitation {
                passcode,
                listener_port,
            } => format!("0|{passcode}|{listener_port}"),
            Self::InvitationReply {
                passcode,
                mac,
                feedback_port,
                command_port,
            } => format!("0|{passcode}|{mac}|{feedback_port}|{command_port}"),
            Self::Handshake(hsk) => format!("0|{KW_HANDSHAKE}|{}", hsk.encode_body()),
            Self::HandshakeAck { seq } => format!("{seq}|{KW_HANDSHAKE_ACK}"),
            Self::Poll { seq, command } => format!("{seq}|{KW_STANDARD}|{}", command.encode_body()),
            Self::Data { seq, frame } => format!(
                "{seq}|{KW_STANDARD}|{}|{}|{}",
                frame.index,
                join_list(&frame.rpms),
                join_duty_cycles(&frame.duty_cycles)
            ),
            Self::Terminate { seq } => format!("{seq}|{KW_TERMINATE}"),
        }
    }

    /// Parse a raw datagram. Never panics; any defect yields a `DecodeError`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (seq, fields) = frame::split(bytes)?;

        match fields.as_slice() {
            [KW_HANDSHAKE, body] => Ok(Self::Handshake(Handshake::decode_body(body)?)),
            [KW_HANDSHAKE_ACK] => Ok(Self::HandshakeAck { seq }),
            [KW_TERMINATE] => Ok(Self::Terminate { seq }),
            [KW_STANDARD, index, rpms, dcs] => Ok(Self::Data {
                seq,
                frame: DataFrame {
                    index: parse_int("data_index", index)?,
                    rpms: parse_list("rpm", rpms, parse_int)?,
                    duty_cycles: parse_list("dc", dcs, parse_number)?,
                },
            }),
            [KW_STANDARD, body @ ..] => Ok(Self::Poll {
                seq,
                command: SlaveCommand::decode_body(body)?,
            }),
            [kw, ..] if is_keyword(kw) => Err(DecodeError::Arity {
                expected: "keyword-specific field count",
                got: fields.len() + 1,
            }),
            [passcode, port] => Ok(Self::Invitation {
                passcode: (*passcode).to_owned(),
                listener_port: parse_port("listener_port", port)?,
            }),
            [passcode, mac, feedback, command] => Ok(Self::InvitationReply {
                passcode: (*passcode).to_owned(),
                mac: MacAddress::parse(mac)?,
                feedback_port: parse_port("feedback_port", feedback)?,
                command_port: parse_port("command_port", command)?,
            }),
            _ => Err(DecodeError::Arity {
                expected: "3 to 5",
                got: fields.len() + 1,
            }),
        }
    }
}

impl Sequenced for DeviceMessage {
    fn seq(&self) -> Seq {
        match self {
            Self::Invitation { .. } | Self::InvitationReply { .. } | Self::Handshake(_) => 0,
            Self::HandshakeAck { seq }
            | Self::Poll { seq, .. }
            | Self::Data { seq, .. }
            | Self::Terminate { seq } => *seq,
        }
    }
}

fn is_keyword(field: &str) -> bool {
    matches!(
        field,
        KW_HANDSHAKE | KW_HANDSHAKE_ACK | KW_STANDARD | KW_TERMINATE
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> HandshakeParams {
        HandshakeParams {
            fan_mode: FanMode::Single,
            ratio_a: 1.0,
            ratio_b: 1.0,
            active_fans: 21,
            pwm_hz: 25_000,
            counter_counts: 2,
            pulses_per_rev: 2,
            max_rpm: 16_000,
            min_rpm: 1_200,
            min_duty_cycle: 0.1,
            rpm_tolerance: 0.05,
            max_fan_timeouts: 1,
        }
    }

    #[test]
    fn handshake_wire_form() {
        let msg = DeviceMessage::Handshake(Handshake {
            feedback_port: 40001,
            command_port: 40002,
            period_ms: 100,
            params: params(),
        });
        insta::assert_snapshot!(
            msg.encode(),
            @"0|HSK|40001,40002,100,S 1 1 21 25000 2 2 16000 1200 0.1000 0.05 1"
        );
    }

    #[test]
    fn handshake_decodes_back() {
        let msg = DeviceMessage::Handshake(Handshake {
            feedback_port: 40001,
            command_port: 40002,
            period_ms: 100,
            params: params(),
        });
        assert_eq!(DeviceMessage::decode(msg.encode().as_bytes()).unwrap(), msg);
    }

    #[test]
    fn decodes_invitation_and_reply() {
        assert_eq!(
            DeviceMessage::decode(b"0|secret|5001").unwrap(),
            DeviceMessage::Invitation {
                passcode: "secret".into(),
                listener_port: 5001,
            }
        );

        let reply = DeviceMessage::decode(b"0|secret|AA:BB:CC:DD:EE:FF|6001|6002").unwrap();
        assert_eq!(
            reply,
            DeviceMessage::InvitationReply {
                passcode: "secret".into(),
                mac: MacAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
                feedback_port: 6001,
                command_port: 6002,
            }
        );
    }

    #[test]
    fn reply_with_short_address_is_invalid() {
        let err = DeviceMessage::decode(b"0|secret|AA:BB:CC:DD:EE|6001|6002").unwrap_err();
        assert!(matches!(err, DecodeError::BadAddress { .. }));
    }

    #[test]
    fn reply_with_out_of_range_port_is_invalid() {
        let err = DeviceMessage::decode(b"0|secret|AA:BB:CC:DD:EE:FF|0|6002").unwrap_err();
        assert!(matches!(err, DecodeError::BadPort { .. }));
        let err = DeviceMessage::decode(b"0|secret|AA:BB:CC:DD:EE:FF|6001|70000").unwrap_err();
        assert!(matches!(err, DecodeError::BadPort { .. }));
    }

    #[test]
    fn decodes_data_frame() {
        let msg = DeviceMessage::decode(b"7|STD|3|1000,2000|0.5,0.25").unwrap();
        assert_eq!(
            msg,
            DeviceMessage::Data {
                seq: 7,
                frame: DataFrame {
                    index: 3,
                    rpms: vec![1000, 2000],
                    duty_cycles: vec![0.5, 0.25],
                },
            }
        );
        assert_eq!(msg.seq(), 7);
    }

    #[test]
    fn poll_round_trips_both_command_forms() {
        let poll = DeviceMessage::Poll {
            seq: 4,
            command: SlaveCommand::DutyCycles(vec![0.5, 1.0]),
        };
        insta::assert_snapshot!(poll.encode(), @"4|STD|DC|0.5000,1.0000");
        assert_eq!(DeviceMessage::decode(poll.encode().as_bytes()).unwrap(), poll);

        let poll = DeviceMessage::Poll {
            seq: 5,
            command: SlaveCommand::Uniform(0.3),
        };
        insta::assert_snapshot!(poll.encode(), @"5|STD|DU|0.3000");
    }

    #[test]
    fn ack_and_terminate() {
        assert_eq!(
            DeviceMessage::decode(b"1|SHSK").unwrap(),
            DeviceMessage::HandshakeAck { seq: 1 }
        );
        assert_eq!(
            DeviceMessage::decode(b"9|RIP").unwrap(),
            DeviceMessage::Terminate { seq: 9 }
        );
    }

    #[test]
    fn keyword_with_wrong_arity_is_invalid() {
        assert!(DeviceMessage::decode(b"1|SHSK|extra").is_err());
        assert!(DeviceMessage::decode(b"1|RIP|extra").is_err());
        assert!(DeviceMessage::decode(b"1|STD|3|1,2").is_err());
    }

    #[test]
    fn non_integer_rpm_is_invalid() {
        let err = DeviceMessage::decode(b"2|STD|1|100,abc|0.5,0.5").unwrap_err();
        assert!(matches!(err, DecodeError::BadInteger { field: "rpm", .. }));
    }
}
