// ── External command handling ──
//
// Turns one received datagram into at most one reply. Every failure
// past the idempotency window becomes an `ERROR` reply, so no command
// can stop the listener.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use fanfleet_proto::{ExternalReply, ExternalRequest, RawCommand, ReplyBody, Seq};
use tracing::{debug, warn};

use super::ExternalCounters;
use super::window::{IdempotencyWindow, Verdict};
use crate::config::MasterConfig;
use crate::error::CoreError;
use crate::fleet::Fleet;
use crate::model::SlaveState;

/// Placeholder for a device without a known address.
const NO_ADDRESS: &str = "-";

pub(crate) struct CommandHandler {
    fleet: Arc<Fleet>,
    counters: Arc<ExternalCounters>,
    window: IdempotencyWindow,
    out_seq: Seq,
}

impl CommandHandler {
    pub(crate) fn new(fleet: Arc<Fleet>, counters: Arc<ExternalCounters>, delta: Seq) -> Self {
        Self {
            fleet,
            counters,
            window: IdempotencyWindow::new(delta),
            out_seq: 0,
        }
    }

    /// Process one datagram. `None` means nothing should be sent back.
    pub(crate) fn on_datagram(&mut self, bytes: &[u8]) -> Option<ExternalReply> {
        if bytes.iter().all(|b| b.is_ascii_whitespace() || *b == 0) {
            return None;
        }

        let raw = match RawCommand::parse(bytes) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "malformed external command");
                return Some(self.reply(ReplyBody::Error(e.to_string())));
            }
        };

        match self.window.check(raw.seq) {
            Verdict::Duplicate => {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(seq = raw.seq, last = self.window.last(), "dropping repeated external command");
                return None;
            }
            Verdict::Reset => debug!("external input sequence reset by sequence 0"),
            Verdict::Accept => {}
        }

        let outcome = ExternalRequest::from_raw(&raw)
            .map_err(CoreError::from)
            .and_then(|request| {
                let value = self.dispatch(&request)?;
                Ok((request.code(), value))
            });
        self.counters
            .listener_last
            .store(self.window.last(), Ordering::Relaxed);

        let body = match outcome {
            Ok((code, value)) => ReplyBody::Value {
                code: code.to_owned(),
                value,
            },
            Err(e) => {
                warn!(code = %raw.code, error = %e, "external command failed");
                ReplyBody::Error(e.to_string())
            }
        };
        Some(self.reply(body))
    }

    fn reply(&mut self, body: ReplyBody) -> ExternalReply {
        self.out_seq += 1;
        self.counters
            .listener_seq
            .store(self.out_seq, Ordering::Relaxed);
        ExternalReply {
            seq: self.out_seq,
            body,
        }
    }

    fn dispatch(&mut self, request: &ExternalRequest) -> Result<String, CoreError> {
        let fleet = &self.fleet;

        match request {
            ExternalRequest::Feedback => Ok(join(&fleet.feedback_grid())),
            ExternalRequest::Network => {
                let addresses: Vec<String> = fleet
                    .registry
                    .snapshot()
                    .iter()
                    .map(|d| d.ip.map_or_else(|| NO_ADDRESS.to_owned(), |ip| ip.to_string()))
                    .collect();
                Ok(addresses.join(","))
            }
            ExternalRequest::Slaves => {
                let states: Vec<String> = fleet
                    .registry
                    .snapshot()
                    .iter()
                    .map(|d| d.state.to_string())
                    .collect();
                Ok(states.join(","))
            }
            ExternalRequest::DutyCycleVector(grid) => {
                fleet.set_duty_cycles(grid).map(|n| n.to_string())
            }
            ExternalRequest::DutyCycleUniform(dc) => {
                fleet.set_uniform_duty_cycle(*dc).map(|n| n.to_string())
            }
            ExternalRequest::ProfileAttribute(name) => profile_attribute(&fleet.config, name),
            ExternalRequest::Eval(name) => self.eval(name),
            ExternalRequest::Reset => {
                self.window.reset();
                Ok("0".into())
            }
        }
    }

    /// Closed set of read-only queries.
    fn eval(&self, name: &str) -> Result<String, CoreError> {
        let snapshot = self.fleet.registry.snapshot();
        let value = match name {
            "devices" => snapshot.len().to_string(),
            "connected" => snapshot
                .iter()
                .filter(|d| d.state == SlaveState::Connected)
                .count()
                .to_string(),
            "broadcast-seq" => self.counters.broadcast_seq.load(Ordering::Relaxed).to_string(),
            "listener-seq" => self.out_seq.to_string(),
            "listener-last" => self.window.last().to_string(),
            other => {
                return Err(CoreError::UnknownQuery {
                    name: other.to_owned(),
                });
            }
        };
        Ok(value)
    }
}

fn profile_attribute(config: &MasterConfig, name: &str) -> Result<String, CoreError> {
    let fans = &config.fans;
    let value = match name {
        "name" => config.profile_name.clone(),
        "dimensions" => config.shape.to_string(),
        "rows" => config.shape.rows.to_string(),
        "columns" => config.shape.columns.to_string(),
        "layers" => config.shape.layers.to_string(),
        "slaves" => config.slaves.len().to_string(),
        "max_fans" => config.max_fans.to_string(),
        "period_ms" => config.timing.period.as_millis().to_string(),
        "max_timeouts" => config.timing.max_timeouts.to_string(),
        "fan_mode" => match fans.fan_mode {
            fanfleet_proto::FanMode::Single => "single".into(),
            fanfleet_proto::FanMode::Double => "double".into(),
        },
        "pwm_hz" => fans.pwm_hz.to_string(),
        "max_rpm" => fans.max_rpm.to_string(),
        "min_rpm" => fans.min_rpm.to_string(),
        "min_dc" => fans.min_duty_cycle.to_string(),
        other => {
            return Err(CoreError::UnknownAttribute {
                name: other.to_owned(),
            });
        }
    };
    Ok(value)
}

fn join(values: &[i64]) -> String {
    let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
    parts.join(",")
}
