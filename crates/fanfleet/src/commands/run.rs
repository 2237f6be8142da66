use chrono::Local;
use fanfleet_core::{FleetEvent, Master};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::error::CliError;
use crate::output;

use super::load_config;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = load_config(global)?;
    if args.auto_approve {
        cfg.auto_approve = true;
    }
    if args.no_external {
        cfg.external.enabled = false;
    }

    let master = Master::new(cfg.to_master_config()?);
    let mut events = master.events();
    master.start().await?;

    if let Some(addr) = master.listener_addr().await {
        info!(listener = %addr, "discovery listening");
    }
    if let Some(addr) = master.external_addr().await {
        info!(listener = %addr, "external control listening");
    }

    let color = output::should_color(global.color);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = events.recv() => match received {
                Ok(event) => {
                    drain_feedback(&master, &event);
                    if let Some(line) = format_event(&event, global.output, color) {
                        output::print_output(&line, global.quiet);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    master.shutdown().await;
    Ok(())
}

/// Take the reading an update announced, so the device's inbound
/// mailbox only reports drops under real backlog.
fn drain_feedback(master: &Master, event: &FleetEvent) {
    if let FleetEvent::FeedbackUpdated { mac, .. } = event {
        let _ = master.take_feedback(mac);
    }
}

/// One event per line. Human formats skip per-cycle feedback updates.
fn format_event(event: &FleetEvent, format: OutputFormat, color: bool) -> Option<String> {
    if matches!(format, OutputFormat::Json | OutputFormat::JsonCompact) {
        return Some(output::render_json(event, true));
    }
    if matches!(format, OutputFormat::Yaml) {
        return Some(output::render_single(format, event, |_| String::new()));
    }

    let now = Local::now().format("%H:%M:%S");
    let text = match event {
        FleetEvent::DeviceDiscovered { index, mac, ip } => {
            format!("discovered {mac} at {ip} (#{index})")
        }
        FleetEvent::StateChanged { mac, from, to, .. } => format!(
            "{mac} {} -> {}",
            output::paint_state(*from, color),
            output::paint_state(*to, color)
        ),
        FleetEvent::FeedbackUpdated { .. } => return None,
        FleetEvent::ConnectionLost { mac, timeouts, .. } => {
            format!("{mac} lost after {timeouts} missed cycles")
        }
        FleetEvent::ServiceFailed { service, reason } => format!("{service} failed: {reason}"),
    };
    Some(format!("{now} {text}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fanfleet_core::{MacAddress, SlaveState};

    fn changed() -> FleetEvent {
        FleetEvent::StateChanged {
            index: 0,
            mac: MacAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
            from: SlaveState::Known,
            to: SlaveState::Connected,
        }
    }

    #[test]
    fn human_line_names_both_states() {
        let line = format_event(&changed(), OutputFormat::Table, false).unwrap();
        assert!(line.ends_with("aa:bb:cc:dd:ee:ff KNOWN -> CONNECTED"), "{line}");
    }

    #[test]
    fn json_line_is_tagged() {
        let line = format_event(&changed(), OutputFormat::Json, false).unwrap();
        assert!(line.starts_with("{\"event\":\"state_changed\""), "{line}");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn feedback_updates_are_quiet_in_tables() {
        let event = FleetEvent::FeedbackUpdated {
            index: 0,
            mac: MacAddress::parse("aa:bb:cc:dd:ee:ff").unwrap(),
            data_index: 9,
        };
        assert!(format_event(&event, OutputFormat::Plain, false).is_none());
        assert!(format_event(&event, OutputFormat::JsonCompact, false).is_some());
    }
}
