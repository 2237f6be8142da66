use std::sync::Arc;
use std::time::Duration;

use fanfleet_core::{DeviceSnapshot, Master};
use tabled::Tabled;

use crate::cli::{DiscoverArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::load_config;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Feedback")]
    feedback_port: String,
    #[tabled(rename = "Command")]
    command_port: String,
    #[tabled(rename = "State")]
    state: String,
}

fn to_row(device: &Arc<DeviceSnapshot>, color: bool) -> DeviceRow {
    let port = |p: Option<u16>| p.map_or_else(|| "-".into(), |p| p.to_string());
    DeviceRow {
        index: device.index,
        mac: device.mac.to_string(),
        ip: device.ip.map_or_else(|| "-".into(), |ip| ip.to_string()),
        feedback_port: port(device.feedback_port),
        command_port: port(device.command_port),
        state: output::paint_state(device.state, color),
    }
}

/// Run discovery alone: no external control, no approvals, no
/// preconfigured slaves, so nothing gets connected.
pub async fn handle(args: DiscoverArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = load_config(global)?;
    cfg.external.enabled = false;
    cfg.auto_approve = false;
    cfg.slaves.clear();

    let master = Master::new(cfg.to_master_config()?);
    master.start().await?;

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    let devices = master.devices_snapshot();
    master.shutdown().await;

    let color = output::should_color(global.color);
    let out = output::render_list(
        global.output,
        devices.as_slice(),
        |d| to_row(d, color),
        |d| d.mac.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
