use std::time::Duration;

use fanfleet_core::{ExternalClient, ExternalRequest};
use fanfleet_proto::{RawCommand, ReplyBody};
use serde::Serialize;

use crate::cli::{CtlArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct ReplyView {
    seq: u64,
    code: String,
    value: String,
}

/// Parse the command locally, so argument mistakes never reach the wire.
fn parse_request(args: &CtlArgs) -> Result<ExternalRequest, CliError> {
    let raw = RawCommand {
        seq: 0,
        code: args.code.to_ascii_uppercase(),
        args: args.args.clone(),
    };
    ExternalRequest::from_raw(&raw).map_err(|e| CliError::Validation {
        field: "command".into(),
        reason: e.to_string(),
    })
}

pub async fn handle(args: CtlArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let request = parse_request(&args)?;
    let timeout = Duration::from_millis(args.timeout_ms);

    let mut client = ExternalClient::connect(args.target, timeout).await?;
    let reply = client.request(&request).await?;

    match reply.body {
        ReplyBody::Error(message) => Err(CliError::Rejected { message }),
        ReplyBody::Value { code, value } => {
            let view = ReplyView {
                seq: reply.seq,
                code,
                value,
            };
            let out = output::render_single(global.output, &view, |v| v.value.clone());
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
