use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chanprims_handle::open_pair_with_config;
use tracing::info;

use crate::cmd::{recv_ping, send_ping, DupArgs, PING};
use crate::exit::{handle_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_report, ChannelReport, EndReport, OutputFormat, PingReport};

pub fn run(args: DupArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.channel.config()?;
    let (original, peer) = open_pair_with_config(&args.channel.name, &config)
        .map_err(|err| handle_error("open pair", err))?;
    let token = original
        .connection_token()
        .map_err(|err| handle_error("token", err))?;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    original.register_disposal_hook(Box::new(move |channel| {
        info!(name = channel.name(), "disposal hook ran");
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let copy = original
        .duplicate()
        .map_err(|err| handle_error("duplicate", err))?;
    original.dispose();
    original.dispose();

    send_ping(&copy, PING)?;
    let received = recv_ping(&peer, PING.len())?;
    let delivered = received == PING;
    let identity_preserved = copy
        .connection_token()
        .map_err(|err| handle_error("token", err))?
        == token;
    let hook_fired = fired.load(Ordering::SeqCst);

    let report = ChannelReport {
        schema_id: "https://schemas.chanprims.dev/cli/v1/dup-report.schema.json",
        command: "dup",
        name: args.channel.name,
        kind: config.kind.as_str(),
        token: token.to_string(),
        ends: vec![
            EndReport::of("original", &original),
            EndReport::of("duplicate", &copy),
            EndReport::of("peer", &peer),
        ],
        ping: PingReport {
            bytes: received.len(),
            delivered,
        },
        hook_fired: Some(hook_fired),
        identity_preserved: Some(identity_preserved),
        parcel_bytes: None,
    };
    print_report(&report, format);

    let ok = delivered && identity_preserved && hook_fired == 1;
    Ok(if ok { SUCCESS } else { FAILURE })
}
