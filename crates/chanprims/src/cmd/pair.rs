use chanprims_handle::open_pair_with_config;
use tracing::info;

use crate::cmd::{recv_ping, send_ping, PairArgs, PING};
use crate::exit::{handle_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_report, ChannelReport, EndReport, OutputFormat, PingReport};

pub fn run(args: PairArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.channel.config()?;
    let (server, client) = open_pair_with_config(&args.channel.name, &config)
        .map_err(|err| handle_error("open pair", err))?;
    let token = server
        .connection_token()
        .map_err(|err| handle_error("token", err))?;
    info!(name = %args.channel.name, %token, kind = config.kind.as_str(), "opened channel pair");

    send_ping(&server, PING)?;
    let received = recv_ping(&client, PING.len())?;
    let delivered = received == PING;

    let report = ChannelReport {
        schema_id: "https://schemas.chanprims.dev/cli/v1/pair-report.schema.json",
        command: "pair",
        name: args.channel.name,
        kind: config.kind.as_str(),
        token: token.to_string(),
        ends: vec![
            EndReport::of("server", &server),
            EndReport::of("client", &client),
        ],
        ping: PingReport {
            bytes: received.len(),
            delivered,
        },
        hook_fired: None,
        identity_preserved: None,
        parcel_bytes: None,
    };
    print_report(&report, format);

    Ok(if delivered { SUCCESS } else { FAILURE })
}
