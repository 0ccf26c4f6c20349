use std::thread;
use std::time::Duration;

use chanprims_handle::{open_pair_with_config, read_handle, write_handle, Handle};
use chanprims_parcel::Parcel;
use chanprims_transport::{IpcStream, ParcelTransport, SocketKind, TransferConfig};
use tracing::{debug, info};

use crate::cmd::{recv_ping, send_ping, TransferArgs, PING};
use crate::exit::{
    handle_error, io_error, transport_error, CliError, CliResult, DATA_INVALID, FAILURE, INTERNAL,
    SUCCESS,
};
use crate::output::{print_report, ChannelReport, EndReport, OutputFormat, PingReport};

const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(args: TransferArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.channel.config()?;
    let (local, peer) = open_pair_with_config(&args.channel.name, &config)
        .map_err(|err| handle_error("open pair", err))?;
    let token = local
        .connection_token()
        .map_err(|err| handle_error("token", err))?;

    let (tx, rx) =
        IpcStream::pair_of(SocketKind::Stream).map_err(|err| io_error("transfer socket", err))?;
    let transfer_config = TransferConfig {
        read_timeout: Some(TRANSFER_TIMEOUT),
        write_timeout: Some(TRANSFER_TIMEOUT),
        ..TransferConfig::default()
    };
    let mut sender = ParcelTransport::with_config(tx, transfer_config.clone())
        .map_err(|err| transport_error("transfer socket", err))?;
    let mut receiver = ParcelTransport::with_config(rx, transfer_config)
        .map_err(|err| transport_error("transfer socket", err))?;

    let receiver_thread = thread::spawn(move || receive_and_echo(&mut receiver));

    let mut parcel = Parcel::new();
    write_handle(&mut parcel, Some(&local)).map_err(|err| handle_error("serialize", err))?;
    let parcel_bytes = parcel.data_size();
    sender
        .send(&parcel)
        .map_err(|err| transport_error("send parcel", err))?;
    drop(parcel);
    // The receiver's copy must keep working once every local descriptor is gone.
    local.dispose();
    info!(name = %args.channel.name, %token, parcel_bytes, "sent channel handle");

    send_ping(&peer, PING)?;
    let echoed = recv_ping(&peer, PING.len())?;
    let received = receiver_thread
        .join()
        .map_err(|_| CliError::new(INTERNAL, "receiver thread panicked"))??;

    let delivered = echoed == PING;
    let identity_preserved = received
        .connection_token()
        .map_err(|err| handle_error("token", err))?
        == token;

    let report = ChannelReport {
        schema_id: "https://schemas.chanprims.dev/cli/v1/transfer-report.schema.json",
        command: "transfer",
        name: args.channel.name,
        kind: config.kind.as_str(),
        token: token.to_string(),
        ends: vec![
            EndReport::of("sender", &local),
            EndReport::of("received", &received),
            EndReport::of("peer", &peer),
        ],
        ping: PingReport {
            bytes: echoed.len(),
            delivered,
        },
        hook_fired: None,
        identity_preserved: Some(identity_preserved),
        parcel_bytes: Some(parcel_bytes),
    };
    print_report(&report, format);

    Ok(if delivered && identity_preserved {
        SUCCESS
    } else {
        FAILURE
    })
}

fn receive_and_echo(transport: &mut ParcelTransport) -> CliResult<Handle> {
    let mut parcel = transport
        .recv()
        .map_err(|err| transport_error("receive parcel", err))?;
    let handle = read_handle(&mut parcel)
        .map_err(|err| handle_error("deserialize", err))?
        .ok_or_else(|| CliError::new(DATA_INVALID, "parcel carried no channel"))?;
    debug!(fds = parcel.fd_count(), "received channel handle");

    let ping = recv_ping(&handle, PING.len())?;
    send_ping(&handle, &ping)?;
    Ok(handle)
}
