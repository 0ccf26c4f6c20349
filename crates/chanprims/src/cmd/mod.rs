use std::io::{Read, Write};
use std::time::Duration;

use chanprims_handle::{ChannelConfig, Handle};
use chanprims_transport::{SocketKind, DEFAULT_SOCKET_BUFFER_SIZE};
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{handle_error, io_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod dup;
pub mod pair;
pub mod transfer;
pub mod version;

pub(crate) const PING: &[u8] = b"ping";
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a channel pair and send a ping across it.
    Pair(PairArgs),
    /// Duplicate one end, dispose the original, and ping through the copy.
    Dup(DupArgs),
    /// Ship one end through a parcel to another thread and ping it there.
    Transfer(TransferArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Pair(args) => pair::run(args, format),
        Command::Dup(args) => dup::run(args, format),
        Command::Transfer(args) => transfer::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum KindArg {
    Stream,
    Seqpacket,
}

impl From<KindArg> for SocketKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Stream => SocketKind::Stream,
            KindArg::Seqpacket => SocketKind::SeqPacket,
        }
    }
}

#[derive(Args, Debug)]
pub struct ChannelArgs {
    /// Channel name (shared by both ends).
    pub name: String,
    /// Socket send/receive buffer size in bytes.
    #[arg(long, default_value_t = DEFAULT_SOCKET_BUFFER_SIZE)]
    pub buffer_size: usize,
    /// Socket kind. Default: seqpacket on Linux, stream elsewhere.
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,
}

impl ChannelArgs {
    pub fn config(&self) -> CliResult<ChannelConfig> {
        if self.buffer_size == 0 {
            return Err(CliError::new(USAGE, "--buffer-size must be greater than 0"));
        }
        Ok(ChannelConfig {
            kind: self
                .kind
                .map(SocketKind::from)
                .unwrap_or_else(SocketKind::platform_default),
            socket_buffer_size: self.buffer_size,
        })
    }
}

#[derive(Args, Debug)]
pub struct PairArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,
}

#[derive(Args, Debug)]
pub struct DupArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

/// Write `payload` through `from`.
pub(crate) fn send_ping(from: &Handle, payload: &[u8]) -> CliResult<()> {
    from.with_channel("ping", |channel| {
        let mut writer = channel;
        writer.write_all(payload)
    })
    .map_err(|err| handle_error("ping", err))?
    .map_err(|err| io_error("ping write", err))
}

/// Read exactly `len` bytes from `to`, giving up after the ping timeout.
pub(crate) fn recv_ping(to: &Handle, len: usize) -> CliResult<Vec<u8>> {
    to.with_channel("ping", |channel| -> CliResult<Vec<u8>> {
        channel
            .stream()
            .set_read_timeout(Some(PING_TIMEOUT))
            .map_err(|err| transport_error("ping timeout", err))?;
        let mut buf = vec![0u8; len];
        let mut reader = channel;
        reader
            .read_exact(&mut buf)
            .map_err(|err| io_error("ping read", err))?;
        Ok(buf)
    })
    .map_err(|err| handle_error("ping", err))?
}
