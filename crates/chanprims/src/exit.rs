use std::fmt;
use std::io;

use chanprims_handle::HandleError;
use chanprims_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        TransportError::Parcel(_)
        | TransportError::InvalidMagic
        | TransportError::InvalidDescriptor { .. }
        | TransportError::TransferTooLarge { .. }
        | TransportError::TooManyDescriptors { .. }
        | TransportError::DescriptorMismatch { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn handle_error(context: &str, err: HandleError) -> CliError {
    match err {
        HandleError::TransportCreation(err)
        | HandleError::Duplication(err)
        | HandleError::Encode(err)
        | HandleError::Decode(err) => transport_error(context, err),
        HandleError::Parcel(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        HandleError::InvalidHandle { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_pair_failure_is_transport_error() {
        let err = HandleError::TransportCreation(TransportError::SocketPair {
            name: "x".to_string(),
            source: io::Error::from_raw_os_error(24), // EMFILE
        });
        let cli = handle_error("pair", err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.starts_with("pair: "));
    }

    #[test]
    fn bad_magic_is_data_invalid() {
        let err = HandleError::Decode(TransportError::InvalidMagic);
        assert_eq!(handle_error("transfer", err).code, DATA_INVALID);
    }

    #[test]
    fn timed_out_read_is_timeout() {
        let err = io::Error::new(io::ErrorKind::WouldBlock, "ping");
        assert_eq!(io_error("ping", err).code, TIMEOUT);
    }
}
