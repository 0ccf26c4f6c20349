use chanprims_transport::{ChannelConfig, DuplexChannel};

use crate::error::{HandleError, Result};
use crate::handle::Handle;

/// Open a connected channel pair and wrap each end in its own handle.
pub fn open_pair(name: &str) -> Result<(Handle, Handle)> {
    open_pair_with_config(name, &ChannelConfig::default())
}

/// Open a connected channel pair with explicit socket configuration.
///
/// Either both handles are returned or neither is; on failure any socket that
/// was created is closed before the error is returned.
pub fn open_pair_with_config(name: &str, config: &ChannelConfig) -> Result<(Handle, Handle)> {
    let (server, client) = DuplexChannel::open_pair_with_config(name, config)
        .map_err(HandleError::TransportCreation)?;
    Ok((Handle::new(server), Handle::new(client)))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use chanprims_transport::SocketKind;

    use super::*;

    #[test]
    fn both_ends_report_the_pair_name() {
        let (a, b) = open_pair("x").unwrap();
        assert_eq!(a.name().unwrap(), "x");
        assert_eq!(b.name().unwrap(), "x");
        assert_eq!(a.connection_token().unwrap(), b.connection_token().unwrap());
    }

    #[test]
    fn ends_are_connected() {
        let (a, b) = open_pair("connected").unwrap();
        a.with_channel("write", |channel| {
            let mut writer = channel;
            writer.write_all(b"ping").unwrap();
        })
        .unwrap();

        let mut buf = [0u8; 4];
        b.with_channel("read", |channel| {
            let mut reader = channel;
            reader.read_exact(&mut buf).unwrap();
        })
        .unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn separate_pairs_have_distinct_tokens() {
        let (a, _) = open_pair("same name").unwrap();
        let (c, _) = open_pair("same name").unwrap();
        assert_ne!(a.connection_token().unwrap(), c.connection_token().unwrap());
    }

    #[test]
    fn creation_failure_is_transport_creation_error() {
        let config = ChannelConfig {
            kind: SocketKind::Stream,
            socket_buffer_size: usize::MAX,
        };
        let err = open_pair_with_config("broken", &config).unwrap_err();
        assert!(matches!(err, HandleError::TransportCreation(_)));
        assert!(err.to_string().contains("broken"));
    }
}
