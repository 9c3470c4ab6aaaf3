use std::{fmt, io, path::PathBuf, time::Duration};

/// Direction of a single relay copy task, as reported in [`TunnelError::Relay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LocalToRemote => f.write_str("local -> remote"),
            Direction::RemoteToLocal => f.write_str("remote -> local"),
        }
    }
}

/// Every failure the tunnel can produce.
///
/// Configuration and bootstrap errors are returned synchronously by
/// [`start`](crate::start). Everything else is delivered on the
/// [`ErrorSink`](crate::ErrorSink) while the tunnel runs.
#[derive(thiserror::Error, Debug)]
pub enum TunnelError {
    #[error("config cannot be missing")]
    ConfigMissing,
    #[error("only 1 jump host is supported, got {0}")]
    TooManyJumpHosts(usize),
    #[error("host credential cannot be missing")]
    CredentialMissing,
    #[error("user cannot be empty")]
    UserEmpty,
    #[error("address cannot be empty")]
    AddressEmpty,
    #[error("either a private key file or a password has to be set")]
    NoAuthMethod,
    #[error("local address and remote address have to be set")]
    AddressesUnset,
    #[error("buffer size must be greater than zero")]
    BufferSizeZero,
    #[error("invalid address '{0}', expected host:port")]
    InvalidAddress(String),

    #[error("failed to read private key file '{}'", path.display())]
    KeyFileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse private key from file '{}'", path.display())]
    KeyFileParse {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },
    #[error("authentication rejected by {address} for user '{user}'")]
    AuthenticationRejected { address: String, user: String },
    #[error("ssh dial to jump host {address} failed")]
    JumpHostDialFailed {
        address: String,
        #[source]
        source: Box<TunnelError>,
    },
    #[error("ssh dial from jump host to end host {address} timed out after {timeout:?}")]
    JumpToEndDialTimeout { address: String, timeout: Duration },
    #[error("ssh dial from jump host to end host {address} failed")]
    JumpToEndDialFailed {
        address: String,
        #[source]
        source: russh::Error,
    },
    #[error("ssh dial directly to end host {address} failed")]
    EndHostDialFailed {
        address: String,
        #[source]
        source: Box<TunnelError>,
    },
    #[error("failed to create ssh session to end host {address} through jump host")]
    EndHostUpgradeFailed {
        address: String,
        #[source]
        source: Box<TunnelError>,
    },
    #[error("failed to listen on local address {address}")]
    ListenFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    // Leaf causes wrapped by the dial errors above.
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error("failed to connect on end host to remote address {address}")]
    ChannelOpenFailed {
        address: String,
        #[source]
        source: russh::Error,
    },
    #[error("failed to accept local connection")]
    AcceptFailed(#[source] io::Error),
    #[error("failed to prepare local connection from {peer}")]
    ConnectionSetup {
        peer: String,
        #[source]
        source: io::Error,
    },
    #[error("copy {direction} failed")]
    Relay {
        direction: Direction,
        #[source]
        source: io::Error,
    },
}

impl TunnelError {
    /// Whether this error ended the accept loop.
    ///
    /// Per-connection failures (socket setup and relay errors) leave the tunnel
    /// running; channel-open and accept failures stop it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TunnelError::ConnectionSetup { .. } | TunnelError::Relay { .. }
        )
    }
}
