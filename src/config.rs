use std::{fmt, path::PathBuf, time::Duration};

use bon::Builder;
use clap::Parser;

use crate::address::Destination;

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(8);
pub(crate) const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Connection identity of a single SSH endpoint.
///
/// At least one of `private_key_file` and `password` must be set. If both are,
/// the key file wins.
#[derive(Clone, Default, Builder)]
pub struct HostCredential {
    /// Network address of the SSH server, as `host:port`.
    #[builder(into)]
    pub address: String,
    #[builder(into)]
    pub user: String,
    #[builder(into)]
    pub private_key_file: Option<PathBuf>,
    #[builder(into)]
    pub password: Option<String>,
}

impl HostCredential {
    // Empty values are treated the same as missing ones.
    pub(crate) fn key_file(&self) -> Option<&PathBuf> {
        self.private_key_file
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password
            .as_deref()
            .filter(|password| !password.is_empty())
    }
}

impl fmt::Debug for HostCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredential")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("private_key_file", &self.private_key_file)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Full definition of one tunnel.
#[derive(Debug, Clone, Builder)]
pub struct TunnelSpec {
    /// Zero or one jump hosts to go through before reaching the end host.
    #[builder(default)]
    pub jump_hosts: Vec<HostCredential>,
    /// Host on which the remote service runs.
    pub end_host: Option<HostCredential>,
    /// Local address to listen on.
    #[builder(into)]
    pub local_address: String,
    /// Address of the remote service, as seen from the end host.
    #[builder(into)]
    pub remote_address: String,
    /// Upper bound for each SSH dial, including the nested dial through the jump host.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,
    /// How long a connection pair may wait on a read before it's torn down.
    #[builder(default = DEFAULT_READ_TIMEOUT)]
    pub read_timeout: Duration,
    /// How long a connection pair may wait on a write before it's torn down.
    #[builder(default = DEFAULT_WRITE_TIMEOUT)]
    pub write_timeout: Duration,
    /// Buffer size for each relay direction.
    #[builder(default = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct ApplicationConfig {
    /// SSH destination of the end host, as user@host:port.
    #[arg(long, value_name = "DESTINATION")]
    pub end_host: Destination,

    /// Private key used to authenticate with the end host. Preferred over the password.
    #[arg(long, value_name = "FILE")]
    pub end_host_key_file: Option<PathBuf>,

    /// Password used to authenticate with the end host.
    #[arg(long, value_name = "PASSWORD")]
    pub end_host_password: Option<String>,

    /// SSH destination of a jump host, as user@host:port.
    ///
    /// Only one jump host is currently supported.
    #[arg(long, value_name = "DESTINATION")]
    pub jump_host: Vec<Destination>,

    /// Private key used to authenticate with the jump host. Preferred over the password.
    #[arg(long, value_name = "FILE")]
    pub jump_host_key_file: Option<PathBuf>,

    /// Password used to authenticate with the jump host.
    #[arg(long, value_name = "PASSWORD")]
    pub jump_host_password: Option<String>,

    /// Local address to listen on for connections to forward.
    #[arg(long, value_name = "ADDRESS")]
    pub local_address: String,

    /// Address of the service to connect to, as seen from the end host.
    #[arg(long, value_name = "ADDRESS")]
    pub remote_address: String,

    /// Time until an SSH dial is considered failed.
    #[arg(long, default_value = "8s", value_name = "DURATION")]
    pub connect_timeout: humantime::Duration,

    /// Time a forwarded connection may wait on a read before being closed.
    #[arg(long, default_value = "30s", value_name = "DURATION")]
    pub read_timeout: humantime::Duration,

    /// Time a forwarded connection may wait on a write before being closed.
    #[arg(long, default_value = "30s", value_name = "DURATION")]
    pub write_timeout: humantime::Duration,

    /// Size in bytes of the buffer for each direction of a forwarded connection.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE, value_name = "BYTES")]
    pub buffer_size: usize,
}

impl From<ApplicationConfig> for TunnelSpec {
    fn from(config: ApplicationConfig) -> Self {
        let jump_hosts = config
            .jump_host
            .into_iter()
            .map(|destination| HostCredential {
                address: destination.address,
                user: destination.user,
                private_key_file: config.jump_host_key_file.clone(),
                password: config.jump_host_password.clone(),
            })
            .collect();
        TunnelSpec {
            jump_hosts,
            end_host: Some(HostCredential {
                address: config.end_host.address,
                user: config.end_host.user,
                private_key_file: config.end_host_key_file,
                password: config.end_host_password,
            }),
            local_address: config.local_address,
            remote_address: config.remote_address,
            connect_timeout: config.connect_timeout.into(),
            read_timeout: config.read_timeout.into(),
            write_timeout: config.write_timeout.into(),
            buffer_size: config.buffer_size,
        }
    }
}
