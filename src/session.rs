use std::{future::Future, sync::Arc, time::Duration};

use russh::{
    ChannelStream, Disconnect,
    client::{self, Handle, Msg},
    keys::{HashAlg, PublicKey},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    address::HostPort,
    auth::AuthMethod,
    config::{HostCredential, TunnelSpec},
    error::TunnelError,
};

// A live session able to open channels to addresses reachable from the end host.
pub(crate) trait TunnelSession: Send + Sync + 'static {
    type Channel: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    // Open a new channel to the given address on the far side.
    fn open_channel(
        &self,
        target: &HostPort,
    ) -> impl Future<Output = Result<Self::Channel, russh::Error>> + Send;

    // Best-effort teardown of the session.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// SSH client handler used for every hop.
///
/// SECURITY: server host keys are NOT verified. Any key is accepted and only its
/// fingerprint is logged. This matches a trust model where every hop lives in a
/// private, admin-operated network; do not use it where a man-in-the-middle is
/// a realistic threat.
pub(crate) struct ClientHandler {
    address: String,
}

impl ClientHandler {
    fn new(address: &str) -> Self {
        ClientHandler {
            address: address.into(),
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        warn!(
            address = %self.address,
            fingerprint = %key.fingerprint(HashAlg::Sha256),
            "Accepting host key without verification."
        );
        Ok(true)
    }
}

// Authenticated session to the end host, directly or through a jump host.
pub(crate) struct SshSession {
    end_host: Handle<ClientHandler>,
    // The jump host session carries the end host session, so it must live as long.
    jump_host: Option<Handle<ClientHandler>>,
}

impl TunnelSession for SshSession {
    type Channel = ChannelStream<Msg>;

    async fn open_channel(&self, target: &HostPort) -> Result<Self::Channel, russh::Error> {
        let channel = self
            .end_host
            .channel_open_direct_tcpip(target.host.clone(), target.port.into(), "127.0.0.1", 0)
            .await?;
        Ok(channel.into_stream())
    }

    async fn close(&self) {
        disconnect(&self.end_host).await;
        if let Some(jump_host) = self.jump_host.as_ref() {
            disconnect(jump_host).await;
        }
    }
}

/// Assemble the SSH session to the end host described by the tunnel.
pub(crate) async fn build_session(spec: &TunnelSpec) -> Result<SshSession, TunnelError> {
    let end_host = spec.end_host.as_ref().ok_or(TunnelError::CredentialMissing)?;
    match spec.jump_hosts.first() {
        None => {
            let handle = connect(end_host, spec.connect_timeout)
                .await
                .map_err(|error| TunnelError::EndHostDialFailed {
                    address: end_host.address.clone(),
                    source: Box::new(error),
                })?;
            info!(address = %end_host.address, "Connected to end host.");
            Ok(SshSession {
                end_host: handle,
                jump_host: None,
            })
        }
        Some(jump_host) => connect_through(jump_host, end_host, spec.connect_timeout).await,
    }
}

// Dial and authenticate a single hop over TCP.
#[cfg_attr(
    not(coverage_nightly),
    tracing::instrument(skip_all, fields(address = %credential.address), level = "debug")
)]
async fn connect(
    credential: &HostCredential,
    connect_timeout: Duration,
) -> Result<Handle<ClientHandler>, TunnelError> {
    debug!(address = %credential.address, user = %credential.user, "Dialing SSH server.");
    let config = Arc::new(client::Config::default());
    // The bound covers the handshake and authentication alike.
    timeout(connect_timeout, async {
        match client::connect(
            config,
            credential.address.as_str(),
            ClientHandler::new(&credential.address),
        )
        .await
        {
            Ok(handle) => authenticated(handle, credential).await,
            Err(error) => Err(TunnelError::from(error)),
        }
    })
    .await
    .map_err(|_| TunnelError::ConnectTimeout(connect_timeout))?
}

// Reach the end host through the jump host, upgrading the nested channel to a second session.
async fn connect_through(
    jump_host: &HostCredential,
    end_host: &HostCredential,
    connect_timeout: Duration,
) -> Result<SshSession, TunnelError> {
    let end_address: HostPort = end_host.address.parse()?;
    let jump_handle = connect(jump_host, connect_timeout).await.map_err(|error| {
        TunnelError::JumpHostDialFailed {
            address: jump_host.address.clone(),
            source: Box::new(error),
        }
    })?;
    info!(address = %jump_host.address, "Connected to jump host.");

    // Channel opening has no timeout of its own. Dropping the future on timeout
    // abandons the request, and the jump session is torn down with it.
    let channel = match timeout(
        connect_timeout,
        jump_handle.channel_open_direct_tcpip(
            end_address.host.clone(),
            end_address.port.into(),
            "127.0.0.1",
            0,
        ),
    )
    .await
    {
        Ok(Ok(channel)) => channel,
        Ok(Err(source)) => {
            disconnect(&jump_handle).await;
            return Err(TunnelError::JumpToEndDialFailed {
                address: end_host.address.clone(),
                source,
            });
        }
        Err(_) => {
            disconnect(&jump_handle).await;
            return Err(TunnelError::JumpToEndDialTimeout {
                address: end_host.address.clone(),
                timeout: connect_timeout,
            });
        }
    };

    match upgrade(channel.into_stream(), end_host, connect_timeout).await {
        Ok(end_handle) => {
            info!(
                address = %end_host.address,
                jump_host = %jump_host.address,
                "Connected to end host through jump host."
            );
            Ok(SshSession {
                end_host: end_handle,
                jump_host: Some(jump_handle),
            })
        }
        Err(error) => {
            disconnect(&jump_handle).await;
            Err(TunnelError::EndHostUpgradeFailed {
                address: end_host.address.clone(),
                source: Box::new(error),
            })
        }
    }
}

// Run a second SSH session over a channel opened on the jump host.
#[cfg_attr(
    not(coverage_nightly),
    tracing::instrument(skip_all, fields(address = %end_host.address), level = "debug")
)]
async fn upgrade(
    stream: ChannelStream<Msg>,
    end_host: &HostCredential,
    connect_timeout: Duration,
) -> Result<Handle<ClientHandler>, TunnelError> {
    let config = Arc::new(client::Config::default());
    timeout(connect_timeout, async {
        match client::connect_stream(config, stream, ClientHandler::new(&end_host.address)).await
        {
            Ok(handle) => authenticated(handle, end_host).await,
            Err(error) => Err(TunnelError::from(error)),
        }
    })
    .await
    .map_err(|_| TunnelError::ConnectTimeout(connect_timeout))?
}

// Authenticate a freshly connected session, disconnecting it on failure.
async fn authenticated(
    mut handle: Handle<ClientHandler>,
    credential: &HostCredential,
) -> Result<Handle<ClientHandler>, TunnelError> {
    let result = match AuthMethod::load(credential).await {
        Ok(method) => method.authenticate(&mut handle, credential).await,
        Err(error) => Err(error),
    };
    match result {
        Ok(()) => Ok(handle),
        Err(error) => {
            disconnect(&handle).await;
            Err(error)
        }
    }
}

async fn disconnect(handle: &Handle<ClientHandler>) {
    let _ = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await;
}
