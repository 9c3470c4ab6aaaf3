use std::{net::SocketAddr, time::Duration};

use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    address::HostPort,
    config::TunnelSpec,
    deadline::DeadlineStream,
    error::TunnelError,
    relay::relay,
    session::{TunnelSession, build_session},
    validation::validate,
};

/// Receiving end of the errors produced by a running tunnel.
///
/// It yields `None` once the accept loop and all of its relays are gone.
pub type ErrorSink = mpsc::UnboundedReceiver<TunnelError>;

/// Handle to a running tunnel. Dropping it stops the tunnel.
#[derive(Debug)]
pub struct TunnelHandle {
    local_addr: SocketAddr,
    cancellation_token: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl TunnelHandle {
    /// Address the local listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and release the listener and SSH session.
    ///
    /// Calling this more than once has no further effect. Relays that are
    /// already running finish on their own or when their deadlines elapse.
    pub fn stop(&self) {
        if !self.cancellation_token.is_cancelled() {
            info!(local_addr = %self.local_addr, "Stopping tunnel.");
            self.cancellation_token.cancel();
        }
    }

    /// Wait until the accept loop has exited and closed the listener and session.
    pub async fn closed(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.await;
        }
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

// Settings applied to every connection pair.
#[derive(Debug, Clone, Copy)]
struct PairSettings {
    read_timeout: Duration,
    write_timeout: Duration,
    buffer_size: usize,
}

impl From<&TunnelSpec> for PairSettings {
    fn from(spec: &TunnelSpec) -> Self {
        PairSettings {
            read_timeout: spec.read_timeout,
            write_timeout: spec.write_timeout,
            buffer_size: spec.buffer_size,
        }
    }
}

/// Validate the tunnel definition, connect to the end host, and start forwarding.
///
/// Configuration and bootstrap failures are returned here. Once this returns
/// successfully, every later failure is delivered on the [`ErrorSink`], which
/// must be drained by the caller.
pub async fn start(spec: TunnelSpec) -> Result<(TunnelHandle, ErrorSink), TunnelError> {
    validate(Some(&spec))?;
    let target: HostPort = spec.remote_address.parse()?;
    let session = build_session(&spec).await?;
    let listener = match TcpListener::bind(spec.local_address.as_str()).await {
        Ok(listener) => listener,
        Err(source) => {
            session.close().await;
            return Err(TunnelError::ListenFailed {
                address: spec.local_address,
                source,
            });
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(local_addr) => local_addr,
        Err(source) => {
            session.close().await;
            return Err(TunnelError::ListenFailed {
                address: spec.local_address,
                source,
            });
        }
    };
    info!(%local_addr, remote_address = %target, "Tunnel is now running.");
    Ok(spawn_tunnel(
        session,
        listener,
        local_addr,
        target,
        PairSettings::from(&spec),
    ))
}

fn spawn_tunnel<S: TunnelSession>(
    session: S,
    listener: TcpListener,
    local_addr: SocketAddr,
    target: HostPort,
    settings: PairSettings,
) -> (TunnelHandle, ErrorSink) {
    let (errors, error_sink) = mpsc::unbounded_channel();
    let cancellation_token = CancellationToken::new();
    let join_handle = tokio::spawn(accept_loop(AcceptLoop {
        session,
        listener,
        target,
        settings,
        errors,
        cancellation_token: cancellation_token.clone(),
    }));
    (
        TunnelHandle {
            local_addr,
            cancellation_token,
            join_handle: Some(join_handle),
        },
        error_sink,
    )
}

struct AcceptLoop<S> {
    session: S,
    listener: TcpListener,
    target: HostPort,
    settings: PairSettings,
    errors: mpsc::UnboundedSender<TunnelError>,
    cancellation_token: CancellationToken,
}

// Serve connection pairs one at a time until stopped or until the session or listener fails.
async fn accept_loop<S: TunnelSession>(
    AcceptLoop {
        session,
        listener,
        target,
        settings,
        errors,
        cancellation_token,
    }: AcceptLoop<S>,
) {
    loop {
        // Open the remote side first, so that a dead session is noticed before
        // a local client gets accepted.
        let channel = tokio::select! {
            _ = cancellation_token.cancelled() => break,
            channel = session.open_channel(&target) => channel,
        };
        let channel = match channel {
            Ok(channel) => {
                DeadlineStream::new(channel, settings.read_timeout, settings.write_timeout)
            }
            Err(source) => {
                error!(%target, %source, "Failed to open channel to remote address.");
                let _ = errors.send(TunnelError::ChannelOpenFailed {
                    address: target.to_string(),
                    source,
                });
                break;
            }
        };
        let (stream, peer) = tokio::select! {
            _ = cancellation_token.cancelled() => break,
            conn = listener.accept() => match conn {
                Ok(conn) => conn,
                Err(source) => {
                    error!(%source, "Unable to accept local connection.");
                    let _ = errors.send(TunnelError::AcceptFailed(source));
                    break;
                }
            },
        };
        if let Err(source) = stream.set_nodelay(true) {
            warn!(%peer, %source, "Error setting nodelay.");
            let _ = errors.send(TunnelError::ConnectionSetup {
                peer: peer.to_string(),
                source,
            });
        }
        let stream = DeadlineStream::new(stream, settings.read_timeout, settings.write_timeout);
        debug!(%peer, %target, "Forwarding new connection.");
        let pair = relay(stream, channel, settings.buffer_size, errors.clone());
        tokio::spawn(async move {
            let (local_to_remote, remote_to_local) =
                tokio::join!(pair.local_to_remote, pair.remote_to_local);
            debug!(%peer, ?local_to_remote, ?remote_to_local, "Connection closed.");
        });
    }
    drop(listener);
    session.close().await;
    info!(%target, "Tunnel closed.");
}
