use std::io;

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, copy_buf, split},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Direction, TunnelError};

/// The two copy tasks of one connection pair.
///
/// Each task resolves to the number of bytes it copied, or to the kind of the
/// error that stopped it. Only the task that failed first sends its error to
/// the sink; its sibling resolves to [`io::ErrorKind::ConnectionAborted`].
pub(crate) struct Relay {
    pub(crate) local_to_remote: JoinHandle<Result<u64, io::ErrorKind>>,
    pub(crate) remote_to_local: JoinHandle<Result<u64, io::ErrorKind>>,
}

/// Copy bytes between a local connection and a remote channel in both directions.
///
/// An end of stream is forwarded as a half-close. Any error closes the whole pair.
pub(crate) fn relay<L, R>(
    local: L,
    remote: R,
    buffer_size: usize,
    errors: mpsc::UnboundedSender<TunnelError>,
) -> Relay
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let (local_reader, local_writer) = split(local);
    let (remote_reader, remote_writer) = split(remote);
    let teardown = CancellationToken::new();
    let local_to_remote = tokio::spawn(copy_direction(CopyDirection {
        reader: local_reader,
        writer: remote_writer,
        buffer_size,
        direction: Direction::LocalToRemote,
        errors: errors.clone(),
        teardown: teardown.clone(),
    }));
    let remote_to_local = tokio::spawn(copy_direction(CopyDirection {
        reader: remote_reader,
        writer: local_writer,
        buffer_size,
        direction: Direction::RemoteToLocal,
        errors,
        teardown,
    }));
    Relay {
        local_to_remote,
        remote_to_local,
    }
}

struct CopyDirection<R, W> {
    reader: R,
    writer: W,
    buffer_size: usize,
    direction: Direction,
    errors: mpsc::UnboundedSender<TunnelError>,
    // Shared by both directions of a pair.
    teardown: CancellationToken,
}

async fn copy_direction<R, W>(
    CopyDirection {
        reader,
        mut writer,
        buffer_size,
        direction,
        errors,
        teardown,
    }: CopyDirection<R, W>,
) -> Result<u64, io::ErrorKind>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::with_capacity(buffer_size, reader);
    let copied = tokio::select! {
        result = copy_buf(&mut reader, &mut writer) => Some(result),
        _ = teardown.cancelled() => None,
    };
    if let Some(Err(_)) = &copied {
        teardown.cancel();
    }
    // Forward the end of stream; the peer may already be gone.
    let _ = writer.shutdown().await;
    match copied {
        Some(Ok(bytes)) => {
            trace!(%direction, bytes, "Relay finished.");
            Ok(bytes)
        }
        Some(Err(error)) => {
            debug!(%direction, %error, "Relay failed, closing connection pair.");
            let kind = error.kind();
            let _ = errors.send(TunnelError::Relay {
                direction,
                source: error,
            });
            Err(kind)
        }
        None => {
            trace!(%direction, "Relay closed by the opposite direction.");
            Err(io::ErrorKind::ConnectionAborted)
        }
    }
}
