use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use russh::{
    Channel,
    keys::{
        PrivateKey, PublicKey,
        ssh_key::{LineEnding, private::Ed25519Keypair},
    },
    server::{self, Auth, Msg, Session},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, copy_bidirectional},
    net::{TcpListener, TcpStream},
    task::{JoinHandle, JoinSet},
    time::{sleep, timeout},
};

/// Aborts the wrapped server task, and every connection it spawned, on drop.
pub(crate) struct ServerHandle {
    join_handle: JoinHandle<()>,
    sessions: Arc<AtomicUsize>,
}

impl ServerHandle {
    /// Wait until the server has no open sessions left.
    pub(crate) async fn wait_for_no_sessions(&self) {
        timeout(Duration::from_secs(5), async {
            while self.sessions.load(Ordering::SeqCst) > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("Timeout waiting for sessions to close");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

/// What the test server does with `direct-tcpip` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForwardMode {
    /// Connect to the requested address and relay the channel to it.
    Connect,
    /// Never answer the request.
    Stall,
}

#[derive(Debug, Clone)]
pub(crate) struct TestServerConfig {
    pub(crate) user: &'static str,
    pub(crate) password: Option<&'static str>,
    pub(crate) authorized_key: Option<PublicKey>,
    pub(crate) mode: ForwardMode,
    /// Never answer authentication requests.
    pub(crate) stall_authentication: bool,
}

struct TestServerHandler {
    config: Arc<TestServerConfig>,
}

impl server::Handler for TestServerHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.config.stall_authentication {
            sleep(Duration::from_secs(3600)).await;
        }
        if user == self.config.user && self.config.password == Some(password) {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.config.stall_authentication {
            sleep(Duration::from_secs(3600)).await;
        }
        let authorized = self
            .config
            .authorized_key
            .as_ref()
            .is_some_and(|key| key.key_data() == public_key.key_data());
        if user == self.config.user && authorized {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.config.mode == ForwardMode::Stall {
            sleep(Duration::from_secs(3600)).await;
            return Ok(false);
        }
        let Ok(mut stream) = TcpStream::connect(format!("{host_to_connect}:{port_to_connect}")).await
        else {
            return Ok(false);
        };
        tokio::spawn(async move {
            let mut channel = channel.into_stream();
            let _ = copy_bidirectional(&mut channel, &mut stream).await;
        });
        Ok(true)
    }
}

/// Start an SSH server on a random local port.
pub(crate) async fn spawn_ssh_server(config: TestServerConfig) -> (SocketAddr, ServerHandle) {
    let server_config = Arc::new(server::Config {
        keys: vec![PrivateKey::from(Ed25519Keypair::from_seed(&[7; 32]))],
        auth_rejection_time: Duration::from_millis(10),
        ..Default::default()
    });
    let config = Arc::new(config);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Unable to bind SSH server");
    let address = listener.local_addr().unwrap();
    let sessions = Arc::new(AtomicUsize::new(0));
    let sessions_clone = Arc::clone(&sessions);
    let join_handle = tokio::spawn(async move {
        let mut connections = JoinSet::new();
        while let Ok((stream, _)) = listener.accept().await {
            let handler = TestServerHandler {
                config: Arc::clone(&config),
            };
            let server_config = Arc::clone(&server_config);
            let sessions = Arc::clone(&sessions_clone);
            sessions.fetch_add(1, Ordering::SeqCst);
            connections.spawn(async move {
                if let Ok(session) = server::run_stream(server_config, stream, handler).await {
                    let _ = session.await;
                }
                sessions.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });
    (
        address,
        ServerHandle {
            join_handle,
            sessions,
        },
    )
}

/// Start a TCP server that echoes back everything it receives.
pub(crate) async fn spawn_echo_server() -> (SocketAddr, ServerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Unable to bind echo server");
    let address = listener.local_addr().unwrap();
    let join_handle = tokio::spawn(async move {
        let mut connections = JoinSet::new();
        while let Ok((mut stream, _)) = listener.accept().await {
            connections.spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    (
        address,
        ServerHandle {
            join_handle,
            sessions: Arc::new(AtomicUsize::new(0)),
        },
    )
}

/// Write an OpenSSH private key derived from `seed` into `directory`.
pub(crate) fn write_private_key(directory: &tempfile::TempDir, seed: u8) -> (PathBuf, PublicKey) {
    let key = PrivateKey::from(Ed25519Keypair::from_seed(&[seed; 32]));
    let path = directory.path().join(format!("id_ed25519_{seed}"));
    std::fs::write(&path, key.to_openssh(LineEnding::LF).unwrap().as_bytes())
        .expect("Unable to write private key");
    (path, key.public_key().clone())
}

/// Send `message` through the tunnel and expect it back.
pub(crate) async fn assert_echo(address: SocketAddr, message: &[u8]) {
    let mut stream = TcpStream::connect(address)
        .await
        .expect("Unable to connect to tunnel");
    stream.write_all(message).await.unwrap();
    let mut buf = vec![0u8; message.len()];
    timeout(Duration::from_secs(10), stream.read_exact(&mut buf))
        .await
        .expect("Timeout waiting for echo")
        .expect("Tunnel closed before echoing");
    assert_eq!(buf, message);
}
