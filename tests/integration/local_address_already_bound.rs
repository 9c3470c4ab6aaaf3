use std::time::Duration;

use jumpgate::{HostCredential, TunnelError, TunnelSpec, start};
use tokio::{net::TcpListener, time::timeout};

use crate::common::{ForwardMode, TestServerConfig, spawn_ssh_server};

/// This test ensures that the tunnel fails to start if the local address is
/// already taken, and that it closes the SSH session it had opened.
#[test_log::test(tokio::test)]
async fn local_address_already_bound() {
    // 1. Take the local address
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_address = taken.local_addr().unwrap().to_string();
    let (ssh_address, ssh_handle) = spawn_ssh_server(TestServerConfig {
        user: "endhostuser",
        password: Some("mypwd"),
        authorized_key: None,
        mode: ForwardMode::Connect,
        stall_authentication: false,
    })
    .await;

    // 2. Start a tunnel on the same address
    let spec = TunnelSpec::builder()
        .end_host(
            HostCredential::builder()
                .address(ssh_address.to_string())
                .user("endhostuser")
                .password("mypwd")
                .build(),
        )
        .local_address(local_address.clone())
        .remote_address("localhost:2376")
        .connect_timeout(Duration::from_secs(5))
        .build();
    let result = timeout(Duration::from_secs(10), start(spec))
        .await
        .expect("Timeout starting tunnel");

    match result {
        Err(TunnelError::ListenFailed { address, source }) => {
            assert_eq!(address, local_address);
            assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
        }
        Err(error) => panic!("unexpected error {error}"),
        Ok(_) => panic!("tunnel should not start"),
    }
    ssh_handle.wait_for_no_sessions().await;
    drop(taken);
}
