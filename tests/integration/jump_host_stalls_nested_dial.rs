use std::time::{Duration, Instant};

use jumpgate::{HostCredential, TunnelError, TunnelSpec, start};
use tokio::time::timeout;

use crate::common::{ForwardMode, TestServerConfig, spawn_ssh_server};

/// This test ensures that a jump host that never answers the nested dial
/// doesn't hang the tunnel past its connect timeout.
#[test_log::test(tokio::test)]
async fn jump_host_stalls_nested_dial() {
    // 1. Start a jump host that never opens channels
    let (jump_address, _jump_handle) = spawn_ssh_server(TestServerConfig {
        user: "jumpuser",
        password: Some("jumppwd"),
        authorized_key: None,
        mode: ForwardMode::Stall,
        stall_authentication: false,
    })
    .await;

    // 2. Start the tunnel and measure how long it takes to fail
    let spec = TunnelSpec::builder()
        .jump_hosts(vec![
            HostCredential::builder()
                .address(jump_address.to_string())
                .user("jumpuser")
                .password("jumppwd")
                .build(),
        ])
        .end_host(
            HostCredential::builder()
                .address("127.0.0.1:22")
                .user("endhostuser")
                .password("mypwd")
                .build(),
        )
        .local_address("127.0.0.1:0")
        .remote_address("localhost:2376")
        .connect_timeout(Duration::from_secs(1))
        .build();
    let started = Instant::now();
    let result = timeout(Duration::from_secs(10), start(spec))
        .await
        .expect("Tunnel should give up on its own");
    let elapsed = started.elapsed();

    // 3. Check the error and its timing
    match result {
        Err(TunnelError::JumpToEndDialTimeout { address, timeout }) => {
            assert_eq!(address, "127.0.0.1:22");
            assert_eq!(timeout, Duration::from_secs(1));
        }
        Err(error) => panic!("unexpected error {error}"),
        Ok(_) => panic!("tunnel should not start"),
    }
    assert!(elapsed >= Duration::from_secs(1), "gave up too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "gave up too late: {elapsed:?}");
}
