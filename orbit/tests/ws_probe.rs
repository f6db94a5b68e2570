use std::time::Duration;

use orbit::client::{ClientConfig, TelemetryClient};
use orbit::state::ConnectionState;

// Integration probe: only runs when ORBIT_WS is set to a live backend URL.
// Example: ORBIT_WS=ws://127.0.0.1:9700/ws cargo test -p orbit --test ws_probe -- --nocapture
#[tokio::test]
async fn probe_live_backend() {
    // Gate the test to avoid CI failures when no backend is running.
    let url = match std::env::var("ORBIT_WS") {
        Ok(v) if !v.is_empty() => v,
        _ => {
            eprintln!(
                "skipping ws_probe: set ORBIT_WS=ws://host:port/ws to run this integration test"
            );
            return;
        }
    };

    let client = TelemetryClient::spawn(ClientConfig::default());
    client.connect(&url).expect("valid ORBIT_WS url");

    let mut connected = false;
    for _ in 0..50 {
        if client.connection_state().await == ConnectionState::Connected {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(connected, "expected a connection to {url}");

    client.shutdown().await;
}
