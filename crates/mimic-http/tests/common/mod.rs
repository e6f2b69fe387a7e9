//! Shared helpers for in-process server tests.

#![allow(dead_code)]

use mimic_http::{Config, MockServer};
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default config on ephemeral ports, loopback only.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.listen.bind = "127.0.0.1".to_string();
    config.listen.port = 0;
    config.listen.mitm_port = 0;
    config.proxy.trust.trust_all = true;
    config
}

pub async fn start_server() -> MockServer {
    MockServer::start(test_config())
        .await
        .expect("Failed to start server")
}

/// Client that talks to the server directly, ignoring proxy environment variables.
pub fn direct_client() -> Client {
    Client::builder()
        .no_proxy()
        .timeout(TEST_TIMEOUT)
        .build()
        .unwrap()
}

/// Poll `check` until it holds; the journal is finalized after the response
/// bytes reach the client.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..50 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 1s");
}
