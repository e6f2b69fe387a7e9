//! Transport faults as observed by a real client.

mod common;

use common::{direct_client, eventually, start_server};
use mimic_http::matching::RequestPattern;
use mimic_http::response::Fault;
use mimic_http::stubs::{ResponseDefinition, StubMapping};
use mimic_http::MockServer;
use std::io::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn server_with_fault(path: &str, fault: Fault) -> MockServer {
    let server = start_server().await;
    server
        .admin()
        .add_stub(StubMapping::new(
            RequestPattern::get(path),
            ResponseDefinition::fault(fault),
        ))
        .unwrap();
    server
}

async fn raw_get(server: &MockServer, path: &str) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(server.http_addr()).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    let mut seen = Vec::new();
    stream.read_to_end(&mut seen).await?;
    Ok(seen)
}

#[tokio::test]
async fn test_connection_reset_is_observed() {
    let server = server_with_fault("/reset", Fault::ConnectionResetByPeer).await;

    let err = raw_get(&server, "/reset").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionReset);

    let admin = server.admin().clone();
    eventually(|| admin.serve_events().iter().any(|e| e.is_complete())).await;
    let response = admin.serve_events()[0].response.clone().unwrap();
    assert_eq!(response.fault, Some(Fault::ConnectionResetByPeer));
    server.stop().await;
}

#[tokio::test]
async fn test_reset_fails_http_client() {
    let server = server_with_fault("/reset", Fault::ConnectionResetByPeer).await;
    let result = direct_client()
        .get(format!("{}/reset", server.base_url()))
        .send()
        .await;
    assert!(result.is_err());
    server.stop().await;
}

#[tokio::test]
async fn test_empty_response_closes_without_bytes() {
    let server = server_with_fault("/empty", Fault::EmptyResponse).await;
    let seen = raw_get(&server, "/empty").await.unwrap();
    assert!(seen.is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_chunk_breaks_http_client() {
    let server = server_with_fault("/chunk", Fault::MalformedResponseChunk).await;

    let seen = raw_get(&server, "/chunk").await.unwrap();
    assert!(seen.starts_with(b"HTTP/1.1 200"));

    let result = async {
        direct_client()
            .get(format!("{}/chunk", server.base_url()))
            .send()
            .await?
            .bytes()
            .await
    }
    .await;
    assert!(result.is_err());
    server.stop().await;
}

#[tokio::test]
async fn test_random_data_is_not_a_response() {
    let server = server_with_fault("/garbage", Fault::RandomDataThenClose).await;
    let result = direct_client()
        .get(format!("{}/garbage", server.base_url()))
        .send()
        .await;
    assert!(result.is_err());
    server.stop().await;
}

#[tokio::test]
async fn test_fault_does_not_affect_other_connections() {
    let server = server_with_fault("/reset", Fault::ConnectionResetByPeer).await;
    server
        .admin()
        .add_stub(StubMapping::new(
            RequestPattern::get("/ok"),
            ResponseDefinition::ok_text("fine"),
        ))
        .unwrap();

    assert!(raw_get(&server, "/reset").await.is_err());
    let body = direct_client()
        .get(format!("{}/ok", server.base_url()))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "fine");
    server.stop().await;
}
