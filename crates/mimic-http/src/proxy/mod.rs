//! Upstream forwarding and CONNECT tunnelling.
//!
//! This module is organized into submodules:
//! - `client`: HTTP client creation governed by the trust policy
//! - `forwarding`: request forwarding to an upstream URL
//! - `headers`: names of headers this server adds
//! - `tunnel`: CONNECT handling and redirection to the MITM listener

mod client;
mod forwarding;
pub mod headers;
mod tunnel;

pub use client::{create_http_client, ClientSettings, HttpClient};
pub use forwarding::{ForwardError, Forwarder};
pub use tunnel::{TunnelHandler, TunnelRegistry};
