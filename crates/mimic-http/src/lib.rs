//! Mimic: an HTTP(S) service virtualization server.
//!
//! Requests are matched against registered stubs and answered with canned
//! responses, delays, or connection faults. CONNECT tunnels are intercepted
//! with certificates minted on demand by an embedded CA, so HTTPS traffic
//! can be stubbed the same way as plain HTTP. Every exchange is journaled,
//! and unmatched requests are explained with a near-miss report.

pub mod admin;
pub mod config;
pub mod http;
pub mod journal;
pub mod matching;
pub mod notify;
pub mod proxy;
pub mod recording;
pub mod response;
pub mod server;
pub mod stubs;
pub mod tls;

pub use admin::{Admin, AdminError};
pub use config::Config;
pub use server::MockServer;
