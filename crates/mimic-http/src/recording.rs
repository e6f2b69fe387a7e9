//! Capturing upstream exchanges as stub mappings.
//!
//! While a recording is active, unmatched requests are forwarded upstream and
//! each exchange becomes a stub. Stopping the recording hands the captured
//! stubs back to the caller, who registers them.

use crate::http::{is_hop_by_hop, HttpResponse, LoggedRequest};
use crate::matching::{RequestPattern, UrlPattern};
use crate::proxy::headers::is_mimic_header;
use crate::stubs::{ResponseDefinition, StubMapping};
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordingError {
    #[error("a recording of {0} is already in progress")]
    AlreadyRecording(String),
    #[error("no recording in progress")]
    NotRecording,
    #[error("recording target must be an absolute http(s) URL, got '{0}'")]
    InvalidTarget(String),
}

#[derive(Debug)]
struct Session {
    target_base_url: String,
    started_at: DateTime<Utc>,
    captured: Vec<StubMapping>,
}

#[derive(Debug, Default)]
pub struct Recorder {
    session: Mutex<Option<Session>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, target_base_url: &str) -> Result<(), RecordingError> {
        let lower = target_base_url.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(RecordingError::InvalidTarget(target_base_url.to_string()));
        }
        let mut session = self.session.lock();
        if let Some(active) = session.as_ref() {
            return Err(RecordingError::AlreadyRecording(active.target_base_url.clone()));
        }
        info!("Recording unmatched traffic against {target_base_url}");
        *session = Some(Session {
            target_base_url: target_base_url.trim_end_matches('/').to_string(),
            started_at: Utc::now(),
            captured: Vec::new(),
        });
        Ok(())
    }

    /// End the recording and return the stubs captured since `start`.
    pub fn stop(&self) -> Result<Vec<StubMapping>, RecordingError> {
        let session = self.session.lock().take().ok_or(RecordingError::NotRecording)?;
        info!(
            "Recording stopped: {} stubs captured since {}",
            session.captured.len(),
            session.started_at
        );
        Ok(session.captured)
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Where an unmatched `request` should be sent while recording.
    pub fn target_for(&self, request: &LoggedRequest) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .map(|s| format!("{}{}", s.target_base_url, request.url))
    }

    /// Add a stub for this exchange. Ignored if the recording has stopped.
    pub fn capture(&self, request: &LoggedRequest, response: &HttpResponse) -> bool {
        let mut session = self.session.lock();
        match session.as_mut() {
            Some(session) => {
                let stub = generate_stub(request, response);
                debug!("Captured {} {} -> {}", request.method, request.url, response.status);
                session.captured.push(stub);
                true
            }
            None => false,
        }
    }
}

/// A stub that replays `response` for requests with the same method and URL.
pub fn generate_stub(request: &LoggedRequest, response: &HttpResponse) -> StubMapping {
    let pattern = RequestPattern::new(&request.method, UrlPattern::Url(request.url.clone()));

    let mut definition = ResponseDefinition::with_status(response.status);
    for (name, value) in response.headers.iter() {
        if is_hop_by_hop(name) || is_mimic_header(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        definition.headers.insert(name.to_string(), value.to_string());
    }
    if !response.body.is_empty() {
        match std::str::from_utf8(&response.body) {
            Ok(text) => definition.body = Some(text.to_string()),
            Err(_) => {
                definition.base64_body =
                    Some(base64::engine::general_purpose::STANDARD.encode(&response.body))
            }
        }
    }

    let mut stub = StubMapping::new(pattern, definition);
    stub.name = Some(format!("recorded {} {}", request.method, request.url));
    stub
}
