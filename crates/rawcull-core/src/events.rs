//! Event emission abstraction.
//!
//! The core never talks to a frontend directly. Background workers and the
//! browse session report progress through an [`EventSink`], which a
//! frontend implements however it likes (a channel, a log, a GUI bridge).

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::jobs::Generation;
use crate::utils::error::ExtractError;

/// Emitted when a prefetched preview lands in the cache.
pub const PREVIEW_READY: &str = "preview-ready";
/// Emitted when a prefetch extraction fails.
pub const PREVIEW_FAILED: &str = "preview-failed";
/// Emitted for every non-fatal problem found during a scan.
pub const SCAN_WARNING: &str = "scan-warning";
/// Emitted after a rating was persisted.
pub const RATING_CHANGED: &str = "rating-changed";

/// Trait for emitting events to the frontend.
pub trait EventSink: Send + Sync {
    /// Emit an event with the given name and JSON payload.
    ///
    /// # Arguments
    /// * `event_name` - The name of the event (e.g., "preview-ready")
    /// * `payload_json` - JSON-serialized payload string
    fn emit(&self, event_name: &str, payload_json: &str);
}

/// Extension trait for EventSink that provides typed emit functionality.
pub trait EventSinkExt {
    /// Emit an event with a typed payload that will be serialized to JSON.
    fn emit_typed<T: Serialize>(&self, event_name: &str, payload: &T);
}

impl<S: EventSink + ?Sized> EventSinkExt for S {
    fn emit_typed<T: Serialize>(&self, event_name: &str, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(json) => self.emit(event_name, &json),
            Err(e) => {
                tracing::error!("Failed to serialize event payload: {}", e);
            }
        }
    }
}

/// Shared reference to an EventSink implementation.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Sink that drops every event.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event_name: &str, _payload_json: &str) {}
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event_name: &str, payload_json: &str) {
        tracing::debug!(event = event_name, payload = payload_json, "Event emitted");
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReadyPayload {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub generation: Generation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewFailedPayload {
    pub path: PathBuf,
    pub error: ExtractError,
    pub generation: Generation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingChangedPayload {
    pub path: PathBuf,
    pub index: usize,
    pub rating: u8,
}
