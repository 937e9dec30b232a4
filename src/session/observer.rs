//! Capability interfaces the presentation layer implements
//!
//! All methods are invoked from network-task context. Implementations that
//! need a UI thread must redispatch themselves.

use bytes::Bytes;

/// Receives relayed audio frames
pub trait AudioSink: Send + Sync {
    /// A compressed frame attributed to `identity` arrived
    fn on_audio_received(&self, identity: &str, frame: Bytes);
}

/// Receives session lifecycle events
pub trait SessionObserver: Send + Sync {
    /// The server broadcast a new participant list
    fn on_participants_updated(&self, _participants: &[String]) {}

    /// The join handshake completed
    fn on_connected(&self) {}

    /// A connection-level failure ended the session
    fn on_error(&self, _message: &str) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}

impl AudioSink for NullObserver {
    fn on_audio_received(&self, _identity: &str, _frame: Bytes) {}
}
