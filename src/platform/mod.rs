//! Streaming-platform collaborator interface
//!
//! The live-stream client itself (protocol decoding, signing, websocket
//! transport) is external. Supervisors only see this narrow surface:
//!
//! ```text
//! PlatformConnector::open(identity, events_tx)
//!     │
//!     └──→ PlatformHandle  (fetch_is_live / wait_until_live / connect /
//!                           fetch_room_info / disconnect / is_connected)
//!             │
//!             └──→ events_tx: RawEvent queue drained by the supervisor loop
//! ```

use crate::events::RawEvent;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod demo;

/// Failures reported by a platform client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("live status check failed: {0}")]
    LiveCheck(String),

    #[error("waiting for stream to go live failed: {0}")]
    WaitForLive(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("room info fetch failed: {0}")]
    RoomInfo(String),

    #[error("not connected")]
    NotConnected,
}

/// Result of a successful connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub room_id: String,
}

/// Optional enrichment data about a live room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomInfo {
    /// HLS pull URL for the stream
    pub media_url: Option<String>,
    /// Platform-reported room creation time
    pub created_at: Option<String>,
    /// Streamer profile bio
    pub bio: Option<String>,
}

/// Per-identity connection to the streaming platform
#[async_trait]
pub trait PlatformHandle: Send + Sync {
    /// Whether the identity is broadcasting right now
    async fn fetch_is_live(&self) -> Result<bool, PlatformError>;

    /// Suspend until the identity goes live (may never resolve)
    async fn wait_until_live(&self) -> Result<(), PlatformError>;

    /// Join the live room; events start flowing into the queue
    async fn connect(&self) -> Result<RoomState, PlatformError>;

    /// Best-effort room details
    async fn fetch_room_info(&self) -> Result<RoomInfo, PlatformError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// Factory for platform handles, one per monitored identity
pub trait PlatformConnector: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &'static str;

    /// Create a handle for `identity` that delivers its events into `events`
    fn open(&self, identity: &str, events: mpsc::Sender<RawEvent>) -> Arc<dyn PlatformHandle>;
}
