//! Flytrap Client Runtime
//!
//! Everything that talks to the engagement server: a supervised
//! WebSocket transport feeding the event router, an HTTP client for
//! the request/response surface, and the session coordinator tying
//! both to the shared store from [`flytrap_core`].

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod api;
pub mod coordinator;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API Re-exports
// ----------------------------------------------------------------------------

pub use api::{
    ContinueRequest, EngagementApi, EngagementResponse, ExtractedIntelligence, HistoryBatch,
    HistoryPage, HttpEngagementApi, SessionDetail, StartSessionRequest,
};
pub use coordinator::{SessionCoordinator, StartOptions};
pub use transport::{TransportStats, TransportStatsSnapshot, WsTransport};
