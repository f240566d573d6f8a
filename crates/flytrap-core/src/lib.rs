//! Flytrap Core Engagement State
//!
//! This crate provides the session-synchronization core for a scam
//! engagement dashboard client: message and session records, the wire
//! frame format, the typed event router, the reconciliation rules that
//! collapse optimistic sends with server confirmations, and the
//! active-session store that keeps one ordered, duplicate-free log.
//!
//! Everything here is transport-agnostic and synchronous; the `flytrap-client`
//! crate drives it from a WebSocket link and a request/response API.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod frame;
pub mod intel;
pub mod link;
pub mod message;
pub mod reconcile;
pub mod router;
pub mod session;
pub mod store;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ApiConfig, FlytrapConfig, ReconcileConfig, StoreConfig, TransportConfig};
pub use errors::{FlytrapError, FlytrapResult, Result};
pub use frame::{EventKind, Frame, LiveMessage};
pub use intel::{Entity, EntityKind};
pub use link::{LinkState, ReconnectDecision, Reconnector};
pub use message::{DeliveryState, Message, MessagePatch, MessageRole, SendFailure};
pub use router::{EventRouter, SubscriptionId};
pub use session::{RiskLevel, Session, SessionPatch, SessionStatus, SessionSummary};
pub use store::{AppendOutcome, SessionStore, StoreStats};
pub use types::{MessageId, SessionId, SystemTimeSource, TimeSource, Timestamp};
