//! Centralized configuration for the Flytrap client
//!
//! Each concern (transport, service endpoints, store, reconciliation)
//! carries its own config struct with documented defaults; FlytrapConfig
//! consolidates them for components that wire everything together.

use core::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Transport Configuration
// ----------------------------------------------------------------------------

/// Configuration for the real-time transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket endpoint of the engagement service
    pub url: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Maximum reconnect attempts before the link goes terminally down
    pub max_reconnect_attempts: u32,
    /// Outbound frame channel capacity
    pub outbound_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            reconnect_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
            outbound_buffer: 64,
        }
    }
}

impl TransportConfig {
    /// Create configuration optimized for testing (fast reconnects)
    pub fn testing() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_attempts: 2,
            outbound_buffer: 16,
        }
    }
}

// ----------------------------------------------------------------------------
// Service Configuration
// ----------------------------------------------------------------------------

/// Configuration for the request/response service client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the engagement service REST surface
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Messages requested per history page during resume
    pub history_page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout: Duration::from_secs(30),
            history_page_size: 50,
        }
    }
}

impl ApiConfig {
    /// Create configuration optimized for testing (small pages, short waits)
    pub fn testing() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout: Duration::from_millis(500),
            history_page_size: 5,
        }
    }
}

// ----------------------------------------------------------------------------
// Store Configuration
// ----------------------------------------------------------------------------

/// Configuration for the session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum messages retained in the log; oldest confirmed records are
    /// evicted beyond this, never the unconfirmed tail
    pub max_messages: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_messages: 1000 }
    }
}

impl StoreConfig {
    /// Create configuration with tight limits for testing
    pub fn testing() -> Self {
        Self { max_messages: 10 }
    }
}

// ----------------------------------------------------------------------------
// Reconciliation Configuration
// ----------------------------------------------------------------------------

/// Configuration for message reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// How far apart two timestamps may be while still describing the same
    /// logical message (optimistic send vs. server confirmation)
    pub timestamp_tolerance: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance: Duration::from_millis(5000),
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Consolidated configuration for all Flytrap components
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlytrapConfig {
    /// Real-time transport configuration
    pub transport: TransportConfig,
    /// Request/response service configuration
    pub api: ApiConfig,
    /// Session store configuration
    pub store: StoreConfig,
    /// Message reconciliation configuration
    pub reconcile: ReconcileConfig,
}

impl FlytrapConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            transport: TransportConfig::testing(),
            api: ApiConfig::testing(),
            store: StoreConfig::testing(),
            reconcile: ReconcileConfig::default(),
        }
    }

    /// Builder method for customizing transport configuration
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Builder method for customizing service configuration
    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = api;
        self
    }

    /// Builder method for customizing store configuration
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Builder method for customizing reconciliation configuration
    pub fn with_reconcile(mut self, reconcile: ReconcileConfig) -> Self {
        self.reconcile = reconcile;
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), String> {
        if self.transport.url.is_empty() {
            return Err("Transport URL cannot be empty".into());
        }
        if self.transport.outbound_buffer == 0 {
            return Err("Outbound buffer size cannot be zero".into());
        }
        if self.api.base_url.is_empty() {
            return Err("Service base URL cannot be empty".into());
        }
        if self.api.history_page_size == 0 {
            return Err("History page size cannot be zero".into());
        }
        if self.store.max_messages == 0 {
            return Err("Message retention limit cannot be zero".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
