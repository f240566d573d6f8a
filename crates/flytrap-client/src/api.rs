//! Request/response client for the engagement service.
//!
//! The coordinator only sees the [`EngagementApi`] trait; the HTTP
//! implementation below is one provider of it. Responses are plain DTOs
//! that convert into core domain types at the edge, so nothing past
//! this module knows about wire field names.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use flytrap_core::errors::ApiError;
use flytrap_core::{
    ApiConfig, Entity, EntityKind, FlytrapError, FlytrapResult, LiveMessage, RiskLevel, Session,
    SessionId, SessionStatus, SessionSummary, Timestamp,
};

// ----------------------------------------------------------------------------
// Service trait
// ----------------------------------------------------------------------------

/// Request/response surface of the engagement service.
///
/// Everything the lifecycle coordinator needs from the backend, and
/// nothing else. Tests substitute a scripted implementation; production
/// wires in [`HttpEngagementApi`].
#[async_trait]
pub trait EngagementApi: Send + Sync {
    /// Opens a new engagement with the scammer's first message.
    async fn start_session(
        &self,
        request: StartSessionRequest,
    ) -> FlytrapResult<EngagementResponse>;

    /// Relays the next scammer message into an existing engagement.
    async fn continue_session(&self, request: ContinueRequest)
        -> FlytrapResult<EngagementResponse>;

    /// Fetches current session metadata.
    async fn fetch_session(&self, session_id: &SessionId) -> FlytrapResult<SessionDetail>;

    /// Fetches one page of the session's message history.
    async fn fetch_messages(
        &self,
        session_id: &SessionId,
        page: HistoryPage,
    ) -> FlytrapResult<HistoryBatch>;

    /// Ends the engagement server-side. Returns the summary when the
    /// service provides one.
    async fn end_session(&self, session_id: &SessionId) -> FlytrapResult<Option<SessionSummary>>;
}

// ----------------------------------------------------------------------------
// Request payloads
// ----------------------------------------------------------------------------

/// Body for opening a new engagement.
#[derive(Debug, Clone, Serialize)]
pub struct StartSessionRequest {
    pub scammer_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

/// Body for continuing an engagement.
#[derive(Debug, Clone, Serialize)]
pub struct ContinueRequest {
    pub session_id: SessionId,
    pub scammer_message: String,
}

// ----------------------------------------------------------------------------
// Response payloads
// ----------------------------------------------------------------------------

/// Service reply to a start or continue call.
///
/// `response` is the honeypot persona's reply text; ids for both turns
/// arrive later over the live stream and are merged in by the store.
#[derive(Debug, Clone, Deserialize)]
pub struct EngagementResponse {
    pub session_id: SessionId,
    pub response: String,
    #[serde(default)]
    pub persona_used: Option<String>,
    #[serde(default)]
    pub scam_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub extracted_intelligence: Option<ExtractedIntelligence>,
    pub turn_number: u32,
    #[serde(default)]
    pub session_status: Option<SessionStatus>,
    #[serde(default)]
    pub should_continue: Option<bool>,
}

/// Intelligence bundled with an engagement response, grouped by kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedIntelligence {
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub upi_ids: Vec<String>,
    #[serde(default)]
    pub bank_accounts: Vec<String>,
    #[serde(default)]
    pub phishing_links: Vec<String>,
}

impl ExtractedIntelligence {
    /// Bulk extractions carry no per-item confidence; they are reported
    /// at a flat 0.9.
    const BULK_CONFIDENCE: f32 = 0.9;

    pub fn is_empty(&self) -> bool {
        self.phone_numbers.is_empty()
            && self.upi_ids.is_empty()
            && self.bank_accounts.is_empty()
            && self.phishing_links.is_empty()
    }

    /// Flattens the per-kind arrays into typed entities.
    pub fn into_entities(self, observed_at: Timestamp) -> Vec<Entity> {
        let mut entities = Entity::batch(
            EntityKind::PhoneNumber,
            self.phone_numbers,
            Self::BULK_CONFIDENCE,
            observed_at,
        );
        entities.extend(Entity::batch(
            EntityKind::UpiId,
            self.upi_ids,
            Self::BULK_CONFIDENCE,
            observed_at,
        ));
        entities.extend(Entity::batch(
            EntityKind::BankAccount,
            self.bank_accounts,
            Self::BULK_CONFIDENCE,
            observed_at,
        ));
        entities.extend(Entity::batch(
            EntityKind::Url,
            self.phishing_links,
            Self::BULK_CONFIDENCE,
            observed_at,
        ));
        entities
    }
}

/// Session metadata as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDetail {
    pub session_id: SessionId,
    pub status: SessionStatus,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub scam_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub turn_count: u32,
    pub started_at: Timestamp,
}

impl SessionDetail {
    pub fn into_session(self) -> Session {
        Session {
            id: self.session_id,
            status: self.status,
            persona: self.persona,
            scam_type: self.scam_type,
            confidence: self.confidence,
            risk_level: self.risk_level,
            turn_count: self.turn_count,
            winding_down: false,
            started_at: self.started_at,
        }
    }
}

/// Cursor over a session's message history, oldest first.
///
/// `after_turn` is exclusive: the service returns messages whose turn is
/// strictly greater, up to `limit` of them, together with the cursor for
/// the next page. A `None` cursor means the history is exhausted.
#[derive(Debug, Clone, Copy)]
pub struct HistoryPage {
    pub after_turn: Option<u32>,
    pub limit: u32,
}

impl HistoryPage {
    /// First page of a session's history.
    pub fn first(limit: u32) -> Self {
        Self {
            after_turn: None,
            limit,
        }
    }

    /// Page following the given turn.
    pub fn after(turn: u32, limit: u32) -> Self {
        Self {
            after_turn: Some(turn),
            limit,
        }
    }
}

/// One page of history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryBatch {
    #[serde(default)]
    pub messages: Vec<LiveMessage>,
    #[serde(default)]
    pub next_cursor: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EndSessionResponse {
    #[serde(default)]
    summary: Option<SessionSummary>,
}

// ----------------------------------------------------------------------------
// HTTP implementation
// ----------------------------------------------------------------------------

/// [`EngagementApi`] over HTTP, one client per process.
#[derive(Debug, Clone)]
pub struct HttpEngagementApi {
    client: Client,
    base_url: String,
}

impl HttpEngagementApi {
    pub fn new(config: &ApiConfig) -> FlytrapResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| {
                FlytrapError::config_error(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> FlytrapResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let endpoint = self.endpoint(path);
        let response = self
            .client
            .post(&endpoint)
            .json(body)
            .send()
            .await
            .map_err(|err| ApiError::Request {
                endpoint: endpoint.clone(),
                reason: err.to_string(),
            })?;
        decode(endpoint, response).await
    }
}

/// Turns a response into `T`, mapping non-success statuses and decode
/// failures into their error variants.
async fn decode<T: DeserializeOwned>(
    endpoint: String,
    response: reqwest::Response,
) -> FlytrapResult<T> {
    let status = response.status();
    let text = response.text().await.map_err(|err| ApiError::Request {
        endpoint: endpoint.clone(),
        reason: err.to_string(),
    })?;
    if !status.is_success() {
        return Err(FlytrapError::api_status(status.as_u16(), text));
    }
    serde_json::from_str(&text)
        .map_err(|err| {
            ApiError::Decode {
                endpoint,
                reason: err.to_string(),
            }
            .into()
        })
}

#[async_trait]
impl EngagementApi for HttpEngagementApi {
    async fn start_session(
        &self,
        request: StartSessionRequest,
    ) -> FlytrapResult<EngagementResponse> {
        self.post_json("/api/engage", &request).await
    }

    async fn continue_session(
        &self,
        request: ContinueRequest,
    ) -> FlytrapResult<EngagementResponse> {
        self.post_json("/api/engage/continue", &request).await
    }

    async fn fetch_session(&self, session_id: &SessionId) -> FlytrapResult<SessionDetail> {
        let endpoint = self.endpoint(&format!("/api/sessions/{}", session_id.as_str()));
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|err| ApiError::Request {
                endpoint: endpoint.clone(),
                reason: err.to_string(),
            })?;
        decode(endpoint, response).await
    }

    async fn fetch_messages(
        &self,
        session_id: &SessionId,
        page: HistoryPage,
    ) -> FlytrapResult<HistoryBatch> {
        let endpoint = self.endpoint(&format!("/api/sessions/{}/messages", session_id.as_str()));
        let mut request = self.client.get(&endpoint).query(&[("limit", page.limit)]);
        if let Some(after_turn) = page.after_turn {
            request = request.query(&[("after_turn", after_turn)]);
        }
        let response = request.send().await.map_err(|err| ApiError::Request {
            endpoint: endpoint.clone(),
            reason: err.to_string(),
        })?;
        decode(endpoint, response).await
    }

    async fn end_session(&self, session_id: &SessionId) -> FlytrapResult<Option<SessionSummary>> {
        let endpoint = self.endpoint(&format!("/api/sessions/{}", session_id.as_str()));
        let response = self
            .client
            .delete(&endpoint)
            .send()
            .await
            .map_err(|err| ApiError::Request {
                endpoint: endpoint.clone(),
                reason: err.to_string(),
            })?;
        let status = response.status();
        let text = response.text().await.map_err(|err| ApiError::Request {
            endpoint: endpoint.clone(),
            reason: err.to_string(),
        })?;
        if !status.is_success() {
            return Err(FlytrapError::api_status(status.as_u16(), text));
        }
        // Some deployments answer a delete with an empty body.
        if text.trim().is_empty() {
            return Ok(None);
        }
        let decoded: EndSessionResponse =
            serde_json::from_str(&text).map_err(|err| ApiError::Decode {
                endpoint,
                reason: err.to_string(),
            })?;
        Ok(decoded.summary)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
