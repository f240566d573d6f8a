//! Extracted-intelligence records
//!
//! Entities are pieces of actionable intelligence pulled out of scammer
//! messages by the engagement service: payment handles, contact points,
//! phishing infrastructure. The client only collects and deduplicates them.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Entity Kind
// ----------------------------------------------------------------------------

/// Category of an extracted entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    PhoneNumber,
    UpiId,
    BankAccount,
    IfscCode,
    Email,
    Url,
    CryptoWallet,
}

impl EntityKind {
    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::PhoneNumber => "PHONE_NUMBER",
            EntityKind::UpiId => "UPI_ID",
            EntityKind::BankAccount => "BANK_ACCOUNT",
            EntityKind::IfscCode => "IFSC_CODE",
            EntityKind::Email => "EMAIL",
            EntityKind::Url => "URL",
            EntityKind::CryptoWallet => "CRYPTO_WALLET",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Entity
// ----------------------------------------------------------------------------

/// One extracted piece of intelligence
///
/// Two entities are the same observation when they share kind and value;
/// the store keeps only the first occurrence per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub value: String,
    /// Extraction confidence in `[0.0, 1.0]`
    pub confidence: f32,
    /// When this entity was observed by the client
    pub observed_at: Timestamp,
}

impl Entity {
    pub fn new(
        kind: EntityKind,
        value: impl Into<String>,
        confidence: f32,
        observed_at: Timestamp,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            confidence,
            observed_at,
        }
    }

    /// Build one entity per value, all sharing a kind and confidence
    ///
    /// Engagement responses deliver intelligence as per-kind value arrays;
    /// this flattens one such array into typed records.
    pub fn batch<I, S>(
        kind: EntityKind,
        values: I,
        confidence: f32,
        observed_at: Timestamp,
    ) -> Vec<Entity>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        values
            .into_iter()
            .map(|value| Entity::new(kind, value, confidence, observed_at))
            .collect()
    }

    /// Identity key used for deduplication
    pub fn dedup_key(&self) -> (EntityKind, &str) {
        (self.kind, self.value.as_str())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_wire_names() {
        assert_eq!(EntityKind::PhoneNumber.as_str(), "PHONE_NUMBER");
        assert_eq!(EntityKind::CryptoWallet.as_str(), "CRYPTO_WALLET");

        let json = serde_json::to_string(&EntityKind::UpiId).unwrap();
        assert_eq!(json, "\"UPI_ID\"");
        let back: EntityKind = serde_json::from_str("\"IFSC_CODE\"").unwrap();
        assert_eq!(back, EntityKind::IfscCode);
    }

    #[test]
    fn test_batch_builds_one_record_per_value() {
        let ts = Timestamp::new(5_000);
        let entities = Entity::batch(
            EntityKind::PhoneNumber,
            ["+911234567890", "+919999999999"],
            0.9,
            ts,
        );
        assert_eq!(entities.len(), 2);
        assert!(entities.iter().all(|e| e.kind == EntityKind::PhoneNumber));
        assert!(entities.iter().all(|e| (e.confidence - 0.9).abs() < f32::EPSILON));
    }

    #[test]
    fn test_dedup_key_ignores_confidence() {
        let a = Entity::new(EntityKind::Url, "http://bad.example", 0.9, Timestamp::new(1));
        let b = Entity::new(EntityKind::Url, "http://bad.example", 0.5, Timestamp::new(2));
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
