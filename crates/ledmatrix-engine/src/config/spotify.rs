use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stored OAuth state for the "now playing" integration. Tokens are persisted as empty strings
/// when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyData {
    #[serde(default, serialize_with = "none_as_empty", deserialize_with = "empty_as_none")]
    pub access_token: Option<String>,
    #[serde(default, serialize_with = "none_as_empty", deserialize_with = "empty_as_none")]
    pub refresh_token: Option<String>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub expires_at: i64,
}

impl SpotifyData {
    pub fn has_auth(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some() && self.expires_at != 0
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        self.is_expired_at(now)
    }
}

fn none_as_empty<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(value.as_deref().unwrap_or(""))
}

fn empty_as_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.filter(|s| !s.is_empty()))
}
