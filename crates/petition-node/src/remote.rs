//! Shared row store over a PostgREST-style HTTP API (Supabase).
//!
//! - `GET  {url}/rest/v1/{table}?select=*&order=timestamp.desc&limit=N`
//! - `POST {url}/rest/v1/{table}`
//!
//! Both requests carry the access key as `apikey` and as a bearer token.

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use petition_core::identity::{FALLBACK_NAME, FALLBACK_PROOF};
use petition_core::{Error as CoreError, RowStore, SignatureRecord};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// A signature as stored in the remote table (snake_case columns).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub proof: Option<String>,
    /// Milliseconds since the epoch; a missing or null value reads as 0
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl SignatureRow {
    /// Convert to a record, generating an id when the row has none.
    pub fn into_record(self) -> SignatureRecord {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        SignatureRecord::new(
            non_empty(self.id).unwrap_or_else(SignatureRecord::generate_id),
            non_empty(self.user_id),
            non_empty(self.name).unwrap_or_else(|| FALLBACK_NAME.to_string()),
            non_empty(self.proof).unwrap_or_else(|| FALLBACK_PROOF.to_string()),
            self.timestamp.unwrap_or(0),
        )
    }
}

impl From<&SignatureRecord> for SignatureRow {
    fn from(record: &SignatureRecord) -> Self {
        Self {
            id: Some(record.id.clone()),
            user_id: record.user_id.clone(),
            name: Some(record.name.clone()),
            proof: Some(record.proof.clone()),
            timestamp: Some(record.timestamp),
        }
    }
}

/// HTTP client for the shared signature table.
pub struct RestRowStore {
    config: RemoteConfig,
    client: Client,
}

impl RestRowStore {
    /// Create a client for `config`.
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let key = header::HeaderValue::from_str(&config.api_key)
            .map_err(|e| Error::Config(format!("invalid store key: {}", e)))?;
        let bearer = header::HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| Error::Config(format!("invalid store key: {}", e)))?;
        headers.insert("apikey", key);
        headers.insert(header::AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.url, self.config.table)
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        format!("status {}: {}", status, body)
    }
}

#[async_trait]
impl RowStore for RestRowStore {
    async fn select_recent(&self, limit: usize) -> petition_core::Result<Vec<SignatureRecord>> {
        let url = format!(
            "{}?select=*&order=timestamp.desc&limit={}",
            self.table_url(),
            limit
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::RemoteRead(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::RemoteRead(Self::error_body(response).await));
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| CoreError::RemoteRead(e.to_string()))?;

        // One malformed row is skipped rather than failing the whole load.
        let records = rows
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<SignatureRow>(raw) {
                Ok(row) => Some(row.into_record()),
                Err(e) => {
                    warn!(error = %e, "skipping malformed signature row");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    async fn insert(&self, record: &SignatureRecord) -> petition_core::Result<()> {
        let response = self
            .client
            .post(self.table_url())
            .header("Prefer", "return=minimal")
            .json(&SignatureRow::from(record))
            .send()
            .await
            .map_err(|e| CoreError::RemoteWrite(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::RemoteWrite(Self::error_body(response).await));
        }
        Ok(())
    }
}
