//! Signature record model.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One signature on the petition.
///
/// Records are created at bootstrap from the seed set, fetched in bulk from the
/// remote store, or appended after a successful sign. They are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    /// Unique identifier within a store snapshot
    pub id: String,

    /// Authenticated identity that signed (absent for seed records)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Display name, never empty
    pub name: String,

    /// Human-readable attestation, e.g. "Twitter • @handle"
    pub proof: String,

    /// Creation time in epoch milliseconds
    pub timestamp: u64,
}

const MINUTE_MS: u64 = 60 * 1000;

impl SignatureRecord {
    /// Create a record with an explicit id.
    pub fn new(id: String, user_id: Option<String>, name: String, proof: String, timestamp: u64) -> Self {
        Self {
            id,
            user_id,
            name,
            proof,
            timestamp,
        }
    }

    /// Generate a fresh record id.
    ///
    /// Hex of a Blake3 hash over the current time and 16 random bytes.
    pub fn generate_id() -> String {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&now_millis().to_le_bytes());
        hasher.update(&nonce);
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }

    /// Whether this record was signed by `user_id`.
    pub fn signed_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    /// The demo signatures shown before anyone has signed.
    ///
    /// Ids are stable (`seed-1`..`seed-4`); timestamps are relative to `now`.
    pub fn seeds(now: u64) -> Vec<Self> {
        let seed = |id: &str, name: &str, proof: &str, minutes_ago: u64| {
            Self::new(
                id.to_string(),
                None,
                name.to_string(),
                proof.to_string(),
                now.saturating_sub(minutes_ago * MINUTE_MS),
            )
        };

        vec![
            seed("seed-1", "Hina — Shibuya validator", "Solana wallet • 7gXK...fp9", 4),
            seed("seed-2", "Maya — DeFi dev", "Twitter • @defi_maya", 16),
            seed("seed-3", "Ken • NFT ops", "Phantom wallet • C8vw...9sj", 40),
            seed("seed-4", "Yuto — Breakpointer", "Twitter • @tokyobreak", 90),
        ]
    }
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Relative age label for the activity feed ("3 mins ago", "1 day ago").
pub fn format_ago(timestamp: u64, now: u64) -> String {
    let minutes = now.saturating_sub(timestamp) / MINUTE_MS;
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes == 1 {
        return "1 min ago".to_string();
    }
    if minutes < 60 {
        return format!("{} mins ago", minutes);
    }

    let hours = minutes / 60;
    if hours == 1 {
        return "1 hour ago".to_string();
    }
    if hours < 24 {
        return format!("{} hours ago", hours);
    }

    let days = hours / 24;
    if days == 1 {
        "1 day ago".to_string()
    } else {
        format!("{} days ago", days)
    }
}
