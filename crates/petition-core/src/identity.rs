//! Identity snapshot adapter.
//!
//! Turns the identity provider's user object into the display identity that a
//! signature carries. Everything here is pure: a missing field degrades to the
//! next fallback, never to an error.
//!
//! Name resolution: profile name, then `@handle`, then shortened wallet
//! address, then [`FALLBACK_NAME`].
//!
//! Proof resolution: `Twitter • @handle`, then `<chain label> • <short
//! address>`, then [`FALLBACK_PROOF`].

use crate::record::SignatureRecord;
use serde::{Deserialize, Serialize};

/// Display name used when the profile carries nothing usable.
pub const FALLBACK_NAME: &str = "Privy user";

/// Proof used when the profile has neither a social handle nor a wallet.
pub const FALLBACK_PROOF: &str = "Privy verification";

/// User object as supplied by the identity provider.
///
/// Every field is optional; providers omit whatever the user never linked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Provider-scoped user id
    #[serde(default)]
    pub id: Option<String>,

    /// Explicit profile name
    #[serde(default)]
    pub name: Option<String>,

    /// Linked wallets, primary first
    #[serde(default)]
    pub wallets: Vec<LinkedWallet>,

    /// Single linked wallet (older provider payloads)
    #[serde(default)]
    pub wallet: Option<LinkedWallet>,

    /// Linked Twitter account
    #[serde(default)]
    pub twitter: Option<TwitterAccount>,
}

/// A wallet linked to a provider account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkedWallet {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub chain_type: Option<String>,
}

/// A Twitter account linked to a provider account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TwitterAccount {
    #[serde(default)]
    pub username: Option<String>,
}

/// Chain family of a wallet. Only affects label text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
    Solana,
    Other,
}

impl ChainType {
    /// Exactly `"solana"` is Solana; any other value, or none, is not.
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("solana") => Self::Solana,
            _ => Self::Other,
        }
    }

    /// Label shown in the proof string.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Solana => "Solana wallet",
            Self::Other => "Wallet",
        }
    }
}

/// Normalized wallet of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletInfo {
    None,
    Wallet { chain: ChainType, address: String },
}

impl WalletInfo {
    /// Pick the profile's primary wallet: first of `wallets`, else `wallet`.
    ///
    /// A wallet without an address is treated as no wallet.
    pub fn from_profile(profile: &UserProfile) -> Self {
        let wallet = profile.wallets.first().or(profile.wallet.as_ref());
        match wallet {
            Some(w) => match non_empty(w.address.as_deref()) {
                Some(address) => Self::Wallet {
                    chain: ChainType::parse(w.chain_type.as_deref()),
                    address: address.to_string(),
                },
                None => Self::None,
            },
            None => Self::None,
        }
    }

    /// Shortened address, if any.
    pub fn short_address(&self) -> Option<String> {
        match self {
            Self::Wallet { address, .. } => Some(shorten_address(address)),
            Self::None => None,
        }
    }

    /// `<chain label> • <short address>`, if any.
    pub fn proof(&self) -> Option<String> {
        match self {
            Self::Wallet { chain, address } => {
                Some(format!("{} • {}", chain.label(), shorten_address(address)))
            }
            Self::None => None,
        }
    }
}

/// Canonical display identity derived at sign time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub display_name: String,
    pub proof: String,
    pub user_id: Option<String>,
}

impl IdentitySnapshot {
    /// Resolve name and proof from a provider profile.
    pub fn from_profile(profile: &UserProfile) -> Self {
        let wallet = WalletInfo::from_profile(profile);
        let handle = profile
            .twitter
            .as_ref()
            .and_then(|t| non_empty(t.username.as_deref()));

        let display_name = non_empty(profile.name.as_deref())
            .map(str::to_string)
            .or_else(|| handle.map(|h| format!("@{}", h)))
            .or_else(|| wallet.short_address())
            .unwrap_or_else(|| FALLBACK_NAME.to_string());

        let proof = handle
            .map(|h| format!("Twitter • @{}", h))
            .or_else(|| wallet.proof())
            .unwrap_or_else(|| FALLBACK_PROOF.to_string());

        Self {
            display_name,
            proof,
            user_id: non_empty(profile.id.as_deref()).map(str::to_string),
        }
    }

    /// Shape a signature record from this identity.
    pub fn into_record(self, id: String, timestamp: u64) -> SignatureRecord {
        SignatureRecord::new(id, self.user_id, self.display_name, self.proof, timestamp)
    }
}

/// First 4 and last 4 characters joined by `...`; empty input gives `""`.
pub fn shorten_address(address: &str) -> String {
    if address.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = address.chars().collect();
    let head: String = chars.iter().take(4).collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("{}...{}", head, tail)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
