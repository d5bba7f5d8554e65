use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{BPS_DENOMINATOR, COIN_DECIMALS, UNITS_PER_COIN};
use crate::error::AccrueError;

/// Balance in base units (1 coin = 1_000_000_000 units). Never negative.
pub type Balance = u128;

/// Signed ledger amount in base units. Credits are positive, debits negative.
pub type SignedAmount = i128;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── AccountId ────────────────────────────────────────────────────────────────

/// 32-byte account identifier derived as BLAKE3(domain || lowercased handle).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Stable id for a handle. Handles are case-insensitive.
    pub fn for_handle(handle: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"accrue.account.v1");
        hasher.update(handle.trim().to_lowercase().as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Base-58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, AccrueError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| AccrueError::UnknownAccount(format!("{s}: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AccrueError::UnknownAccount(format!("{s}: expected 32 bytes")))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", &self.to_b58()[..8])
    }
}

// ── CredentialHash ───────────────────────────────────────────────────────────

/// Opaque credential digest handed over by the identity provider.
/// The ledger stores it and never interprets it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHash(pub [u8; 32]);

impl CredentialHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialHash({}…)", &self.to_hex()[..8])
    }
}

// ── Amount helpers ───────────────────────────────────────────────────────────

/// Parse a decimal coin string ("0.25", "10", "1.000000001") into base units.
pub fn parse_coins(s: &str) -> Result<Balance, AccrueError> {
    let s = s.trim();
    let bad = || AccrueError::InvalidAmount(format!("not a coin amount: {s:?}"));
    if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
        return Err(bad());
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(bad());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    if frac.len() > COIN_DECIMALS as usize {
        return Err(AccrueError::InvalidAmount(format!(
            "at most {COIN_DECIMALS} decimal places: {s:?}"
        )));
    }
    let whole_units: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| bad())? };
    let mut frac_units: u128 = 0;
    for (i, c) in frac.chars().enumerate() {
        let digit = c.to_digit(10).ok_or_else(bad)? as u128;
        frac_units += digit * 10u128.pow(COIN_DECIMALS - 1 - i as u32);
    }
    whole_units
        .checked_mul(UNITS_PER_COIN)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(bad)
}

/// Render base units as a decimal coin string without trailing zeros.
pub fn format_coins(units: Balance) -> String {
    let whole = units / UNITS_PER_COIN;
    let frac = units % UNITS_PER_COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", frac, width = COIN_DECIMALS as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Signed variant of [`format_coins`].
pub fn format_signed_coins(amount: SignedAmount) -> String {
    if amount < 0 {
        format!("-{}", format_coins(amount.unsigned_abs()))
    } else {
        format_coins(amount as u128)
    }
}

/// Convert a balance amount to a signed ledger amount.
pub fn signed(amount: Balance) -> Result<SignedAmount, AccrueError> {
    SignedAmount::try_from(amount)
        .map_err(|_| AccrueError::InvalidAmount(format!("{amount} units out of range")))
}

/// `amount × bps / 10_000`, rounded down.
pub fn apply_bps(amount: Balance, bps: u32) -> Balance {
    amount.saturating_mul(bps as u128) / BPS_DENOMINATOR
}
