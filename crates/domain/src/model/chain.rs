use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::{Address, AddressFormatError};

/// Node families the gateway knows how to talk to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Chain {
    Ethereum,
    Bitcoin,
    Litecoin,
    Dogecoin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    /// Account-model chains queried through the Ethereum JSON-RPC dialect.
    Evm,
    /// Bitcoin-derived UTXO chains queried through the bitcoind dialect.
    Utxo,
}

const BECH32_PREFIXES: &[&str] = &["bc1", "tb1", "bcrt1", "ltc1", "tltc1", "rltc1"];

impl Chain {
    pub fn family(self) -> ChainFamily {
        match self {
            Chain::Ethereum => ChainFamily::Evm,
            Chain::Bitcoin | Chain::Litecoin | Chain::Dogecoin => ChainFamily::Utxo,
        }
    }

    /// Number of decimal places between the minor and the major unit.
    pub fn decimals(self) -> u32 {
        match self.family() {
            ChainFamily::Evm => 18,
            ChainFamily::Utxo => 8,
        }
    }

    /// One full major unit (1 ether, 1 BTC, ...) expressed in minor units.
    pub fn one_unit(self) -> U256 {
        U256::exp10(self.decimals() as usize)
    }

    /// Upper-case prefix used for per-chain environment variables.
    pub fn env_prefix(self) -> String {
        self.as_ref().to_ascii_uppercase()
    }

    /// Validates `raw` and returns it in the chain's canonical textual form.
    pub fn canonical_address(self, raw: &str) -> Result<Address, AddressFormatError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AddressFormatError::Empty);
        }
        match self.family() {
            ChainFamily::Evm => canonical_evm_address(trimmed),
            ChainFamily::Utxo => canonical_utxo_address(trimmed),
        }
    }
}

fn canonical_evm_address(raw: &str) -> Result<Address, AddressFormatError> {
    let body = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or(AddressFormatError::MissingPrefix)?;
    if body.len() != 40 {
        return Err(AddressFormatError::WrongLength {
            expected: 40,
            actual: body.len(),
        });
    }
    let lower = body.to_ascii_lowercase();
    hex::decode(&lower).map_err(|_| AddressFormatError::NonHex)?;
    Ok(Address::new(eip55_checksum(&lower)))
}

/// Applies the EIP-55 mixed-case checksum to 40 lowercase hex characters.
fn eip55_checksum(lower_hex: &str) -> String {
    let digest = Keccak256::digest(lower_hex.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (index, ch) in lower_hex.chars().enumerate() {
        let byte = digest[index / 2];
        let nibble = if index % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn canonical_utxo_address(raw: &str) -> Result<Address, AddressFormatError> {
    if raw.chars().any(|c| c.is_whitespace() || !c.is_ascii()) {
        return Err(AddressFormatError::InvalidCharacters);
    }
    let lower = raw.to_ascii_lowercase();
    if BECH32_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
        return Ok(Address::new(lower));
    }
    Ok(Address::new(raw))
}
