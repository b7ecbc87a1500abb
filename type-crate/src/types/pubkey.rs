use bytemuck::{Pod, Zeroable};
use core::fmt;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// A 32-byte ed25519 public key, rendered as base58 everywhere it leaves the process.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable, Default)]
pub struct Pubkey([u8; 32]);

#[derive(Debug, PartialEq, Eq)]
pub enum ParsePubkeyError {
    Invalid(bs58::decode::Error),
    WrongSize(usize),
}

impl fmt::Display for ParsePubkeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsePubkeyError::Invalid(e) => write!(f, "invalid base58: {e}"),
            ParsePubkeyError::WrongSize(len) => write!(f, "expected 32 bytes, got {len}"),
        }
    }
}

impl std::error::Error for ParsePubkeyError {}

impl Pubkey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Pubkey(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Deterministic key for fixtures and placeholders, every byte set to `seed`.
    pub const fn new_from_seed(seed: u8) -> Self {
        Pubkey([seed; 32])
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl FromStr for Pubkey {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(ParsePubkeyError::Invalid)?;
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParsePubkeyError::WrongSize(bytes.len()))?;
        Ok(Pubkey(array))
    }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_known_mint() {
        let usdc: Pubkey = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".parse().unwrap();
        assert_eq!(
            usdc.to_string(),
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
        );
    }

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(
            "3yZe7d".parse::<Pubkey>(),
            Err(ParsePubkeyError::WrongSize(_))
        ));
        assert!(matches!(
            "0OIl".parse::<Pubkey>(),
            Err(ParsePubkeyError::Invalid(_))
        ));
    }

    #[test]
    fn serializes_as_base58_string() {
        let key = Pubkey::new_from_seed(1);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key));
        assert_eq!(serde_json::from_str::<Pubkey>(&json).unwrap(), key);
    }
}
