use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use primitive_types::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::AddressError;

/// Highest difficulty a round can carry: a key longer than the 64 hex chars
/// of a keccak digest can never match.
pub const MAX_DIFFICULTY: u32 = 64;

// 20-byte account address, rendered as lowercase `0x` hex
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if raw.len() != 40 {
            return Err(AddressError::Length(raw.len()));
        }
        let mut out = [0u8; 20];
        hex::decode_to_slice(raw, &mut out).map_err(|_| AddressError::NotHex(s.to_string()))?;
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(de::Error::custom)
    }
}

/// Public state of the current mining round as published by the ledger.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Round {
    pub id: U256,
    /// required key length in hex digits
    pub difficulty: u32,
    #[serde(rename = "winnerscnt")]
    pub winner_count: u32,
    /// seconds since epoch, `0` while the deadline is not revealed
    pub deadline: u64,
    pub random: U256,
}

impl Round {
    pub fn has_deadline(&self) -> bool {
        self.deadline != 0
    }
}

// a key whose hash matched, ready to be posted
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Solution {
    pub address: Address,
    pub key: String,
    pub salt: String,
}

/// Decoded `KeyValidated` ledger event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KeyValidated {
    #[serde(rename = "blockid")]
    pub round_id: U256,
    pub address: Address,
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips_through_display() {
        let text = "0x8a640bde38533b0a3918a65bfc68446204d29963";
        let addr: Address = text.parse().unwrap();
        assert_eq!(addr.to_string(), text);

        let upper: Address = "8A640BDE38533B0A3918A65BFC68446204D29963".parse().unwrap();
        assert_eq!(upper, addr);
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!(matches!("0x1234".parse::<Address>(), Err(AddressError::Length(4))));
        assert!(matches!(
            "0xzz640bde38533b0a3918a65bfc68446204d29963".parse::<Address>(),
            Err(AddressError::NotHex(_))
        ));
    }

    #[test]
    fn round_uses_ledger_field_names() {
        let json = r#"{"id":"0x64","difficulty":8,"winnerscnt":2,"deadline":0,"random":"0x1"}"#;
        let round: Round = serde_json::from_str(json).unwrap();
        assert_eq!(round.id, U256::from(100));
        assert_eq!(round.winner_count, 2);
        assert!(!round.has_deadline());
    }
}
