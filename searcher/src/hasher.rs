use primitive_types::U256;
use shared::types::Address;
use tiny_keccak::{Hasher, Keccak};

/// keccak256 over tightly packed values, matching the ledger's
/// `abi.encodePacked` layout for `uint256`, `address` and `string`.
pub struct PackedKeccak(Keccak);

impl PackedKeccak {
    pub fn new() -> Self {
        Self(Keccak::v256())
    }

    pub fn uint256(mut self, value: U256) -> Self {
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        self.0.update(&buf);
        self
    }

    pub fn address(mut self, address: &Address) -> Self {
        self.0.update(address.as_bytes());
        self
    }

    pub fn string(mut self, value: &str) -> Self {
        self.0.update(value.as_bytes());
        self
    }

    pub fn finalize(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.finalize(&mut out);
        out
    }

    pub fn finalize_hex(self) -> String {
        format!("0x{}", hex::encode(self.finalize()))
    }
}

impl Default for PackedKeccak {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders `nonce` as a zero-padded lowercase hex key of `difficulty` digits.
pub fn render_key(nonce: U256, difficulty: u32) -> String {
    let mut buf = [0u8; 32];
    nonce.to_big_endian(&mut buf);
    let full = hex::encode(buf);
    full[full.len() - difficulty as usize..].to_string()
}

pub fn salted_key(key: &str, salt: &str) -> String {
    if salt.is_empty() {
        key.to_string()
    } else {
        format!("{key}~{salt}")
    }
}

/// Hash of one candidate key for a round.
pub fn key_hash(random: U256, address: &Address, salted_key: &str) -> [u8; 32] {
    PackedKeccak::new().uint256(random).address(address).string(salted_key).finalize()
}

/// A key wins when its hex text appears anywhere in the hex form of its hash.
pub fn key_matches(key: &str, hash: &[u8; 32]) -> bool {
    hex::encode(hash).contains(key)
}

/// Full check of a key as the ledger would run it.
pub fn verify_key(random: U256, address: &Address, key: &str, salt: &str) -> bool {
    key_matches(key, &key_hash(random, address, &salted_key(key, salt)))
}
