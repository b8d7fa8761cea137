//! Structural address checks.
//!
//! Checksums are verified by the chain client; this module only looks at
//! prefix, length and alphabet, which is enough to route transfers and to
//! reject obviously malformed overrides.

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const ADDRESS_LENGTH: usize = 36;

/// Kind of account an address designates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Key-controlled account (tz1, tz2, tz3, tz4)
    Implicit,
    /// Originated smart contract (KT1)
    Contract,
}

/// Classify an address, `None` when it is structurally invalid.
pub fn classify(address: &str) -> Option<AddressKind> {
    if address.len() != ADDRESS_LENGTH || !address.chars().all(|c| BASE58_ALPHABET.contains(c)) {
        return None;
    }
    match &address[..3] {
        "tz1" | "tz2" | "tz3" | "tz4" => Some(AddressKind::Implicit),
        "KT1" => Some(AddressKind::Contract),
        _ => None,
    }
}

pub fn is_valid_address(address: &str) -> bool {
    classify(address).is_some()
}

/// True for KT1 destinations. Does not validate the rest of the address.
pub fn is_contract(address: &str) -> bool {
    address.starts_with("KT1")
}
