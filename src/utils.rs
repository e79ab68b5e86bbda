//! Utility functions for identifiers and hashing

use bech32::Bech32m;
use uuid7::uuid7;

use super::error::Result;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Encode a value into CBOR and return the hex SHA-256 of the encoding alongside it.
pub fn encode_and_hash<T: minicbor::Encode<()>>(value: &T) -> Result<(String, Vec<u8>)> {
    let cbor = minicbor::to_vec(value)?;
    let hash = sha256::digest(&cbor);

    Ok((hash, cbor))
}
