//! Minimal ABI word encoding/decoding — just enough to build the read
//! calls this crate needs and to decode their tuple/scalar returns.
//! Ported from `services/blockchain.py`'s hand-rolled hex helpers; a
//! full ABI crate would be overkill for three fixed call shapes.

use alloy_primitives::Address;
use synod_core::Error;

pub fn encode_address_arg(address: Address) -> String {
    hex::encode(address.into_word())
}

pub fn encode_uint256_arg(value: u64) -> String {
    format!("{value:064x}")
}

/// Splits a `0x`-prefixed ABI return blob into 32-byte words, each
/// returned as the low 8 bytes' `i64` value (every value this crate
/// decodes — balances, profit sums, flags — fits in that range).
pub fn decode_words(data: &str) -> Result<Vec<i64>, Error> {
    let payload = data.strip_prefix("0x").ok_or_else(|| Error::ChainTx("invalid_payload:missing_0x_prefix".to_string()))?;
    if payload.len() % 64 != 0 {
        return Err(Error::ChainTx("invalid_payload:bad_abi_length".to_string()));
    }
    let mut words = Vec::with_capacity(payload.len() / 64);
    for chunk in payload.as_bytes().chunks(64) {
        let chunk = std::str::from_utf8(chunk).map_err(|_| Error::ChainTx("invalid_payload:non_utf8_word".to_string()))?;
        let bytes = hex::decode(chunk).map_err(|_| Error::ChainTx("invalid_payload:non_hex_word".to_string()))?;
        let low8: [u8; 8] = bytes[24..32].try_into().expect("32-byte word sliced to 8");
        words.push(i64::from_be_bytes(low8));
    }
    Ok(words)
}

pub fn decode_single_uint(data: &str) -> Result<i64, Error> {
    let words = decode_words(data)?;
    words.into_iter().next().ok_or_else(|| Error::ChainTx("invalid_payload:empty_abi_response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint256_arg_is_left_padded() {
        assert_eq!(encode_uint256_arg(255), "0".repeat(62) + "ff");
    }

    #[test]
    fn decode_words_splits_into_32_byte_chunks() {
        let data = format!("0x{}{}", "0".repeat(63) + "1", "0".repeat(63) + "2");
        let words = decode_words(&data).unwrap();
        assert_eq!(words, vec![1, 2]);
    }

    #[test]
    fn decode_words_rejects_misaligned_payload() {
        assert!(decode_words("0x00").is_err());
    }
}
