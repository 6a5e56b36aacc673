// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The shared string dictionary used by [`super::primitive`]'s string codec.
//!
//! Every entry here is assigned a single-byte code (its index). Adding,
//! removing or reordering entries changes the wire format and therefore
//! requires a version bump of [`super::stream::WIRE_VERSION`].

/// Frequently occurring strings, assigned single-byte dictionary codes by
/// their position in this list. Capped at 128 entries so that a dictionary
/// code always fits in the reserved `0x80..=0xFF` byte range (see
/// [`super::primitive::pack_string`]).
pub(crate) const DICTIONARY: &[&str] = &[
    // Block height tags.
    "latest",
    "earliest",
    "pending",
    "safe",
    "finalized",
    // JSON-RPC envelope boilerplate.
    "2.0",
    "jsonrpc",
    "id",
    "method",
    "params",
    "result",
    "error",
    "code",
    "message",
    "data",
    // Canned JSON-RPC error messages.
    "Parse error",
    "Invalid Request",
    "Method not found",
    "Invalid params",
    "Internal error",
    "no response received from aggregator",
    // Content types.
    "application/octet-stream",
    "application/x-ndjson",
    "application/json",
    // Common eth_ method names (the aggregator whitelist, see crate::provider::WHITELIST).
    "eth_blockNumber",
    "eth_call",
    "eth_chainId",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getCode",
    "eth_getStorageAt",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "net_version",
    "direct_primer",
];

const _: () = assert!(
    DICTIONARY.len() <= 128,
    "dictionary must fit in a single reserved byte range"
);

/// Look up the dictionary code for a string, if it has one.
pub(crate) fn code_for(s: &str) -> Option<u8> {
    DICTIONARY.iter().position(|&d| d == s).map(|i| i as u8)
}

/// Resolve a dictionary code back to its string.
pub(crate) fn string_for(code: u8) -> Option<&'static str> {
    DICTIONARY.get(code as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_entry() {
        for (i, s) in DICTIONARY.iter().enumerate() {
            assert_eq!(code_for(s), Some(i as u8));
            assert_eq!(string_for(i as u8), Some(*s));
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(string_for(255), None);
    }

    #[test]
    fn fits_in_reserved_byte_range() {
        assert!(DICTIONARY.len() <= 128);
    }
}
