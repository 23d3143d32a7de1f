// SPDX-FileCopyrightText: 2024 griff (original Nix.rs)
// SPDX-FileCopyrightText: 2026 Jörg Thalheim (Zb adaptation)
// SPDX-License-Identifier: EUPL-1.2 OR MIT
//
// This crate is derived from Nix.rs (https://github.com/griff/Nix.rs)
// Upstream commit: f5d129b71bb30b476ce21e6da2a53dcb28607a89

//! Nix base32 encoding/decoding.

#[cfg(test)]
use data_encoding::DecodeKind;
use data_encoding::{BitOrder, DecodeError, DecodePartial, Encoding, Specification};
use std::sync::LazyLock;

/// The 32-character alphabet used by Nix's base32 encoding.
///
/// This is the canonical source for the nix-base32 alphabet across the
/// workspace — use this constant instead of duplicating the string.
pub const ALPHABET: &str = "0123456789abcdfghijklmnpqrsvwxyz";

/// The nix-base32 alphabet as a byte slice (convenience alias).
pub const ALPHABET_BYTES: &[u8; 32] = b"0123456789abcdfghijklmnpqrsvwxyz";

/// Nix base32 encoding (lowercase, without padding, LSB first, reversed)
static NIX_BASE32: LazyLock<Encoding> = LazyLock::new(|| {
    let mut spec = Specification::new();
    spec.symbols.push_str(ALPHABET);
    spec.bit_order = BitOrder::LeastSignificantFirst;
    spec.encoding().unwrap()
});

pub const fn encode_len(len: usize) -> usize {
    (8 * len).div_ceil(5)
}

const fn decode_len_internal(len: usize) -> (usize, usize) {
    let trail = len * 5 % 8;
    (len - trail / 5, 5 * len / 8)
}

pub const fn decode_len(len: usize) -> usize {
    let (ilen, olen) = decode_len_internal(len);
    if ilen != len {
        panic!("Invalid base32 length");
    }
    olen
}

#[allow(unsafe_code)]
pub fn encode_string(input: &[u8]) -> String {
    let mut output = NIX_BASE32.encode(input);
    // Nix base32 is reversed
    unsafe { output.as_bytes_mut() }.reverse();
    output
}

pub fn encode_mut(input: &[u8], output: &mut [u8]) {
    // Encode directly into output buffer
    NIX_BASE32.encode_mut(input, output);

    // Reverse for Nix format
    output.reverse();
}

pub fn decode_mut(input: &[u8], output: &mut [u8]) -> Result<usize, DecodePartial> {
    // Reverse the input for decoding
    let mut reversed = input.to_vec();
    reversed.reverse();

    // Decode using data-encoding
    NIX_BASE32.decode_mut(&reversed, output).map_err(|err| {
        // Adjust error position to account for reversal
        let adjusted_pos = input.len() - err.error.position - 1;
        DecodePartial {
            read: adjusted_pos / 8 * 8,
            written: adjusted_pos / 8 * 5,
            error: DecodeError {
                position: adjusted_pos,
                kind: err.error.kind,
            },
        }
    })
}
