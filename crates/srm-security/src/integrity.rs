// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blob integrity — SHA-256 framing for the persisted security resources.
//
// Each persisted slot is
//
//   magic "SRM1" | generation u64 BE | length u32 BE | sha256(payload) | payload
//
// so a reader can tell a torn or tampered slot from a valid one, and pick
// the newest valid slot by generation.

use sha2::{Digest, Sha256};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"SRM1";
const DIGEST_LEN: usize = 32;
pub const HEADER_LEN: usize = MAGIC.len() + 8 + 4 + DIGEST_LEN;

/// Why a slot could not be trusted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("slot is shorter than its header ({0} bytes)")]
    Truncated(usize),

    #[error("slot does not start with the SRM1 magic")]
    BadMagic,

    #[error("declared length {declared} does not match {actual} payload bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

/// A verified slot.
#[derive(Debug, PartialEq, Eq)]
pub struct Sealed<'a> {
    pub generation: u64,
    pub payload: &'a [u8],
}

/// SHA-256 of `data`.
pub fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// SHA-256 of `data` as a lowercase hex string, for logs.
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(digest(data))
}

/// Frame `payload` for storage.
pub fn seal(generation: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&generation.to_be_bytes());
    // Payloads are a few KiB at most; anything beyond u32 would be refused
    // by the length check on the way back in.
    out.extend_from_slice(&u32::try_from(payload.len()).unwrap_or(u32::MAX).to_be_bytes());
    out.extend_from_slice(&digest(payload));
    out.extend_from_slice(payload);
    out
}

/// Verify a framed slot and borrow its payload.
pub fn unseal(bytes: &[u8]) -> Result<Sealed<'_>, BlobError> {
    if bytes.len() < HEADER_LEN {
        return Err(BlobError::Truncated(bytes.len()));
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(BlobError::BadMagic);
    }
    let (generation, rest) = rest.split_at(8);
    let (length, rest) = rest.split_at(4);
    let (expected, payload) = rest.split_at(DIGEST_LEN);

    let generation = u64::from_be_bytes(generation.try_into().unwrap_or([0; 8]));
    let declared = u32::from_be_bytes(length.try_into().unwrap_or([0; 4])) as usize;
    if declared != payload.len() {
        return Err(BlobError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    let actual = digest(payload);
    if actual[..] != *expected {
        return Err(BlobError::DigestMismatch {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        });
    }
    Ok(Sealed {
        generation,
        payload,
    })
}
