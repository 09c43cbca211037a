//! Stable digest over the schema surface a formula touches.
//!
//! The signature covers referenced models and fields only, never operators or
//! literals, so two formulas over the same columns share a signature. The
//! report query cache keys on it and the staleness gate compares it against
//! the live catalog.

use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use xxhash_rust::xxh64::Xxh64;

use crate::expr::deps::DependencyMetadata;

/// Bumped whenever the hashed layout changes.
pub const SIGNATURE_FORMAT_VERSION: u8 = 1;

/// Deterministic 64-bit model graph signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ModelGraphSignature(u64);

impl ModelGraphSignature {
    /// Computes the signature of `metadata`.
    pub fn of(metadata: &DependencyMetadata) -> Self {
        let mut hasher = Xxh64::new(0);
        hasher.write(&[SIGNATURE_FORMAT_VERSION]);
        let fields = metadata.referenced_fields();
        write_len(&mut hasher, fields.len());
        for (model, model_fields) in fields {
            write_str(&mut hasher, model);
            write_len(&mut hasher, model_fields.len());
            for field in model_fields {
                write_str(&mut hasher, field);
            }
        }
        ModelGraphSignature(hasher.finish())
    }

    /// Wraps a raw digest.
    pub const fn from_u64(raw: u64) -> Self {
        ModelGraphSignature(raw)
    }

    /// Raw digest.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// 16 lowercase hex characters, big-endian.
    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_be_bytes())
    }
}

// Lengths are written little-endian explicitly so the digest does not depend
// on the host byte order.
fn write_len(hasher: &mut Xxh64, len: usize) {
    hasher.write(&(len as u64).to_le_bytes());
}

fn write_str(hasher: &mut Xxh64, value: &str) {
    write_len(hasher, value.len());
    hasher.write(value.as_bytes());
}

impl fmt::Display for ModelGraphSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Failure to parse a hex signature.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignatureParseError {
    /// Input was not valid hex.
    #[error("signature is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// Input decoded to the wrong number of bytes.
    #[error("signature must be 8 bytes (got {0})")]
    Length(usize),
}

impl FromStr for ModelGraphSignature {
    type Err = SignatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SignatureParseError::Length(bytes.len()))?;
        Ok(ModelGraphSignature(u64::from_be_bytes(raw)))
    }
}

impl Serialize for ModelGraphSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ModelGraphSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
