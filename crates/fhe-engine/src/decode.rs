//! Decoding of plaintext strings returned by user decryption.

use std::fmt;

use crate::primitives::{FheType, Handle};
use crate::{FheError, Result};

/// The single plaintext encoding that decodes to boolean `true`.
///
/// The engine returns plaintexts as decimal strings; an `ebool` resolves to
/// `"1"` or `"0"`. Any representation other than this one decodes to `false`.
pub const TRUE_ENCODING: &str = "1";

/// A decrypted value, typed by its handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearValue {
    /// Plaintext of an `ebool` handle.
    Bool(bool),
    /// Plaintext of an `euintN` handle.
    Uint(u64),
}

impl ClearValue {
    /// Decodes `raw` according to the type tag carried by `handle`.
    ///
    /// # Errors
    /// Returns `FheError::InvalidEncoding` for an unknown type tag and
    /// `FheError::Decode` when a numeric plaintext does not parse or exceeds
    /// the type's width.
    pub fn decode(handle: &Handle, raw: &str) -> Result<Self> {
        let ty = handle.fhe_type()?;
        match ty {
            FheType::Bool => Ok(Self::Bool(raw == TRUE_ENCODING)),
            _ => {
                let value: u64 = raw.trim().parse().map_err(|_| FheError::Decode {
                    raw: raw.to_string(),
                    ty,
                })?;
                if value > ty.max_value() {
                    return Err(FheError::Decode {
                        raw: raw.to_string(),
                        ty,
                    });
                }
                Ok(Self::Uint(value))
            }
        }
    }

    /// The boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Uint(_) => None,
        }
    }

    /// The integer, if this is one.
    #[must_use]
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for ClearValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Uint(v) => write!(f, "{v}"),
        }
    }
}
