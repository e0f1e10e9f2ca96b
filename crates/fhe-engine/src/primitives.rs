//! Account addresses, ciphertext handles and FHE type tags.
//!
//! Both addresses and handles travel as `0x`-prefixed lowercase hex, on the
//! wire and in JSON.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tiny_keccak::{Hasher, Keccak};

use crate::{FheError, Result};

/// Handle byte carrying the FHE type tag.
const TYPE_BYTE: usize = 30;

/// Handle byte carrying the handle format version.
const VERSION_BYTE: usize = 31;

/// Computes keccak256 over the concatenation of `parts`.
#[must_use]
pub fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N]> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).map_err(|e| FheError::InvalidEncoding(e.to_string()))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        FheError::InvalidEncoding(format!("expected {N} bytes, got {}", v.len()))
    })
}

/// A 20-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Derives the account address of a secp256k1 public key: the last 20
    /// bytes of keccak256 over the uncompressed point without its prefix.
    #[must_use]
    pub fn from_public_key(pk: &secp256k1::PublicKey) -> Self {
        let uncompressed = pk.serialize_uncompressed();
        let digest = keccak256(&[&uncompressed[1..]]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Self(out)
    }

    /// Left-pads the address to a 32-byte ABI word.
    #[must_use]
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = FheError;

    fn from_str(s: &str) -> Result<Self> {
        decode_fixed::<20>(s).map(Self)
    }
}

/// FHE type tag stored in byte 30 of every handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FheType {
    /// Encrypted boolean.
    Bool,
    /// Encrypted 8-bit unsigned integer.
    Uint8,
    /// Encrypted 16-bit unsigned integer.
    Uint16,
    /// Encrypted 32-bit unsigned integer.
    Uint32,
    /// Encrypted 64-bit unsigned integer.
    Uint64,
}

impl FheType {
    /// The tag byte written into handles.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::Bool => 0,
            Self::Uint8 => 2,
            Self::Uint16 => 3,
            Self::Uint32 => 4,
            Self::Uint64 => 5,
        }
    }

    /// Parses a tag byte.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Bool),
            2 => Some(Self::Uint8),
            3 => Some(Self::Uint16),
            4 => Some(Self::Uint32),
            5 => Some(Self::Uint64),
            _ => None,
        }
    }

    /// Plaintext width in bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::Uint8 => 8,
            Self::Uint16 => 16,
            Self::Uint32 => 32,
            Self::Uint64 => 64,
        }
    }

    /// Largest plaintext representable by this type.
    #[must_use]
    pub fn max_value(self) -> u64 {
        match self.bits() {
            64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }
}

impl fmt::Display for FheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("ebool"),
            other => write!(f, "euint{}", other.bits()),
        }
    }
}

/// Opaque 32-byte reference to a value encrypted under the FHE key.
///
/// [`Handle::ZERO`] means "no value recorded". Any other handle refers to a
/// value whose plaintext is unknown until decrypted; that plaintext never
/// changes for the lifetime of the handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub [u8; 32]);

impl Handle {
    /// The "no value recorded" sentinel.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Current handle format version.
    pub const VERSION: u8 = 0;

    /// Builds a handle from a 32-byte digest, stamping index, chain id, type
    /// and version into the trailing bytes.
    #[must_use]
    pub fn compose(digest: &[u8; 32], index: u8, chain_id: u64, ty: FheType) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..21].copy_from_slice(&digest[..21]);
        bytes[21] = index;
        bytes[22..30].copy_from_slice(&chain_id.to_be_bytes());
        bytes[TYPE_BYTE] = ty.tag();
        bytes[VERSION_BYTE] = Self::VERSION;
        Self(bytes)
    }

    /// Whether this is the "no value" sentinel.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The FHE type tag carried by the handle.
    ///
    /// # Errors
    /// Returns `FheError::InvalidEncoding` for an unknown tag.
    pub fn fhe_type(&self) -> Result<FheType> {
        FheType::from_tag(self.0[TYPE_BYTE]).ok_or_else(|| {
            FheError::InvalidEncoding(format!("unknown type tag {}", self.0[TYPE_BYTE]))
        })
    }

    /// The chain id stamped into the handle.
    #[must_use]
    pub fn chain_id(&self) -> u64 {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[22..30]);
        u64::from_be_bytes(id)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({self})")
    }
}

impl FromStr for Handle {
    type Err = FheError;

    fn from_str(s: &str) -> Result<Self> {
        decode_fixed::<32>(s).map(Self)
    }
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

hex_serde!(Address);
hex_serde!(Handle);
