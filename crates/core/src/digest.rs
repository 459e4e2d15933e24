//! Fixed-width digest values shared by every tree in the workspace

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Digest width in bytes (256-bit hashes)
pub const DIGEST_LEN: usize = 32;

/// Digest width in hex characters
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

/// A 256-bit hash output.
///
/// Rendered and serialized as lowercase hex; parsing accepts either case.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// All-zero digest
    pub const ZERO: Self = Self([0u8; DIGEST_LEN]);

    /// Wrap raw bytes
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex digest, case-insensitive.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        if !is_valid_digest(s) {
            return Err(Error::InvalidDigest(s.to_string()));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::InvalidDigest(s.to_string()))?;
        Ok(Self(bytes))
    }

    /// Bit `index` counted from the most significant bit of byte 0.
    ///
    /// Indices past the end read as `false`.
    pub const fn bit(&self, index: usize) -> bool {
        if index >= DIGEST_LEN * 8 {
            return false;
        }
        (self.0[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Copy of this digest with bit `index` inverted
    pub const fn with_bit_flipped(mut self, index: usize) -> Self {
        if index < DIGEST_LEN * 8 {
            self.0[index / 8] ^= 1 << (7 - index % 8);
        }
        self
    }

    /// Keep the first `bits` bits (MSB first) and zero the rest.
    pub fn truncated(mut self, bits: usize) -> Self {
        if bits >= DIGEST_LEN * 8 {
            return self;
        }
        let whole = bits / 8;
        let partial = bits % 8;
        if partial > 0 {
            self.0[whole] &= 0xffu8 << (8 - partial);
            self.0[whole + 1..].fill(0);
        } else {
            self.0[whole..].fill(0);
        }
        self
    }
}

/// Check that `s` is exactly [`DIGEST_HEX_LEN`] hex characters (either case).
pub fn is_valid_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
