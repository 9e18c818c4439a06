use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::StoreError;

/// Store-assigned version marker, rendered as `<generation>-<digest>`.
///
/// The generation counts writes to a document; the digest is a CRC-32 over
/// the generation, the serialized body written at that generation and, for
/// issued revisions, a random nonce.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision {
    generation: u64,
    digest: u32,
}

impl Revision {
    /// Deterministic revision of `body` at `generation`.
    pub fn compute(generation: u64, body: &Map<String, Value>) -> serde_json::Result<Self> {
        Self::digest(generation, body, &[])
    }

    /// Revision for a new write. Generations restart when a document is
    /// deleted and re-created, so the nonce keeps a token issued before the
    /// deletion from matching again.
    pub fn issue(generation: u64, body: &Map<String, Value>) -> serde_json::Result<Self> {
        Self::digest(generation, body, Uuid::new_v4().as_bytes())
    }

    fn digest(generation: u64, body: &Map<String, Value>, nonce: &[u8]) -> serde_json::Result<Self> {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&generation.to_be_bytes());
        hasher.update(&serde_json::to_vec(body)?);
        hasher.update(nonce);
        Ok(Self {
            generation,
            digest: hasher.finalize(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:08x}", self.generation, self.digest)
    }
}

impl FromStr for Revision {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidRevision(s.to_string());
        let (generation, digest) = s.split_once('-').ok_or_else(invalid)?;
        let generation: u64 = generation.parse().map_err(|_| invalid())?;
        if generation == 0 || digest.len() != 8 {
            return Err(invalid());
        }
        let digest = u32::from_str_radix(digest, 16).map_err(|_| invalid())?;
        Ok(Self { generation, digest })
    }
}

impl TryFrom<String> for Revision {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.to_string()
    }
}
