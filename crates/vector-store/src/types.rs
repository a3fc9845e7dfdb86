use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Free-form record metadata; merged key by key, last write wins
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Content hash used as the store's primary key: sha256 hex of the exact text
#[must_use]
pub fn checksum(text: &str) -> String {
    checksum_parts([text])
}

/// Hash of several inputs, each length-prefixed so boundaries cannot shift
#[must_use]
pub fn checksum_parts<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    let mut count = 0usize;
    for part in parts {
        if count > 0 {
            hasher.update((part.len() as u64).to_be_bytes());
        }
        hasher.update(part.as_bytes());
        count += 1;
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Which fields `get` should return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
    pub documents: bool,
    pub metadatas: bool,
}

impl Include {
    pub const ALL: Self = Self {
        documents: true,
        metadatas: true,
    };
    pub const DOCUMENTS: Self = Self {
        documents: true,
        metadatas: false,
    };
    pub const METADATAS: Self = Self {
        documents: false,
        metadatas: true,
    };
}

impl Default for Include {
    fn default() -> Self {
        Self::ALL
    }
}

/// Batch lookup result; parallel vectors in request order, missing ids
/// omitted. Unrequested fields are left empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
}

impl GetResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Document stored for `id`, when documents were included
    #[must_use]
    pub fn document(&self, id: &str) -> Option<&str> {
        let pos = self.ids.iter().position(|candidate| candidate == id)?;
        self.documents.get(pos).map(String::as_str)
    }

    #[must_use]
    pub fn metadata(&self, id: &str) -> Option<&Metadata> {
        let pos = self.ids.iter().position(|candidate| candidate == id)?;
        self.metadatas.get(pos)
    }
}

/// One ranked candidate
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub checksum: String,
    /// `0.0` is a perfect match, `1.0` no match at all
    pub distance: f32,
}

/// A persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub document: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Insertion order, used to break ranking ties
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(checksum_parts(["ab", "c"]), checksum_parts(["a", "bc"]));
    }
}
