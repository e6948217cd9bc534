//! Content digests used as registry object identities.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::errors::FsError;

/// A content digest such as `sha256:4f2a…`.
///
/// The canonical string form is `algorithm:hash`; inside object keys the
/// same pair appears as two path segments, `algorithm/hash`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hash: String,
}

impl Digest {
    /// Build a digest, validating both halves.
    ///
    /// The algorithm must be non-empty and made of `[a-z0-9+._-]`. The hash
    /// must be non-empty lowercase hex that decodes to whole bytes.
    pub fn new(algorithm: impl Into<String>, hash: impl Into<String>) -> Result<Self, FsError> {
        let algorithm = algorithm.into();
        let hash = hash.into();

        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '+' | '.' | '_' | '-'))
        {
            return Err(FsError::invalid(format!(
                "digest algorithm `{algorithm}` is malformed"
            )));
        }

        if hash.is_empty()
            || hash.chars().any(|c| c.is_ascii_uppercase())
            || hex::decode(&hash).is_err()
        {
            return Err(FsError::invalid(format!("digest hash `{hash}` is malformed")));
        }

        Ok(Self { algorithm, hash })
    }

    /// Parse the `algorithm/hash` tail of an object key.
    pub fn from_key_segments(tail: &str) -> Result<Self, FsError> {
        match tail.split_once('/') {
            Some((algorithm, hash)) if !hash.contains('/') => Self::new(algorithm, hash),
            _ => Err(FsError::invalid(format!(
                "`{tail}` is not an `algorithm/hash` pair"
            ))),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The `algorithm/hash` form used as a key path component.
    pub fn key_segments(&self) -> String {
        format!("{}/{}", self.algorithm, self.hash)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

impl FromStr for Digest {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hash) = s
            .split_once(':')
            .ok_or_else(|| FsError::invalid(format!("`{s}` is not an `algorithm:hash` digest")))?;
        Self::new(algorithm, hash)
    }
}

impl TryFrom<String> for Digest {
    type Error = FsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_form() {
        let digest: Digest = "sha256:abcd01".parse().unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.hash(), "abcd01");
        assert_eq!(digest.to_string(), "sha256:abcd01");
        assert_eq!(digest.key_segments(), "sha256/abcd01");
    }

    #[test]
    fn rejects_malformed_hashes() {
        assert!(Digest::new("sha256", "not-hex").is_err());
        assert!(Digest::new("sha256", "abc").is_err());
        assert!(Digest::new("sha256", "ABCD").is_err());
        assert!(Digest::new("sha256", "").is_err());
        assert!(Digest::new("", "abcd").is_err());
        assert!(Digest::new("SHA256", "abcd").is_err());
        assert!("sha256abcd".parse::<Digest>().is_err());
    }

    #[test]
    fn parses_key_tail() {
        let digest = Digest::from_key_segments("sha512/00ff").unwrap();
        assert_eq!(digest, Digest::new("sha512", "00ff").unwrap());
        assert!(Digest::from_key_segments("sha512").is_err());
        assert!(Digest::from_key_segments("sha512/00ff/extra").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let digest = Digest::new("sha256", "beef").unwrap();
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, "\"sha256:beef\"");
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<Digest>("\"sha256:zz\"").is_err());
    }
}
