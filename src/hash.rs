// src/hash.rs

//! Digest computation for package verification and build outputs
//!
//! Conda repodata records carry MD5 and SHA-256 digests; the `hash` build
//! output may additionally ask for SHA-512.
//!
//! | Use Case | Algorithm |
//! |----------|-----------|
//! | `urls` file, cache reuse check | MD5 |
//! | Repodata `sha256` field | SHA-256 |
//! | `<installer>.<algo>` outputs | any |

use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum HashAlgorithm {
    /// MD5, the digest conda uses in `urls` files
    #[default]
    Md5,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash computation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Hasher that can compute digests using any supported algorithm
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { state }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compute the hex digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the hex digest of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 65536];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute the hex digest of a file, streaming its content
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(algorithm, &mut file)
}

/// Compute MD5 and SHA-256 of a file in a single pass
pub fn md5_and_sha256(path: &Path) -> io::Result<(String, String)> {
    let mut file = File::open(path)?;
    let mut md5 = Hasher::new(HashAlgorithm::Md5);
    let mut sha = Hasher::new(HashAlgorithm::Sha256);
    let mut buffer = [0u8; 65536];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        md5.update(&buffer[..n]);
        sha.update(&buffer[..n]);
    }
    Ok((md5.finalize(), sha.finalize()))
}

/// Check a file against an expected digest (case-insensitive)
///
/// Returns the actual digest on mismatch.
pub fn verify_file(path: &Path, expected: &str, algorithm: HashAlgorithm) -> io::Result<Result<(), String>> {
    let actual = hash_file(algorithm, path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(Ok(()))
    } else {
        Ok(Err(actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hash_bytes(HashAlgorithm::Md5, b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            hash_bytes(HashAlgorithm::Sha256, b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(hash_bytes(HashAlgorithm::Sha512, b"").len(), 128);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("sha-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("sha512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_hasher_incremental() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), hash_bytes(HashAlgorithm::Sha256, b"hello world"));
    }

    #[test]
    fn test_file_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.tar.bz2");
        std::fs::write(&path, b"hello world").unwrap();

        let (md5, sha) = md5_and_sha256(&path).unwrap();
        assert_eq!(md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(sha, hash_file(HashAlgorithm::Sha256, &path).unwrap());

        assert!(verify_file(&path, "5EB63BBBE01EEED093CB22BB8F5ACDC3", HashAlgorithm::Md5)
            .unwrap()
            .is_ok());
        let mismatch = verify_file(&path, "00", HashAlgorithm::Md5).unwrap();
        assert_eq!(mismatch.unwrap_err(), md5);
    }
}
