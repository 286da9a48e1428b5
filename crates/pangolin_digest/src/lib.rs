#![deny(missing_docs)]

//! Utility functions for computing hashes using the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) library.
//!
//! Package validation in pangolin compares MD5 digests of cached archives and
//! SHA256 digests of freshly downloaded ones. The helpers in this crate wrap
//! the [`Digest`] trait so that both algorithms (and any other implementor)
//! can be computed over files, byte slices, or parsed from their hex
//! representation.

pub use digest;

use digest::{Digest, Output};
use std::{fs::File, io::Write, path::Path};

pub use md5::Md5;
pub use sha2::Sha256;

/// A type alias for the output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// A type alias for the output of an MD5 hash.
pub type Md5Hash = md5::digest::Output<Md5>;

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    // Open the file for reading
    let mut file = File::open(path)?;

    // Determine the hash of the file on disk
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;

    Ok(hasher.finalize())
}

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default + Write>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hash hex string to a digest.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_compute_bytes_digest() {
        assert_eq!(
            format!("{:x}", compute_bytes_digest::<Md5>("Hello, world!")),
            "6cd3556deb0da54bca060b4c39479839"
        );
        assert_eq!(
            format!("{:x}", compute_bytes_digest::<Sha256>("Hello, world!")),
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }

    #[test]
    fn test_compute_file_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("somefile.txt");
        std::fs::write(&path, "Hello, world!").unwrap();

        assert_eq!(
            compute_file_digest::<Sha256>(&path).unwrap(),
            compute_bytes_digest::<Sha256>("Hello, world!")
        );
    }

    #[test]
    fn test_parse_digest_from_hex() {
        let digest = parse_digest_from_hex::<Sha256>(
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3",
        )
        .unwrap();
        assert_eq!(digest, compute_bytes_digest::<Sha256>("Hello, world!"));

        assert!(parse_digest_from_hex::<Sha256>("not-hex").is_none());
        assert!(parse_digest_from_hex::<Sha256>("deadbeef").is_none());
    }
}
