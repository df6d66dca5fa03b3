//! Fragment identifiers: opaque, content-derived keys for immutable fragments.

use cbordata::Cborize;

use std::fmt;

const FID_VER: u32 = 0x0001;

/// Opaque, fixed-width, content-derived identifier for an immutable fragment.
///
/// Two fragments with identical encoded content always produce the same
/// `Fid`, making `create-ref` idempotent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Cborize)]
pub struct Fid([u8; 20]);

impl Fid {
    const ID: u32 = FID_VER;

    pub(crate) fn from_bytes(bytes: [u8; 20]) -> Fid {
        Fid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Fid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Collaborator trait for the content-hashing primitive.
///
/// Deterministic and pure over the fragment's encoded bytes. The choice of
/// hash is left to the caller, but a reference implementation
/// ([`Sha1Hash`]) ships so the rest of the crate is directly testable.
pub trait ContentHash {
    fn fid(&self, bytes: &[u8]) -> Fid;
}

/// Reference [`ContentHash`] implementation built on the `sha-1` crate.
///
/// `sha-1` is promoted here to an unconditional dependency: the default
/// hasher needs it whether or not a caller supplies their own.
#[derive(Clone, Copy, Default)]
pub struct Sha1Hash;

impl ContentHash for Sha1Hash {
    fn fid(&self, bytes: &[u8]) -> Fid {
        use sha1::{Digest, Sha1};

        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let digest = hasher.finalize();

        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        Fid::from_bytes(out)
    }
}

#[cfg(test)]
mod fid_test {
    use super::*;

    #[test]
    fn test_deterministic() {
        let hasher = Sha1Hash;
        let a = hasher.fid(b"hello world");
        let b = hasher.fid(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinguishes_content() {
        let hasher = Sha1Hash;
        let a = hasher.fid(b"hello");
        let b = hasher.fid(b"world");
        assert_ne!(a, b);
    }
}
