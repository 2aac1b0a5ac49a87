//! `h1:` structural zip hashing.
//!
//! For every entry (sorted by name, directories included) the line
//! `"{hex sha256(content)}  {name}\n"` is fed into an outer SHA-256, whose
//! digest is base64-encoded and prefixed with `h1:`. Archive metadata,
//! compression and entry order do not affect the result.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use spiegel_schema::H1Checksum;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum H1Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("zip entry name contains a newline: {0:?}")]
    NewlineInName(String),
}

/// Hash a zip archive read from any seekable source.
pub fn hash_zip<R: Read + Seek>(reader: R) -> Result<H1Checksum, H1Error> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        if name.contains('\n') {
            return Err(H1Error::NewlineInName(name));
        }
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        entries.push((name, hex::encode(hasher.finalize())));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut outer = Sha256::new();
    for (name, digest) in &entries {
        outer.update(format!("{digest}  {name}\n").as_bytes());
    }

    Ok(H1Checksum::new(format!(
        "h1:{}",
        STANDARD.encode(outer.finalize())
    )))
}

/// Hash a zip archive on disk. Blocking; call from `spawn_blocking` in async code.
pub fn hash_zip_file(path: &Path) -> Result<H1Checksum, H1Error> {
    let file = File::open(path)?;
    hash_zip(BufReader::new(file))
}

/// Hash an in-memory zip archive.
pub fn hash_zip_bytes(bytes: &[u8]) -> Result<H1Checksum, H1Error> {
    hash_zip(Cursor::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::make_zip;

    const EXPECTED: &str = "h1:G5/71gnPGTM+MhFEiTIFMgAFgWjQSglE2S4RDOFSVqA=";

    #[test]
    fn known_value() {
        let zip = make_zip(&[
            ("terraform-provider-test_v1.0.0", b"binary"),
            ("README.md", b"hello\n"),
        ]);
        assert_eq!(hash_zip_bytes(&zip).unwrap().as_str(), EXPECTED);
    }

    #[test]
    fn independent_of_entry_order() {
        let a = make_zip(&[("a.txt", b"one"), ("b.txt", b"two")]);
        let b = make_zip(&[("b.txt", b"two"), ("a.txt", b"one")]);
        assert_ne!(a, b);
        assert_eq!(hash_zip_bytes(&a).unwrap(), hash_zip_bytes(&b).unwrap());
    }

    #[test]
    fn content_change_changes_hash() {
        let a = make_zip(&[("a.txt", b"one")]);
        let b = make_zip(&[("a.txt", b"uno")]);
        assert_ne!(hash_zip_bytes(&a).unwrap(), hash_zip_bytes(&b).unwrap());
    }

    #[test]
    fn empty_archive() {
        let zip = make_zip(&[]);
        assert_eq!(
            hash_zip_bytes(&zip).unwrap().as_str(),
            "h1:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn rejects_newline_in_name() {
        let zip = make_zip(&[("bad\nname", b"x")]);
        assert!(matches!(
            hash_zip_bytes(&zip),
            Err(H1Error::NewlineInName(_))
        ));
    }

    #[test]
    fn rejects_non_zip() {
        assert!(matches!(
            hash_zip_bytes(b"definitely not a zip"),
            Err(H1Error::Zip(_))
        ));
    }

    #[test]
    fn file_and_bytes_agree() {
        let zip = make_zip(&[("x", b"y")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        std::fs::write(&path, &zip).unwrap();
        assert_eq!(
            hash_zip_file(&path).unwrap(),
            hash_zip_bytes(&zip).unwrap()
        );
    }
}
