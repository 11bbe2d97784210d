use super::store::atomic_write_file;
use crate::error::FeedError;
use crate::paths;
use sha2::{Digest, Sha512};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumVerdict {
  pub changed: bool,
  pub new_digest: String,
}

/// Lowercase hex SHA-512 of the bytes exactly as fetched.
pub fn digest(raw: &[u8]) -> String {
  format!("{:x}", Sha512::digest(raw))
}

/// A missing previous digest always counts as changed.
pub fn has_changed(raw: &[u8], previous_digest: Option<&str>) -> ChecksumVerdict {
  let new_digest = digest(raw);
  let changed = previous_digest.map(str::trim) != Some(new_digest.as_str());
  ChecksumVerdict {
    changed,
    new_digest,
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
  pub source_id: String,
  pub digest: String,
}

pub trait ChecksumStore: Send + Sync {
  fn read(&self, source_id: &str) -> Result<Option<String>, FeedError>;
  fn write(&self, record: &ChecksumRecord) -> Result<(), FeedError>;
}

/// Keeps `<feed dir>/<source_id>_checksum.txt` per feed.
pub struct FileChecksumStore {
  base: PathBuf,
}

impl FileChecksumStore {
  pub fn new(base: &Path) -> Self {
    Self {
      base: base.to_path_buf(),
    }
  }
}

impl ChecksumStore for FileChecksumStore {
  fn read(&self, source_id: &str) -> Result<Option<String>, FeedError> {
    let path = paths::feed_checksum_path(&self.base, source_id);
    match fs::read_to_string(&path) {
      Ok(text) => {
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
      }
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(FeedError::Persist(format!("read {}: {e}", path.display()))),
    }
  }

  fn write(&self, record: &ChecksumRecord) -> Result<(), FeedError> {
    let path = paths::feed_checksum_path(&self.base, &record.source_id);
    atomic_write_file(&path, record.digest.as_bytes()).map_err(|e| FeedError::Persist(format!("{e:#}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn digest_is_sha512_hex() {
    assert_eq!(
      digest(b""),
      "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce\
       47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e"
    );
    assert_eq!(digest(b"abc"), digest(b"abc"));
    assert_ne!(digest(b"abc"), digest(b"abd"));
  }

  #[test]
  fn first_run_is_changed() {
    let v = has_changed(b"1.2.3.4\n", None);
    assert!(v.changed);
    assert_eq!(v.new_digest.len(), 128);
  }

  #[test]
  fn unchanged_iff_digest_matches() {
    let raw = b"1.2.3.4\n5.6.7.8\n";
    let d = digest(raw);
    assert!(!has_changed(raw, Some(&d)).changed);
    assert!(has_changed(b"1.2.3.4\n", Some(&d)).changed);
    assert!(has_changed(raw, Some("")).changed);
  }

  #[test]
  fn file_store_reads_what_it_wrote() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileChecksumStore::new(dir.path());
    assert_eq!(store.read("ipsum_level3").unwrap(), None);

    let record = ChecksumRecord {
      source_id: "ipsum_level3".to_string(),
      digest: digest(b"feed body"),
    };
    store.write(&record).unwrap();
    assert_eq!(store.read("ipsum_level3").unwrap(), Some(record.digest.clone()));
    assert!(paths::feed_checksum_path(dir.path(), "ipsum_level3").exists());
    assert_eq!(store.read("other_feed").unwrap(), None);
  }
}
