use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "FEED_CORE_HOME";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
    return Ok(PathBuf::from(dir));
  }
  if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
    return Ok(PathBuf::from(home).join(".local").join("share").join("feed-core"));
  }
  Ok(std::env::current_dir()?.join("feed-core-data"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn feeds_dir(base: &Path) -> PathBuf {
  base.join("feeds")
}

pub fn feed_dir(base: &Path, source_id: &str) -> PathBuf {
  feeds_dir(base).join(source_id)
}

pub fn feed_checksum_path(base: &Path, source_id: &str) -> PathBuf {
  feed_dir(base, source_id).join(format!("{source_id}_checksum.txt"))
}

pub fn feed_metadata_path(base: &Path, source_id: &str) -> PathBuf {
  feed_dir(base, source_id).join(format!("{source_id}_metadata.json"))
}

pub fn feed_snapshot_path(base: &Path, source_id: &str) -> PathBuf {
  feed_dir(base, source_id).join(format!("{source_id}.json"))
}

pub fn local_index_path(base: &Path) -> PathBuf {
  base.join("indicators").join("index.json")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn per_feed_files_live_under_their_source_dir() {
    let base = Path::new("/data");
    assert_eq!(
      feed_checksum_path(base, "ipsum_level3"),
      PathBuf::from("/data/feeds/ipsum_level3/ipsum_level3_checksum.txt")
    );
    assert_eq!(
      feed_metadata_path(base, "ipsum_level3"),
      PathBuf::from("/data/feeds/ipsum_level3/ipsum_level3_metadata.json")
    );
    assert_eq!(
      feed_snapshot_path(base, "ipsum_level3"),
      PathBuf::from("/data/feeds/ipsum_level3/ipsum_level3.json")
    );
  }
}
