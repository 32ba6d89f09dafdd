use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;

use crate::error::MibigError;

/// Path layout for one run: shared caches, per-entry output directories and
/// the record snapshots they are built from.
#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
    records_root: Utf8PathBuf,
}

impl Store {
    pub fn new(output_root: Utf8PathBuf, cache_root: Utf8PathBuf, records_root: Utf8PathBuf) -> Self {
        Self {
            output_root,
            cache_root,
            records_root,
        }
    }

    pub fn default_cache_root() -> Result<Utf8PathBuf, MibigError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("mibig-sideload")).ok()
            })
            .ok_or_else(|| MibigError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn entry_dir(&self, accession: &str) -> Utf8PathBuf {
        self.output_root.join(accession)
    }

    pub fn results_path(&self, accession: &str) -> Utf8PathBuf {
        self.entry_dir(accession).join(format!("{accession}.1.json"))
    }

    pub fn zip_path(&self, accession: &str) -> Utf8PathBuf {
        self.entry_dir(accession).join(format!("{accession}.1.zip"))
    }

    pub fn index_path(&self, accession: &str) -> Utf8PathBuf {
        self.entry_dir(accession).join("index.html")
    }

    pub fn annotations_copy_path(&self, accession: &str) -> Utf8PathBuf {
        self.entry_dir(accession).join("annotations.json")
    }

    pub fn taxonomy_cache_path(&self, accession: &str) -> Utf8PathBuf {
        self.cache_root.join(format!("{accession}.cache.json"))
    }

    /// Relative names are placed in the cache root.
    pub fn reference_cache_path(&self, name: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from(name);
        if path.is_absolute() {
            path
        } else {
            self.cache_root.join(path)
        }
    }

    pub fn record_path(&self, locus_accession: &str) -> Utf8PathBuf {
        self.records_root.join(format!("{locus_accession}.json"))
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), MibigError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| MibigError::Filesystem(err.to_string()))
    }

    pub fn remove_dir(path: &Utf8Path) -> Result<(), MibigError> {
        if path.as_std_path().exists() {
            fs::remove_dir_all(path.as_std_path())
                .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), MibigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), MibigError> {
        let parent = dest
            .parent()
            .ok_or_else(|| MibigError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("mibig-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        fs::copy(source.as_std_path(), temp.path())
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// `*.json` files directly inside `dir`, sorted by path.
    pub fn list_json_files(dir: &Utf8Path) -> Result<Vec<PathBuf>, MibigError> {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| MibigError::Filesystem(format!("{dir}: {err}")))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| MibigError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new(
            Utf8PathBuf::from("/out"),
            Utf8PathBuf::from("/cache"),
            Utf8PathBuf::from("/records"),
        );
        assert_eq!(store.results_path("BGC0000001"), "/out/BGC0000001/BGC0000001.1.json");
        assert_eq!(store.taxonomy_cache_path("BGC0000001"), "/cache/BGC0000001.cache.json");
        assert_eq!(store.reference_cache_path("doi_cache.json"), "/cache/doi_cache.json");
        assert_eq!(store.reference_cache_path("/elsewhere/doi.json"), "/elsewhere/doi.json");
        assert_eq!(store.record_path("AB000001.1"), "/records/AB000001.1.json");
    }
}
