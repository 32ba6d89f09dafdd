//! Bibliographic reference entries and their file-backed cache.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::cache::PersistentCache;
use crate::error::MibigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Generic,
    Pubmed,
    Doi,
}

impl ReferenceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReferenceKind::Generic => "reference",
            ReferenceKind::Pubmed => "PubMed",
            ReferenceKind::Doi => "DOI",
        }
    }

    fn id_key(&self) -> &'static str {
        match self {
            ReferenceKind::Pubmed => "pmid",
            ReferenceKind::Generic | ReferenceKind::Doi => "identifier",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    pub journal: String,
    pub identifier: String,
    pub kind: ReferenceKind,
}

impl ReferenceEntry {
    pub fn new(
        kind: ReferenceKind,
        title: &str,
        authors: Vec<String>,
        year: &str,
        journal: &str,
        identifier: &str,
    ) -> Self {
        Self {
            title: normalize_title(title),
            authors,
            year: year.to_string(),
            journal: journal.to_string(),
            identifier: identifier.to_string(),
            kind,
        }
    }

    /// Short citation line, e.g. `Smith, J et al., Nature (2020) PMID:123`.
    pub fn info(&self) -> String {
        let mut out = String::new();
        if let Some(first) = self.authors.first() {
            out.push_str(first);
            if self.authors.len() > 1 {
                out.push_str(" et al.");
            }
            out.push_str(", ");
        }
        out.push_str(&format!("{} ({})", self.journal, self.year));
        match self.kind {
            ReferenceKind::Pubmed => out.push_str(&format!(" PMID:{}", self.identifier)),
            ReferenceKind::Doi => out.push_str(&format!(" DOI:{}", self.identifier)),
            ReferenceKind::Generic => {}
        }
        out
    }

    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "title": self.title,
            "authors": self.authors,
            "year": self.year,
            "journal": self.journal,
        });
        value[self.kind.id_key()] = Value::String(self.identifier.clone());
        value
    }

    pub fn from_json(kind: ReferenceKind, value: Value) -> Result<Self, serde_json::Error> {
        let stored: StoredEntry = serde_json::from_value(value)?;
        let identifier = match kind {
            ReferenceKind::Pubmed => stored.pmid.or(stored.identifier),
            ReferenceKind::Generic | ReferenceKind::Doi => stored.identifier,
        }
        .ok_or_else(|| <serde_json::Error as serde::de::Error>::missing_field(kind.id_key()))?;
        Ok(Self::new(
            kind,
            &stored.title,
            stored.authors,
            &stored.year,
            &stored.journal,
            &identifier,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct StoredEntry {
    title: String,
    authors: Vec<String>,
    year: String,
    journal: String,
    #[serde(default)]
    pmid: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
}

/// Titles always end in exactly one period.
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim().trim_end_matches(|ch: char| ch == '.' || ch.is_whitespace());
    format!("{trimmed}.")
}

#[derive(Debug)]
pub struct ReferenceCache {
    kind: ReferenceKind,
    cache_file: Option<PathBuf>,
    mappings: BTreeMap<String, ReferenceEntry>,
    pending: BTreeSet<String>,
}

impl ReferenceCache {
    /// Loads every entry from `cache_file` if it exists. `None` gives an
    /// in-memory cache that is never written.
    pub fn open(cache_file: Option<&Path>, kind: ReferenceKind) -> Result<Self, MibigError> {
        let mut mappings = BTreeMap::new();
        if let Some(path) = cache_file {
            if path.exists() {
                let content = fs::read_to_string(path)
                    .map_err(|err| MibigError::Filesystem(format!("{}: {err}", path.display())))?;
                let raw: BTreeMap<String, Value> =
                    serde_json::from_str(&content).map_err(|err| MibigError::CacheParse {
                        path: path.to_path_buf(),
                        message: err.to_string(),
                    })?;
                for (id, value) in raw {
                    let entry = ReferenceEntry::from_json(kind, value).map_err(|err| {
                        MibigError::CacheParse {
                            path: path.to_path_buf(),
                            message: format!("entry {id}: {err}"),
                        }
                    })?;
                    mappings.insert(id, entry);
                }
            }
        }
        Ok(Self {
            kind,
            cache_file: cache_file.map(Path::to_path_buf),
            mappings,
            pending: BTreeSet::new(),
        })
    }

    pub fn in_memory(kind: ReferenceKind) -> Self {
        Self {
            kind,
            cache_file: None,
            mappings: BTreeMap::new(),
            pending: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.mappings.contains_key(identifier)
    }

    pub fn add(&mut self, title: &str, authors: Vec<String>, year: &str, journal: &str, identifier: &str) {
        let entry = ReferenceEntry::new(self.kind, title, authors, year, journal, identifier);
        self.add_entry(entry);
    }

    pub fn add_entry(&mut self, mut entry: ReferenceEntry) {
        entry.kind = self.kind;
        self.pending.insert(entry.identifier.clone());
        self.mappings.insert(entry.identifier.clone(), entry);
    }

    pub fn get(&self, identifier: &str) -> Result<&ReferenceEntry, MibigError> {
        self.mappings
            .get(identifier)
            .ok_or_else(|| MibigError::LookupMiss {
                label: self.kind.label().to_string(),
                id: identifier.to_string(),
            })
    }

    /// Candidates not yet held, sorted and de-duplicated.
    pub fn get_missing<I, S>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        candidates
            .into_iter()
            .filter(|id| !self.mappings.contains_key(id.as_ref()))
            .map(|id| id.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl PersistentCache for ReferenceCache {
    fn label(&self) -> &str {
        self.kind.label()
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn has_backing_file(&self) -> bool {
        self.cache_file.is_some()
    }

    /// Rewrites the whole backing file; there is no partial-write protection.
    fn save(&mut self) -> Result<(), MibigError> {
        let Some(path) = &self.cache_file else {
            return Ok(());
        };
        debug!(
            "Updating {} cache file with {} new entries: {}",
            self.kind.label(),
            self.pending.len(),
            path.display()
        );
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| MibigError::Filesystem(err.to_string()))?;
            }
        }
        let document: BTreeMap<&str, Value> = self
            .mappings
            .iter()
            .map(|(id, entry)| (id.as_str(), entry.to_json()))
            .collect();
        let content = serde_json::to_vec(&document)
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        fs::write(path, content)
            .map_err(|err| MibigError::Filesystem(format!("{}: {err}", path.display())))?;
        self.pending.clear();
        Ok(())
    }
}

/// PubMed entries are resolved in bulk by the caller; `get` never fetches.
#[derive(Debug)]
pub struct PubmedCache {
    inner: ReferenceCache,
}

impl PubmedCache {
    pub fn open(cache_file: Option<&Path>) -> Result<Self, MibigError> {
        Ok(Self {
            inner: ReferenceCache::open(cache_file, ReferenceKind::Pubmed)?,
        })
    }

    pub fn add(&mut self, title: &str, authors: Vec<String>, year: &str, journal: &str, pmid: &str) {
        self.inner.add(title, authors, year, journal, pmid);
    }

    pub fn get(&self, pmid: &str) -> Result<&ReferenceEntry, MibigError> {
        self.inner.get(pmid)
    }

    pub fn get_missing<I, S>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.get_missing(candidates)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl PersistentCache for PubmedCache {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn has_pending(&self) -> bool {
        self.inner.has_pending()
    }

    fn has_backing_file(&self) -> bool {
        self.inner.has_backing_file()
    }

    fn save(&mut self) -> Result<(), MibigError> {
        self.inner.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_gets_single_period() {
        assert_eq!(normalize_title("Foo"), "Foo.");
        assert_eq!(normalize_title("Foo."), "Foo.");
        assert_eq!(normalize_title("Foo.. "), "Foo.");
    }

    #[test]
    fn info_marks_multiple_authors() {
        let entry = ReferenceEntry::new(
            ReferenceKind::Doi,
            "A title",
            vec!["Bar, A".to_string(), "Baz, B".to_string()],
            "2021",
            "Journal",
            "10.1/x",
        );
        assert_eq!(entry.info(), "Bar, A et al., Journal (2021) DOI:10.1/x");
    }

    #[test]
    fn pubmed_serializes_pmid_key() {
        let entry = ReferenceEntry::new(
            ReferenceKind::Pubmed,
            "T",
            vec!["A".to_string()],
            "2020",
            "J",
            "42",
        );
        let value = entry.to_json();
        assert_eq!(value["pmid"], "42");
        assert!(value.get("identifier").is_none());
    }

    #[test]
    fn pubmed_accepts_identifier_key() {
        let value = json!({
            "title": "T.",
            "authors": ["A"],
            "year": "2020",
            "journal": "J",
            "identifier": "7"
        });
        let entry = ReferenceEntry::from_json(ReferenceKind::Pubmed, value).unwrap();
        assert_eq!(entry.identifier, "7");
    }
}
