use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::cache::PersistentCache;
use crate::domain::Taxon;
use crate::error::MibigError;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonEntry {
    pub name: String,
    pub taxid: String,
    pub rank: String,
}

pub trait TaxonomyClient {
    /// Lineage as returned by NCBI, organism first. HTTP failures must be
    /// reported as `MibigError::TaxonomyHttp` so that they are retried.
    fn fetch_lineage(&self, tax_id: &str) -> Result<Vec<TaxonEntry>, MibigError>;
}

impl<C: TaxonomyClient + ?Sized> TaxonomyClient for &C {
    fn fetch_lineage(&self, tax_id: &str) -> Result<Vec<TaxonEntry>, MibigError> {
        (**self).fetch_lineage(tax_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct EntrezTaxonomyClient {
    client: Client,
    email: Option<String>,
    api_key: Option<String>,
}

impl EntrezTaxonomyClient {
    pub fn new(email: Option<String>) -> Result<Self, MibigError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mibig-sideload/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MibigError::TaxonomyHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| MibigError::TaxonomyHttp(err.to_string()))?;
        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Ok(Self {
            client,
            email,
            api_key,
        })
    }
}

impl TaxonomyClient for EntrezTaxonomyClient {
    fn fetch_lineage(&self, tax_id: &str) -> Result<Vec<TaxonEntry>, MibigError> {
        let mut params = vec![("db", "taxonomy"), ("id", tax_id), ("tool", "mibig-sideload")];
        if let Some(email) = &self.email {
            params.push(("email", email.as_str()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }
        let response = self
            .client
            .get(format!("{EUTILS_BASE}/efetch.fcgi"))
            .query(&params)
            .send()
            .map_err(|err| MibigError::TaxonomyHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(MibigError::TaxonomyHttp(format!(
                "NCBI returned status {}",
                response.status().as_u16()
            )));
        }
        let text = response
            .text()
            .map_err(|err| MibigError::TaxonomyHttp(err.to_string()))?;
        parse_taxonomy_xml(&text)
    }
}

/// Collects every `<Taxon>` element in document order with its own id, name
/// and rank (nested `LineageEx` taxa do not leak into their parent).
pub fn parse_taxonomy_xml(xml: &str) -> Result<Vec<TaxonEntry>, MibigError> {
    #[derive(Default)]
    struct Partial {
        name: Option<String>,
        taxid: Option<String>,
        rank: Option<String>,
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut taxa: Vec<Partial> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut field: Option<Vec<u8>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => {
                let name = tag.name().as_ref().to_vec();
                if name == b"Taxon" {
                    taxa.push(Partial::default());
                    open.push(taxa.len() - 1);
                } else {
                    field = Some(name);
                }
            }
            Ok(Event::Text(text)) => {
                let (Some(name), Some(&current)) = (&field, open.last()) else {
                    continue;
                };
                let value = text
                    .unescape()
                    .map_err(|err| MibigError::TaxonomyParse(err.to_string()))?
                    .into_owned();
                let slot = match name.as_slice() {
                    b"TaxId" => &mut taxa[current].taxid,
                    b"ScientificName" => &mut taxa[current].name,
                    b"Rank" => &mut taxa[current].rank,
                    _ => continue,
                };
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
            Ok(Event::End(tag)) => {
                if tag.name().as_ref() == b"Taxon" {
                    open.pop();
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(MibigError::TaxonomyParse(err.to_string())),
        }
    }

    taxa.into_iter()
        .map(|partial| match (partial.name, partial.taxid, partial.rank) {
            (Some(name), Some(taxid), Some(rank)) => Ok(TaxonEntry { name, taxid, rank }),
            _ => Err(MibigError::TaxonomyParse(
                "Taxon element without TaxId, ScientificName or Rank".to_string(),
            )),
        })
        .collect()
}

/// Taxonomy lookups keyed by NCBI taxonomy id.
#[derive(Debug)]
pub struct TaxonomyCache {
    cache_file: Option<PathBuf>,
    document: TaxonomyDocument,
    dirty: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaxonomyDocument {
    #[serde(default)]
    taxonomy: BTreeMap<String, Vec<TaxonEntry>>,
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

impl TaxonomyCache {
    pub fn open(cache_file: Option<&Path>) -> Result<Self, MibigError> {
        let mut document = TaxonomyDocument::default();
        if let Some(path) = cache_file {
            if path.exists() {
                let content = fs::read_to_string(path)
                    .map_err(|err| MibigError::Filesystem(format!("{}: {err}", path.display())))?;
                document =
                    serde_json::from_str(&content).map_err(|err| MibigError::CacheParse {
                        path: path.to_path_buf(),
                        message: err.to_string(),
                    })?;
            }
        }
        Ok(Self {
            cache_file: cache_file.map(Path::to_path_buf),
            document,
            dirty: false,
        })
    }

    pub fn get(&self, tax_id: &str) -> Option<&[TaxonEntry]> {
        self.document.taxonomy.get(tax_id).map(Vec::as_slice)
    }

    pub fn insert(&mut self, tax_id: &str, lineage: Vec<TaxonEntry>) {
        self.document.taxonomy.insert(tax_id.to_string(), lineage);
        self.dirty = true;
    }

    /// Cached lineage for `tax_id`, fetching it on a miss. The organism is
    /// moved to the end of the lineage. After `policy.attempts` HTTP failures
    /// the lineage is recorded as empty.
    pub fn lineage<C: TaxonomyClient>(
        &mut self,
        tax_id: &str,
        client: &C,
        policy: RetryPolicy,
    ) -> Result<Vec<TaxonEntry>, MibigError> {
        if let Some(existing) = self.get(tax_id) {
            return Ok(existing.to_vec());
        }
        let mut lineage = Vec::new();
        for attempt in 1..=policy.attempts.max(1) {
            debug!("Fetching taxonomy information from NCBI for tax_id:{tax_id}...");
            match client.fetch_lineage(tax_id) {
                Ok(found) => {
                    lineage = found;
                    break;
                }
                Err(MibigError::TaxonomyHttp(message)) => {
                    error!("Failed to query NCBI taxonomy database ({message}), retrying...");
                    if attempt < policy.attempts {
                        thread::sleep(policy.delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        if lineage.len() > 1 {
            let organism = lineage.remove(0);
            lineage.push(organism);
        }
        self.insert(tax_id, lineage.clone());
        Ok(lineage)
    }
}

impl PersistentCache for TaxonomyCache {
    fn label(&self) -> &str {
        "taxonomy"
    }

    fn has_pending(&self) -> bool {
        self.dirty
    }

    fn has_backing_file(&self) -> bool {
        self.cache_file.is_some()
    }

    fn save(&mut self) -> Result<(), MibigError> {
        let Some(path) = &self.cache_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| MibigError::Filesystem(err.to_string()))?;
            }
        }
        let content = serde_json::to_string_pretty(&self.document)
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        fs::write(path, content)
            .map_err(|err| MibigError::Filesystem(format!("{}: {err}", path.display())))?;
        self.dirty = false;
        Ok(())
    }
}

/// Picks the analysis taxon from lineage names.
pub fn classify_lineage(accession: &str, lineage: &[TaxonEntry]) -> Result<Taxon, MibigError> {
    let has = |name: &str| lineage.iter().any(|taxon| taxon.name == name);
    if has("Bacteria") {
        Ok(Taxon::Bacteria)
    } else if has("Fungi") {
        Ok(Taxon::Fungi)
    } else if has("Viridiplantae") {
        Ok(Taxon::Plants)
    } else {
        Err(MibigError::UnrecognizedTaxon {
            accession: accession.to_string(),
            lineage: lineage
                .iter()
                .map(|taxon| taxon.name.as_str())
                .collect::<Vec<_>>()
                .join(":"),
        })
    }
}

/// `superkingdom > … > organism`, skipping ranks missing from the lineage.
pub fn taxonomy_path(lineage: &[TaxonEntry]) -> String {
    const RANKS: [&str; 6] = ["superkingdom", "kingdom", "phylum", "class", "order", "family"];
    let mut parts: Vec<&str> = RANKS
        .iter()
        .filter_map(|rank| {
            lineage
                .iter()
                .find(|taxon| taxon.rank == *rank)
                .map(|taxon| taxon.name.as_str())
        })
        .collect();
    if let Some(organism) = lineage.last() {
        parts.push(organism.name.as_str());
    }
    parts.join(" > ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0" ?>
<TaxaSet><Taxon>
    <TaxId>1883</TaxId>
    <ScientificName>Streptomyces</ScientificName>
    <Rank>genus</Rank>
    <LineageEx>
        <Taxon><TaxId>2</TaxId><ScientificName>Bacteria</ScientificName><Rank>superkingdom</Rank></Taxon>
        <Taxon><TaxId>201174</TaxId><ScientificName>Actinomycetota</ScientificName><Rank>phylum</Rank></Taxon>
    </LineageEx>
</Taxon></TaxaSet>"#;

    #[test]
    fn parse_nested_lineage() {
        let lineage = parse_taxonomy_xml(XML).unwrap();
        let names: Vec<_> = lineage.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Streptomyces", "Bacteria", "Actinomycetota"]);
        assert_eq!(lineage[0].taxid, "1883");
        assert_eq!(lineage[1].rank, "superkingdom");
    }

    #[test]
    fn classify_and_path() {
        let mut lineage = parse_taxonomy_xml(XML).unwrap();
        let organism = lineage.remove(0);
        lineage.push(organism);
        assert_eq!(classify_lineage("BGC0000001", &lineage).unwrap(), Taxon::Bacteria);
        assert_eq!(taxonomy_path(&lineage), "Bacteria > Actinomycetota > Streptomyces");
    }

    #[test]
    fn classify_unknown_lineage() {
        let lineage = vec![TaxonEntry {
            name: "Metazoa".to_string(),
            taxid: "33208".to_string(),
            rank: "kingdom".to_string(),
        }];
        assert!(classify_lineage("BGC0000002", &lineage).is_err());
    }
}
