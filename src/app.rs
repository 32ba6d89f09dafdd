use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::annotations::{MibigEntry, load_publications};
use crate::cache::{PersistentCache, with_flush};
use crate::config::ResolvedConfig;
use crate::domain::{Doi, Publication, Taxon};
use crate::error::MibigError;
use crate::fs_util::zip_dir;
use crate::html::{RenderContext, render_entry, render_retired};
use crate::links::ReferenceCollection;
use crate::providers::doi::{DoiCache, DoiSource, special_entry};
use crate::pubmed::{PubmedClient, resolve_missing};
use crate::record::{GenomicRecord, Record};
use crate::references::PubmedCache;
use crate::sideload::{Fingerprint, MibigAnnotations, mibig_loader};
use crate::store::Store;
use crate::taxonomy::{TaxonEntry, TaxonomyCache, TaxonomyClient, classify_lineage};

#[derive(Debug, Clone, Serialize)]
pub struct PrefetchResult {
    pub kind: String,
    pub cache_path: String,
    pub files: usize,
    pub identifiers: usize,
    pub fetched: usize,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub annotation_path: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResult {
    pub accession: String,
    pub action: String,
    pub taxon: Option<Taxon>,
    pub output_dir: String,
    pub index_path: String,
    pub results_path: Option<String>,
    pub zip_path: Option<String>,
    pub alterations: Vec<String>,
}

/// Results file written next to the HTML; read back to decide reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsDocument {
    pub schema_version: u32,
    pub tool: String,
    pub generated_at: String,
    pub accession: String,
    pub taxon: Taxon,
    pub annotations: Fingerprint,
    pub record: Value,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Appends `[YYYY-MM-DD HH:MM:SS] text` lines to an optional log file.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    path: Option<Utf8PathBuf>,
}

impl RunLog {
    pub fn new(path: Option<Utf8PathBuf>) -> Self {
        Self { path }
    }

    pub fn write(&self, text: &str) -> Result<(), MibigError> {
        info!("{text}");
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            Store::ensure_dir(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| MibigError::Filesystem(format!("{path}: {err}")))?;
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{stamp}] {text}").map_err(|err| MibigError::Filesystem(err.to_string()))
    }
}

pub struct App<D: DoiSource, P: PubmedClient, T: TaxonomyClient> {
    store: Store,
    config: ResolvedConfig,
    log: RunLog,
    doi: D,
    pubmed: P,
    taxonomy: T,
}

impl<D: DoiSource, P: PubmedClient, T: TaxonomyClient> App<D, P, T> {
    pub fn new(store: Store, config: ResolvedConfig, log: RunLog, doi: D, pubmed: P, taxonomy: T) -> Self {
        Self {
            store,
            config,
            log,
            doi,
            pubmed,
            taxonomy,
        }
    }

    /// Resolves every DOI referenced by `*.json` files in `input_dir` into
    /// the cache at `cache_path`. The cache is saved after each resolution.
    pub fn prefetch_dois(
        &self,
        input_dir: &Utf8Path,
        cache_path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<PrefetchResult, MibigError> {
        let files = Store::list_json_files(input_dir)?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; scanning {} files", files.len()),
            elapsed: None,
        });
        let mut cache = DoiCache::open(Some(cache_path.as_std_path()), &self.doi)?;
        let mut identifiers = BTreeSet::new();
        let fetched = with_flush(&mut cache, |cache| {
            let mut fetched = 0;
            for file in &files {
                for raw in load_publications(file)? {
                    let Some(value) = raw.strip_prefix("doi:") else {
                        continue;
                    };
                    let doi: Doi = value.parse()?;
                    let doi = doi.as_str();
                    identifiers.insert(doi.to_string());
                    if let Some(entry) = special_entry(doi) {
                        cache.add_entry(entry);
                        continue;
                    }
                    if cache.contains(doi) {
                        continue;
                    }
                    let start = Instant::now();
                    cache.get(doi).map_err(|err| {
                        tracing::error!("failed to import DOIs from {}: {err}", file.display());
                        err
                    })?;
                    cache.save()?;
                    fetched += 1;
                    sink.event(ProgressEvent {
                        message: format!("doi.resolved {doi}"),
                        elapsed: Some(start.elapsed()),
                    });
                }
            }
            Ok(fetched)
        })?;
        Ok(PrefetchResult {
            kind: "doi".to_string(),
            cache_path: cache_path.to_string(),
            files: files.len(),
            identifiers: identifiers.len(),
            fetched,
        })
    }

    /// Collects PubMed ids from `*.json` files in `input_dir` and fetches
    /// the ones missing from the cache in bulk.
    pub fn prefetch_pubmed(
        &self,
        input_dir: &Utf8Path,
        cache_path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<PrefetchResult, MibigError> {
        let files = Store::list_json_files(input_dir)?;
        let mut pmids = BTreeSet::new();
        for file in &files {
            for raw in load_publications(file)? {
                if let Some(pmid) = raw.strip_prefix("pubmed:").map(str::trim) {
                    if pmid != "0" {
                        pmids.insert(pmid.to_string());
                    }
                }
            }
        }
        let pmids: Vec<String> = pmids.into_iter().collect();
        let mut cache = PubmedCache::open(Some(cache_path.as_std_path()))?;
        let missing = cache.get_missing(&pmids).len();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} PubMed ids, {missing} missing", pmids.len()),
            elapsed: None,
        });
        let start = Instant::now();
        with_flush(&mut cache, |cache| resolve_missing(cache, &self.pubmed, &pmids))?;
        sink.event(ProgressEvent {
            message: "pubmed.response".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(PrefetchResult {
            kind: "pubmed".to_string(),
            cache_path: cache_path.to_string(),
            files: files.len(),
            identifiers: pmids.len(),
            fetched: missing,
        })
    }

    /// Builds the output directory for one annotation file. A previous
    /// results file is reused when its fingerprint still matches; otherwise
    /// the output directory is removed and the entry is generated afresh.
    pub fn generate(&self, request: &GenerateRequest, sink: &dyn ProgressSink) -> Result<GenerateResult, MibigError> {
        let entry = MibigEntry::load(request.annotation_path.as_std_path())?;
        let accession = entry.accession().to_string();
        Store::ensure_dir(self.store.cache_root())?;

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; taxonomy for {accession}"),
            elapsed: None,
        });
        let lineage = self.lineage_for(&entry)?;
        let taxon = match classify_lineage(&accession, &lineage) {
            Ok(taxon) => taxon,
            Err(err) => {
                let names: Vec<&str> = lineage.iter().map(|taxon| taxon.name.as_str()).collect();
                self.log
                    .write(&format!("Unrecognizable taxons {accession} ({})", names.join(":")))?;
                return Err(err);
            }
        };

        let entry_dir = self.store.entry_dir(&accession);
        let index_path = self.store.index_path(&accession);

        if entry.is_retired() {
            Store::ensure_dir(&entry_dir)?;
            Store::write_bytes_atomic(&index_path, render_retired(&entry).as_bytes())?;
            Store::copy_file_atomic(
                &request.annotation_path,
                &self.store.annotations_copy_path(&accession),
            )?;
            self.log
                .write(&format!("Generated retired entry page for {accession}"))?;
            return Ok(GenerateResult {
                accession,
                action: "retired".to_string(),
                taxon: Some(taxon),
                output_dir: entry_dir.to_string(),
                index_path: index_path.to_string(),
                results_path: None,
                zip_path: None,
                alterations: Vec::new(),
            });
        }

        let results_path = self.store.results_path(&accession);
        let mut reused = None;
        if results_path.as_std_path().exists() {
            sink.event(ProgressEvent {
                message: format!("phase=Verify; reusing {results_path}"),
                elapsed: None,
            });
            match Self::reuse(&results_path, entry.clone(), lineage.clone()) {
                Ok(found) => {
                    self.log
                        .write(&format!("Successfully reused JSON file {results_path}"))?;
                    reused = Some(found);
                }
                Err(err) => {
                    self.log
                        .write(&format!("Failed to reuse JSON file {results_path}: {err}"))?;
                }
            }
        }

        let (record, annotations, action) = match reused {
            Some((record, annotations)) => (record, annotations, "reused"),
            None => {
                if entry_dir.as_std_path().exists() {
                    Store::remove_dir(&entry_dir)?;
                    self.log.write(&format!("Removed {entry_dir}"))?;
                }
                let record_path = self.store.record_path(&entry.cluster.loci.accession);
                let loaded = Record::load(record_path.as_std_path()).and_then(|mut record| {
                    mibig_loader(entry, &mut record, lineage).map(|annotations| (record, annotations))
                });
                match loaded {
                    Ok((record, annotations)) => (record, annotations, "generated"),
                    Err(err) => {
                        self.log
                            .write(&format!("Failed to generate MIBiG page for {accession}: {err}"))?;
                        Store::remove_dir(&entry_dir)?;
                        return Err(err);
                    }
                }
            }
        };

        sink.event(ProgressEvent {
            message: "phase=Resolve; publications".to_string(),
            elapsed: None,
        });
        let references = self.references(&annotations.data.publications())?;

        sink.event(ProgressEvent {
            message: "phase=Store; writing files".to_string(),
            elapsed: None,
        });
        let mut ctx = RenderContext::new();
        let page = render_entry(&mut ctx, &annotations, &record, &references);
        Store::write_bytes_atomic(&index_path, page.as_bytes())?;

        let document = ResultsDocument {
            schema_version: 1,
            tool: format!("mibig-sideload/{}", env!("CARGO_PKG_VERSION")),
            generated_at: iso_timestamp(),
            accession: accession.clone(),
            taxon,
            annotations: annotations.fingerprint()?,
            record: record.to_value()?,
        };
        let content = serde_json::to_vec_pretty(&document)
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&results_path, &content)?;

        Store::copy_file_atomic(
            &request.annotation_path,
            &self.store.annotations_copy_path(&accession),
        )?;
        let zip_path = if self.config.zip {
            let zip_path = self.store.zip_path(&accession);
            debug!("Zipping output to '{zip_path}'");
            zip_dir(entry_dir.as_std_path(), zip_path.as_std_path())?;
            Some(zip_path.to_string())
        } else {
            None
        };

        self.log
            .write(&format!("Successfully generated MIBiG page for {accession}"))?;
        Ok(GenerateResult {
            accession,
            action: action.to_string(),
            taxon: Some(taxon),
            output_dir: entry_dir.to_string(),
            index_path: index_path.to_string(),
            results_path: Some(results_path.to_string()),
            zip_path,
            alterations: record.alterations().to_vec(),
        })
    }

    fn lineage_for(&self, entry: &MibigEntry) -> Result<Vec<TaxonEntry>, MibigError> {
        let path = self.store.taxonomy_cache_path(entry.accession());
        let mut cache = TaxonomyCache::open(Some(path.as_std_path()))?;
        let tax_id = entry.cluster.ncbi_tax_id.clone();
        with_flush(&mut cache, |cache| {
            cache.lineage(&tax_id, &self.taxonomy, self.config.retry)
        })
    }

    fn reuse(
        results_path: &Utf8Path,
        entry: MibigEntry,
        lineage: Vec<TaxonEntry>,
    ) -> Result<(Record, MibigAnnotations), MibigError> {
        let content = std::fs::read_to_string(results_path.as_std_path())
            .map_err(|err| MibigError::Filesystem(format!("{results_path}: {err}")))?;
        let previous: ResultsDocument = serde_json::from_str(&content)
            .map_err(|err| MibigError::RecordParse(format!("{results_path}: {err}")))?;
        let record = Record::from_value(previous.record)?;
        let annotations = MibigAnnotations::from_previous(&previous.annotations, &record, entry, lineage)?;
        Ok((record, annotations))
    }

    fn references(&self, publications: &[Publication]) -> Result<ReferenceCollection, MibigError> {
        let pubmed_path = self.store.reference_cache_path(&self.config.pubmed_cache);
        let doi_path = self.store.reference_cache_path(&self.config.doi_cache);
        let mut pubmed_cache = PubmedCache::open(Some(pubmed_path.as_std_path()))?;
        let mut doi_cache = DoiCache::open(Some(doi_path.as_std_path()), &self.doi)?;
        let collection =
            ReferenceCollection::build(publications, &mut pubmed_cache, &self.pubmed, &mut doi_cache)?;
        debug!(
            "{} references, {} cached PubMed entries, {} cached DOI entries",
            collection.len(),
            pubmed_cache.len(),
            doi_cache.len()
        );
        Ok(collection)
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
