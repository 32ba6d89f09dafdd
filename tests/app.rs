use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use mibig_sideload::app::{App, GenerateRequest, ProgressEvent, ProgressSink, RunLog};
use mibig_sideload::config::ResolvedConfig;
use mibig_sideload::domain::{Doi, Taxon};
use mibig_sideload::error::MibigError;
use mibig_sideload::fs_util::zip_entry_names;
use mibig_sideload::providers::doi::{CitationFormat, DoiSource};
use mibig_sideload::pubmed::{PubmedArticle, PubmedClient};
use mibig_sideload::store::Store;
use mibig_sideload::taxonomy::{RetryPolicy, TaxonEntry, TaxonomyClient};

#[derive(Default)]
struct MockDoi {
    calls: Mutex<usize>,
}

impl DoiSource for MockDoi {
    fn fetch(&self, doi: &Doi, format: CitationFormat) -> Result<Option<String>, MibigError> {
        *self.calls.lock().unwrap() += 1;
        if format != CitationFormat::CslJson {
            return Ok(None);
        }
        Ok(Some(format!(
            r#"{{"title": "Paper {doi}", "author": [{{"family": "Smith", "given": "J"}}], "issued": {{"date-parts": [[2021]]}}, "container-title": "Nature"}}"#
        )))
    }
}

#[derive(Default)]
struct MockPubmed {
    calls: Mutex<usize>,
}

impl PubmedClient for MockPubmed {
    fn fetch_summaries(&self, pmids: &[String]) -> Result<Vec<PubmedArticle>, MibigError> {
        *self.calls.lock().unwrap() += 1;
        Ok(pmids
            .iter()
            .map(|pmid| PubmedArticle {
                pmid: pmid.clone(),
                title: format!("PubMed article {pmid}"),
                authors: vec!["Doe A".to_string()],
                year: "2015".to_string(),
                journal: "Cell".to_string(),
            })
            .collect())
    }
}

#[derive(Default)]
struct MockTaxonomy {
    calls: Mutex<usize>,
}

impl TaxonomyClient for MockTaxonomy {
    fn fetch_lineage(&self, tax_id: &str) -> Result<Vec<TaxonEntry>, MibigError> {
        *self.calls.lock().unwrap() += 1;
        Ok(vec![
            TaxonEntry {
                name: "Streptomyces coelicolor".to_string(),
                taxid: tax_id.to_string(),
                rank: "species".to_string(),
            },
            TaxonEntry {
                name: "Bacteria".to_string(),
                taxid: "2".to_string(),
                rank: "superkingdom".to_string(),
            },
        ])
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

const ENTRY: &str = r#"{
    "cluster": {
        "mibig_accession": "BGC0000001",
        "biosynthetic_class": ["Polyketide"],
        "ncbi_tax_id": "1902",
        "organism_name": "Streptomyces coelicolor",
        "loci": {"accession": "AB000001.1", "start": 1, "end": 900},
        "genes": {
            "annotations": [{"id": "orf1", "product": "polyketide synthase"}],
            "extra_genes": [{"id": "extra1", "location": {"exons": [{"start": 501, "end": 600}], "strand": 1}}]
        },
        "publications": ["pubmed:123", "doi:10.1000/xyz", "pubmed:0"]
    },
    "changelog": [{"version": "1.0", "comments": ["Entry created"], "contributors": ["AAAAAAAAAAAAAAAAAAAAAAAA"]}]
}"#;

const RECORD: &str = r#"{
    "id": "AB000001.1",
    "seq_len": 1000,
    "cds_features": [
        {"location": {"parts": [{"start": 0, "end": 300}], "strand": "1"}, "locus_tag": "orf1"}
    ]
}"#;

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    annotation: Utf8PathBuf,
    log: Utf8PathBuf,
}

impl Fixture {
    fn new(entry: &str) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("records")).unwrap();
        fs::write(root.join("records").join("AB000001.1.json"), RECORD).unwrap();
        let annotation = root.join("BGC0000001.json");
        fs::write(&annotation, entry).unwrap();
        let log = root.join("run.log");
        Self {
            _temp: temp,
            root,
            annotation,
            log,
        }
    }

    fn config(&self) -> ResolvedConfig {
        ResolvedConfig {
            schema_version: 1,
            cache_dir: self.root.join("cache"),
            doi_cache: "doi_cache.json".to_string(),
            pubmed_cache: "pubmed_cache.json".to_string(),
            ncbi_email: None,
            retry: RetryPolicy {
                attempts: 1,
                delay: Duration::ZERO,
            },
            zip: true,
        }
    }

    fn app<'a>(
        &self,
        doi: &'a MockDoi,
        pubmed: &'a MockPubmed,
        taxonomy: &'a MockTaxonomy,
    ) -> App<&'a MockDoi, &'a MockPubmed, &'a MockTaxonomy> {
        let store = Store::new(
            self.root.join("output"),
            self.root.join("cache"),
            self.root.join("records"),
        );
        App::new(
            store,
            self.config(),
            RunLog::new(Some(self.log.clone())),
            doi,
            pubmed,
            taxonomy,
        )
    }

    fn request(&self) -> GenerateRequest {
        GenerateRequest {
            annotation_path: self.annotation.clone(),
        }
    }

    fn log_text(&self) -> String {
        fs::read_to_string(&self.log).unwrap_or_default()
    }
}

fn exists(path: &Utf8Path) -> bool {
    path.as_std_path().exists()
}

#[test]
fn generate_then_reuse_then_regenerate_after_edit() {
    let fixture = Fixture::new(ENTRY);
    let (doi, pubmed, taxonomy) = (MockDoi::default(), MockPubmed::default(), MockTaxonomy::default());
    let app = fixture.app(&doi, &pubmed, &taxonomy);
    let sink = RecordingSink::default();

    let first = app.generate(&fixture.request(), &sink).unwrap();
    assert_eq!(first.action, "generated");
    assert_eq!(first.taxon, Some(Taxon::Bacteria));
    assert_eq!(first.alterations, vec!["extra1 was added".to_string()]);

    let index = fs::read_to_string(&first.index_path).unwrap();
    assert!(index.contains("PubMed article 123."));
    assert!(index.contains("Paper 10.1000/xyz."));
    assert!(index.contains("polyketide synthase"));
    assert!(index.contains("Bacteria &gt; Streptomyces coelicolor"));

    let output = fixture.root.join("output").join("BGC0000001");
    assert!(exists(&output.join("annotations.json")));
    assert!(exists(&output.join("BGC0000001.1.json")));
    let zip_path = first.zip_path.clone().unwrap();
    let names = zip_entry_names(Utf8Path::new(&zip_path).as_std_path()).unwrap();
    assert!(names.contains(&"index.html".to_string()));
    assert!(names.contains(&"BGC0000001.1.json".to_string()));
    assert!(names.contains(&"annotations.json".to_string()));
    assert!(exists(&fixture.root.join("cache").join("BGC0000001.cache.json")));
    assert!(exists(&fixture.root.join("cache").join("doi_cache.json")));
    assert!(exists(&fixture.root.join("cache").join("pubmed_cache.json")));
    assert!(fixture.log_text().contains("Successfully generated MIBiG page for BGC0000001"));
    assert!(!sink.events.lock().unwrap().is_empty());

    let second = app.generate(&fixture.request(), &sink).unwrap();
    assert_eq!(second.action, "reused");
    assert_eq!(second.alterations, first.alterations);
    assert_eq!(*taxonomy.calls.lock().unwrap(), 1);
    assert_eq!(*pubmed.calls.lock().unwrap(), 1);
    assert_eq!(*doi.calls.lock().unwrap(), 1);
    assert!(fixture.log_text().contains("Successfully reused JSON file"));

    let edited = ENTRY
        .replace("\"end\": 900", "\"end\": 950")
        .replace("polyketide synthase", "type I polyketide synthase");
    fs::write(&fixture.annotation, edited).unwrap();
    let third = app.generate(&fixture.request(), &sink).unwrap();
    assert_eq!(third.action, "generated");
    let index = fs::read_to_string(&third.index_path).unwrap();
    assert!(index.contains("type I polyketide synthase"));
    let log = fixture.log_text();
    assert!(log.contains("Failed to reuse JSON file"));
    assert!(log.contains(&format!("Removed {output}")));

    let fourth = app.generate(&fixture.request(), &sink).unwrap();
    assert_eq!(fourth.action, "reused");
}

#[test]
fn missing_gene_removes_partial_output() {
    let broken = ENTRY.replace(
        r#""annotations": [{"id": "orf1", "product": "polyketide synthase"}]"#,
        r#""annotations": [{"id": "orf1"}, {"id": "ghost"}]"#,
    );
    let fixture = Fixture::new(&broken);
    let (doi, pubmed, taxonomy) = (MockDoi::default(), MockPubmed::default(), MockTaxonomy::default());
    let app = fixture.app(&doi, &pubmed, &taxonomy);

    assert_matches!(
        app.generate(&fixture.request(), &RecordingSink::default()),
        Err(MibigError::MissingGeneReference { missing, .. }) if missing == "ghost"
    );
    assert!(!exists(&fixture.root.join("output").join("BGC0000001")));
    assert!(fixture.log_text().contains("Failed to generate MIBiG page for BGC0000001"));
}

#[test]
fn retired_entry_gets_a_notice_page() {
    let retired = ENTRY.replace(
        r#""mibig_accession": "BGC0000001","#,
        r#""mibig_accession": "BGC0000001", "status": "retired", "retirement_reasons": ["Duplicate of BGC0000002"],"#,
    );
    let fixture = Fixture::new(&retired);
    let (doi, pubmed, taxonomy) = (MockDoi::default(), MockPubmed::default(), MockTaxonomy::default());
    let app = fixture.app(&doi, &pubmed, &taxonomy);

    let result = app.generate(&fixture.request(), &RecordingSink::default()).unwrap();
    assert_eq!(result.action, "retired");
    assert!(result.results_path.is_none());
    let index = fs::read_to_string(&result.index_path).unwrap();
    assert!(index.contains("Duplicate of BGC0000002"));
    assert_eq!(*doi.calls.lock().unwrap(), 0);
}

#[test]
fn unrecognized_taxon_is_logged() {
    struct Archaea;

    impl TaxonomyClient for Archaea {
        fn fetch_lineage(&self, _tax_id: &str) -> Result<Vec<TaxonEntry>, MibigError> {
            Ok(vec![TaxonEntry {
                name: "Archaea".to_string(),
                taxid: "2157".to_string(),
                rank: "superkingdom".to_string(),
            }])
        }
    }

    let fixture = Fixture::new(ENTRY);
    let store = Store::new(
        fixture.root.join("output"),
        fixture.root.join("cache"),
        fixture.root.join("records"),
    );
    let app = App::new(
        store,
        fixture.config(),
        RunLog::new(Some(fixture.log.clone())),
        MockDoi::default(),
        MockPubmed::default(),
        Archaea,
    );
    assert_matches!(
        app.generate(&fixture.request(), &RecordingSink::default()),
        Err(MibigError::UnrecognizedTaxon { .. })
    );
    assert!(fixture.log_text().contains("Unrecognizable taxons BGC0000001 (Archaea)"));
}

#[test]
fn prefetch_dois_normalizes_keys_and_uses_special_entries() {
    let fixture = Fixture::new(ENTRY);
    let input = fixture.root.join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(
        input.join("a.json"),
        r#"{"cluster": {"publications": ["doi:10.12211/2096-8280.2021-024", "pubmed:1"]}}"#,
    )
    .unwrap();
    fs::write(
        input.join("b.json"),
        r#"{"cluster": {"publications": ["doi:10.1000/xyz", "doi:https://doi.org/10.1000/xyz"]}}"#,
    )
    .unwrap();

    let (doi, pubmed, taxonomy) = (MockDoi::default(), MockPubmed::default(), MockTaxonomy::default());
    let app = fixture.app(&doi, &pubmed, &taxonomy);
    let cache_path = fixture.root.join("doi_cache.json");
    let result = app
        .prefetch_dois(&input, &cache_path, &RecordingSink::default())
        .unwrap();

    assert_eq!(result.files, 2);
    assert_eq!(result.identifiers, 2);
    assert_eq!(result.fetched, 1);
    assert_eq!(*doi.calls.lock().unwrap(), 1);
    let content = fs::read_to_string(&cache_path).unwrap();
    assert!(content.contains("10.12211/2096-8280.2021-024"));
    assert!(content.contains("10.1000/xyz"));
    assert!(!content.contains("https://doi.org/"));
}

#[test]
fn prefetch_pubmed_fetches_missing_ids_once() {
    let fixture = Fixture::new(ENTRY);
    let input = fixture.root.join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(
        input.join("a.json"),
        r#"{"cluster": {"publications": ["pubmed:5", "pubmed:0", "pubmed:7"]}}"#,
    )
    .unwrap();

    let (doi, pubmed, taxonomy) = (MockDoi::default(), MockPubmed::default(), MockTaxonomy::default());
    let app = fixture.app(&doi, &pubmed, &taxonomy);
    let cache_path = fixture.root.join("pubmed_cache.json");
    let result = app
        .prefetch_pubmed(&input, &cache_path, &RecordingSink::default())
        .unwrap();
    assert_eq!(result.identifiers, 2);
    assert_eq!(result.fetched, 2);

    let again = app
        .prefetch_pubmed(&input, &cache_path, &RecordingSink::default())
        .unwrap();
    assert_eq!(again.fetched, 0);
    assert_eq!(*pubmed.calls.lock().unwrap(), 1);
}
