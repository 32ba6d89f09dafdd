use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MibigError {
    #[error("{label} identifier not found: {id}")]
    LookupMiss { label: String, id: String },

    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("invalid PubMed id: {0}")]
    InvalidPmid(String),

    #[error("invalid publication reference: {0}")]
    InvalidPublication(String),

    #[error("{0}")]
    DoiResolution(String),

    #[error("DOI request failed: {0}")]
    CrossrefHttp(String),

    #[error("DOI lookup returned status {status}: {message}")]
    CrossrefStatus { status: u16, message: String },

    #[error("PubMed request failed: {0}")]
    PubmedHttp(String),

    #[error("PubMed returned status {status}: {message}")]
    PubmedStatus { status: u16, message: String },

    #[error("NCBI taxonomy request failed: {0}")]
    TaxonomyHttp(String),

    #[error("failed to parse NCBI taxonomy response: {0}")]
    TaxonomyParse(String),

    #[error("unrecognizable taxon for {accession}: {lineage}")]
    UnrecognizedTaxon { accession: String, lineage: String },

    #[error("previous result cannot be reused: {0}")]
    #[diagnostic(help("the record or gene annotations changed; rerun without reusing results"))]
    ReuseInvalidated(String),

    #[error("{accession} refers to missing genes: {missing}")]
    MissingGeneReference { accession: String, missing: String },

    #[error("additional gene {0} lies outside cluster")]
    GeneOutsideCluster(String),

    #[error("unknown CDS/gene name: {0}")]
    UnknownCdsName(String),

    #[error("multiple features map to alternative CDS/gene name {0}")]
    AmbiguousCdsName(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("failed to parse annotation file {path}: {message}")]
    AnnotationParse { path: PathBuf, message: String },

    #[error("failed to parse cache file {path}: {message}")]
    CacheParse { path: PathBuf, message: String },

    #[error("failed to parse record snapshot: {0}")]
    RecordParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
