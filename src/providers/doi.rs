//! DOI metadata resolution through content negotiation at doi.org, and the
//! cache that resolves on a miss.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::PersistentCache;
use crate::domain::Doi;
use crate::error::MibigError;
use crate::references::{ReferenceCache, ReferenceEntry, ReferenceKind};

const DOI_BASE: &str = "https://doi.org";

const PREPRINT_SERVERS: [&str; 7] = [
    "arxiv",
    "biorxiv",
    "chemrxiv",
    "medrxiv",
    "preprints.org",
    "research square",
    "ssrn",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationFormat {
    CslJson,
    Bibtex,
}

impl CitationFormat {
    pub fn media_type(&self) -> &'static str {
        match self {
            CitationFormat::CslJson => "application/vnd.citationstyles.csl+json",
            CitationFormat::Bibtex => "application/x-bibtex",
        }
    }
}

pub trait DoiSource {
    /// `Ok(None)` means the DOI exists but has no data in this format.
    fn fetch(&self, doi: &Doi, format: CitationFormat) -> Result<Option<String>, MibigError>;
}

impl<S: DoiSource + ?Sized> DoiSource for &S {
    fn fetch(&self, doi: &Doi, format: CitationFormat) -> Result<Option<String>, MibigError> {
        (**self).fetch(doi, format)
    }
}

#[derive(Debug, Clone)]
pub struct DoiHttpClient {
    client: Client,
}

impl DoiHttpClient {
    pub fn new() -> Result<Self, MibigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("mibig-sideload/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| MibigError::CrossrefHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl DoiSource for DoiHttpClient {
    fn fetch(&self, doi: &Doi, format: CitationFormat) -> Result<Option<String>, MibigError> {
        let url = format!("{DOI_BASE}/{}", doi.as_str());
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, format.media_type())
            .send()
            .map_err(|err| MibigError::CrossrefHttp(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| MibigError::CrossrefHttp(err.to_string()));
        classify_status(status, doi, body)
    }
}

/// Maps a doi.org response onto the fetch contract. 204 means no data in the
/// requested format; any other non-200 status is final.
pub fn classify_status(
    status: StatusCode,
    doi: &Doi,
    body: Result<String, MibigError>,
) -> Result<Option<String>, MibigError> {
    match status {
        StatusCode::OK => body.map(Some),
        StatusCode::NO_CONTENT => Ok(None),
        StatusCode::NOT_FOUND => Err(MibigError::InvalidDoi(doi.to_string())),
        status => Err(MibigError::CrossrefStatus {
            status: status.as_u16(),
            message: body
                .ok()
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| "DOI request failed".to_string()),
        }),
    }
}

/// Entries for DOIs whose resolver times out for anything but HTML.
pub fn special_entry(identifier: &str) -> Option<ReferenceEntry> {
    match identifier {
        "10.12211/2096-8280.2021-024" => Some(ReferenceEntry::new(
            ReferenceKind::Doi,
            "Genome mining for novel natural products in Sorangium cellulosum So0157-2 by heterologous expression",
            ["Zhou, H", "Shen, Q", "Chen, H", "Wang, Z", "Li, Y", "Zhang, Y", "Bian, X"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            "2021",
            "Synthetic Biology Journal",
            identifier,
        )),
        _ => None,
    }
}

/// Citation fields common to both remote representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    pub journal: String,
}

/// Looks up DOIs in a [`ReferenceCache`], resolving misses remotely.
pub struct DoiCache<S: DoiSource> {
    cache: ReferenceCache,
    source: S,
}

impl<S: DoiSource> DoiCache<S> {
    pub fn open(cache_file: Option<&Path>, source: S) -> Result<Self, MibigError> {
        Ok(Self {
            cache: ReferenceCache::open(cache_file, ReferenceKind::Doi)?,
            source,
        })
    }

    pub fn get(&mut self, identifier: &str) -> Result<&ReferenceEntry, MibigError> {
        let doi: Doi = identifier.parse()?;
        if !self.cache.contains(doi.as_str()) {
            self.resolve_doi(&doi)?;
        }
        self.cache.get(doi.as_str())
    }

    pub fn add_entry(&mut self, entry: ReferenceEntry) {
        self.cache.add_entry(entry);
    }

    pub fn contains(&self, identifier: &str) -> bool {
        match identifier.parse::<Doi>() {
            Ok(doi) => self.cache.contains(doi.as_str()),
            Err(_) => self.cache.contains(identifier),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Fetches metadata for `identifier` and stores it under the normalized DOI.
    pub fn resolve(&mut self, identifier: &str) -> Result<(), MibigError> {
        let doi: Doi = identifier.parse()?;
        self.resolve_doi(&doi)
    }

    fn resolve_doi(&mut self, doi: &Doi) -> Result<(), MibigError> {
        debug!("Resolving DOI {doi}");
        let mut citation = None;
        if let Some(body) = self.source.fetch(doi, CitationFormat::CslJson)? {
            citation = citation_from_csl(&body)?;
        }
        if citation.is_none() {
            if let Some(body) = self.source.fetch(doi, CitationFormat::Bibtex)? {
                citation = citation_from_bibtex(&body);
            }
        }
        let Some(citation) = citation else {
            return Err(MibigError::DoiResolution(format!(
                "exhausted metadata options for DOI {doi}"
            )));
        };
        self.cache.add(
            &citation.title,
            citation.authors,
            &citation.year,
            &citation.journal,
            doi.as_str(),
        );
        Ok(())
    }
}

impl<S: DoiSource> PersistentCache for DoiCache<S> {
    fn label(&self) -> &str {
        self.cache.label()
    }

    fn has_pending(&self) -> bool {
        self.cache.has_pending()
    }

    fn has_backing_file(&self) -> bool {
        self.cache.has_backing_file()
    }

    fn save(&mut self) -> Result<(), MibigError> {
        self.cache.save()
    }
}

#[derive(Debug, Deserialize)]
struct CslRecord {
    #[serde(default)]
    title: Option<StringOrList>,
    #[serde(default)]
    author: Vec<CslName>,
    #[serde(default)]
    issued: Option<CslDate>,
    #[serde(rename = "published-print", default)]
    published_print: Option<CslDate>,
    #[serde(rename = "published-online", default)]
    published_online: Option<CslDate>,
    #[serde(default)]
    created: Option<CslDate>,
    #[serde(rename = "container-title", default)]
    container_title: Option<StringOrList>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    institution: Vec<CslInstitution>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl StringOrList {
    fn first(&self) -> Option<&str> {
        match self {
            StringOrList::Single(value) => Some(value.as_str()),
            StringOrList::List(values) => values.first().map(String::as_str),
        }
        .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct CslName {
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    literal: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CslDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Value>>,
}

impl CslDate {
    fn year(&self) -> Option<String> {
        let first = self.date_parts.first()?.first()?;
        match first {
            Value::Number(number) => Some(number.to_string()),
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CslInstitution {
    #[serde(default)]
    name: Option<String>,
}

/// Parses CSL-JSON. `Ok(None)` when the record lacks a title or authors.
pub fn citation_from_csl(body: &str) -> Result<Option<Citation>, MibigError> {
    let record: CslRecord = match serde_json::from_str(body) {
        Ok(record) => record,
        Err(err) => {
            debug!("unusable CSL-JSON response: {err}");
            return Ok(None);
        }
    };
    let Some(title) = record.title.as_ref().and_then(StringOrList::first) else {
        return Ok(None);
    };
    let authors: Vec<String> = record.author.iter().filter_map(format_csl_name).collect();
    if authors.is_empty() {
        return Ok(None);
    }
    let year = [
        &record.issued,
        &record.published_print,
        &record.published_online,
        &record.created,
    ]
    .into_iter()
    .flatten()
    .find_map(CslDate::year)
    .unwrap_or_default();

    let journal = if let Some(journal) = record.container_title.as_ref().and_then(StringOrList::first) {
        journal.to_string()
    } else if record.subtype.as_deref() == Some("preprint") {
        "preprint".to_string()
    } else if record.institution.iter().any(|institution| {
        institution
            .name
            .as_deref()
            .map(is_preprint_server)
            .unwrap_or(false)
    }) {
        "preprint".to_string()
    } else {
        return Err(MibigError::DoiResolution(format!(
            "no journal or preprint server found for \"{}\"",
            sanitize_title(title)
        )));
    };

    Ok(Some(Citation {
        title: sanitize_title(title),
        authors,
        year,
        journal,
    }))
}

fn format_csl_name(name: &CslName) -> Option<String> {
    match (&name.family, &name.given) {
        (Some(family), Some(given)) => Some(format!("{family}, {}", initials(given))),
        (Some(family), None) => Some(family.clone()),
        _ => name.literal.clone().or_else(|| name.name.clone()),
    }
}

fn initials(given: &str) -> String {
    given
        .split(|ch: char| ch.is_whitespace() || ch == '-' || ch == '.')
        .filter_map(|part| part.chars().next())
        .collect()
}

fn is_preprint_server(name: &str) -> bool {
    let lowered = name.to_lowercase();
    PREPRINT_SERVERS.iter().any(|server| lowered.contains(server))
}

static BIBTEX_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b([a-z]+)\s*=\s*(?:\{((?:[^{}]|\{[^{}]*\})*)\}|"([^"]*)"|([0-9A-Za-z]+))"#)
        .unwrap()
});

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*</?[A-Za-z][^>]*>\s*").unwrap());

/// Parses `key = {value}` fields out of a BibTeX entry. `None` when title or
/// authors are missing.
pub fn citation_from_bibtex(body: &str) -> Option<Citation> {
    let mut fields = BTreeMap::new();
    for captures in BIBTEX_FIELD.captures_iter(body) {
        let key = captures[1].to_lowercase();
        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .or_else(|| captures.get(4))
            .map(|m| m.as_str().replace(['{', '}'], ""))
            .unwrap_or_default();
        fields.entry(key).or_insert(value);
    }
    let title = fields.get("title").filter(|value| !value.trim().is_empty())?;
    let authors = reformat_bibtex_authors(fields.get("author")?);
    if authors.is_empty() {
        return None;
    }
    Some(Citation {
        title: sanitize_title(title),
        authors,
        year: fields.get("year").cloned().unwrap_or_default(),
        journal: fields
            .get("journal")
            .or_else(|| fields.get("publisher"))
            .cloned()
            .unwrap_or_else(|| "preprint".to_string()),
    })
}

/// Best-effort author normalization for BibTeX author lists.
///
/// If the first author's second token is a lone initial (`Smith J.`), names
/// are assumed to be abbreviated already and are kept. Otherwise names are
/// read as `First Middle Last` and reduced to `Last, FM`. Names written as
/// `Last, First` are reduced the same way.
pub fn reformat_bibtex_authors(raw: &str) -> Vec<String> {
    let names: Vec<String> = raw
        .split(" and ")
        .map(|name| name.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|name| !name.is_empty())
        .collect();
    let Some(first) = names.first() else {
        return names;
    };
    let abbreviated = first
        .split_whitespace()
        .nth(1)
        .map(|token| token.trim_end_matches('.').chars().count() == 1)
        .unwrap_or(false);
    if abbreviated {
        return names;
    }
    names
        .iter()
        .map(|name| {
            if let Some((last, given)) = name.split_once(',') {
                return format!("{}, {}", last.trim(), initials(given.trim()));
            }
            let tokens: Vec<&str> = name.split_whitespace().collect();
            match tokens.split_last() {
                Some((last, given)) if !given.is_empty() => {
                    format!("{last}, {}", initials(&given.join(" ")))
                }
                _ => name.clone(),
            }
        })
        .collect()
}

/// Removes HTML tag artifacts along with whitespace hugging them.
pub fn sanitize_title(title: &str) -> String {
    let stripped = HTML_TAG.replace_all(title, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_tags() {
        assert_eq!(
            sanitize_title("Biosynthesis of <i>\n  epothilone </i> in\tmyxobacteria"),
            "Biosynthesis of epothilone in myxobacteria"
        );
    }

    #[test]
    fn bibtex_full_names_reduced() {
        let authors = reformat_bibtex_authors("Jane Mary Doe and John Smith");
        assert_eq!(authors, vec!["Doe, JM", "Smith, J"]);
    }

    #[test]
    fn bibtex_abbreviated_names_kept() {
        let authors = reformat_bibtex_authors("Doe J. and Smith A.");
        assert_eq!(authors, vec!["Doe J.", "Smith A."]);
    }

    #[test]
    fn bibtex_fields_parsed() {
        let body = r#"@article{Doe_2020, title={A {Streptomyces} cluster}, volume={1},
            journal={Nature Chemistry}, publisher={Springer}, author={Jane Doe and John Smith},
            year=2020, month=jan}"#;
        let citation = citation_from_bibtex(body).unwrap();
        assert_eq!(citation.title, "A Streptomyces cluster");
        assert_eq!(citation.journal, "Nature Chemistry");
        assert_eq!(citation.year, "2020");
        assert_eq!(citation.authors, vec!["Doe, J", "Smith, J"]);
    }

    #[test]
    fn csl_preprint_fallback() {
        let body = r#"{"title": "A preprint", "author": [{"family": "Doe", "given": "Jane"}],
            "issued": {"date-parts": [[2021, 4]]}, "subtype": "preprint"}"#;
        let citation = citation_from_csl(body).unwrap().unwrap();
        assert_eq!(citation.journal, "preprint");
        assert_eq!(citation.year, "2021");
        assert_eq!(citation.authors, vec!["Doe, J"]);
    }

    fn doi() -> Doi {
        "10.1000/xyz".parse().unwrap()
    }

    #[test]
    fn ok_status_returns_body() {
        let body = classify_status(StatusCode::OK, &doi(), Ok("{}".to_string())).unwrap();
        assert_eq!(body.as_deref(), Some("{}"));
    }

    #[test]
    fn no_content_means_no_data_in_format() {
        let body = classify_status(StatusCode::NO_CONTENT, &doi(), Ok(String::new())).unwrap();
        assert!(body.is_none());
    }

    #[test]
    fn not_found_is_an_invalid_doi() {
        let result = classify_status(StatusCode::NOT_FOUND, &doi(), Ok("gone".to_string()));
        assert!(matches!(result, Err(MibigError::InvalidDoi(value)) if value == "10.1000/xyz"));
    }

    #[test]
    fn other_statuses_are_final() {
        let result = classify_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            &doi(),
            Ok("upstream down".to_string()),
        );
        assert!(matches!(
            result,
            Err(MibigError::CrossrefStatus { status: 500, message }) if message == "upstream down"
        ));
        let result = classify_status(
            StatusCode::SERVICE_UNAVAILABLE,
            &doi(),
            Err(MibigError::CrossrefHttp("reset".to_string())),
        );
        let message = match result {
            Err(MibigError::CrossrefStatus { status: 503, message }) => message,
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(message, "DOI request failed");
    }

    #[test]
    fn csl_without_journal_fails() {
        let body = r#"{"title": "Orphan", "author": [{"family": "Doe", "given": "Jane"}]}"#;
        assert!(citation_from_csl(body).is_err());
    }
}
