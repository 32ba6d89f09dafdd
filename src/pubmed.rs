use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::MibigError;
use crate::references::PubmedCache;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubmedArticle {
    pub pmid: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    pub journal: String,
}

pub trait PubmedClient {
    /// Fetches summaries for all `pmids` in one request. Unknown ids are
    /// simply absent from the result.
    fn fetch_summaries(&self, pmids: &[String]) -> Result<Vec<PubmedArticle>, MibigError>;
}

impl<C: PubmedClient + ?Sized> PubmedClient for &C {
    fn fetch_summaries(&self, pmids: &[String]) -> Result<Vec<PubmedArticle>, MibigError> {
        (**self).fetch_summaries(pmids)
    }
}

#[derive(Clone)]
pub struct EutilsPubmedClient {
    client: Client,
    api_key: Option<String>,
}

impl EutilsPubmedClient {
    pub fn new() -> Result<Self, MibigError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mibig-sideload/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MibigError::PubmedHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| MibigError::PubmedHttp(err.to_string()))?;
        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        Ok(Self { client, api_key })
    }
}

impl PubmedClient for EutilsPubmedClient {
    fn fetch_summaries(&self, pmids: &[String]) -> Result<Vec<PubmedArticle>, MibigError> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = pmids.join(",");
        let mut params = vec![
            ("db", "pubmed"),
            ("id", id_list.as_str()),
            ("retmode", "json"),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }
        let response = self
            .client
            .post(format!("{EUTILS_BASE}/esummary.fcgi"))
            .form(&params)
            .send()
            .map_err(|err| MibigError::PubmedHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "PubMed request failed".to_string());
            return Err(MibigError::PubmedStatus { status, message });
        }
        let payload: Value = response
            .json()
            .map_err(|err| MibigError::PubmedHttp(err.to_string()))?;
        Ok(parse_esummary(&payload))
    }
}

/// Extracts articles from an esummary JSON payload. Records carrying an
/// `error` field (unknown ids) are skipped.
pub fn parse_esummary(payload: &Value) -> Vec<PubmedArticle> {
    let mut articles = Vec::new();
    let Some(uids) = payload["result"]["uids"].as_array() else {
        return articles;
    };
    for uid in uids.iter().filter_map(Value::as_str) {
        let record = &payload["result"][uid];
        if record.get("error").is_some() {
            debug!("PubMed has no summary for {uid}");
            continue;
        }
        let authors = record["authors"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|author| author["name"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let journal = record["fulljournalname"]
            .as_str()
            .filter(|value| !value.is_empty())
            .or_else(|| record["source"].as_str())
            .unwrap_or_default()
            .to_string();
        let year = record["pubdate"]
            .as_str()
            .and_then(extract_year)
            .unwrap_or_default();
        articles.push(PubmedArticle {
            pmid: uid.to_string(),
            title: record["title"].as_str().unwrap_or_default().to_string(),
            authors,
            year,
            journal,
        });
    }
    articles
}

fn extract_year(pubdate: &str) -> Option<String> {
    pubdate
        .split(|ch: char| !ch.is_ascii_digit())
        .find(|token| token.len() == 4)
        .map(str::to_string)
}

/// Bulk protocol: fetch only the identifiers missing from `cache`, add every
/// returned article, and repeat while progress is made. Identifiers the
/// service never returns are reported as a lookup miss.
pub fn resolve_missing<C: PubmedClient>(
    cache: &mut PubmedCache,
    client: &C,
    pmids: &[String],
) -> Result<(), MibigError> {
    let mut missing = cache.get_missing(pmids);
    while !missing.is_empty() {
        debug!("Fetching {} PubMed summaries", missing.len());
        let articles = client.fetch_summaries(&missing)?;
        for article in articles {
            cache.add(
                &article.title,
                article.authors,
                &article.year,
                &article.journal,
                &article.pmid,
            );
        }
        let remaining = cache.get_missing(pmids);
        if remaining.len() == missing.len() {
            warn!("PubMed returned no usable records for: {}", remaining.join(", "));
            return Err(MibigError::LookupMiss {
                label: "PubMed".to_string(),
                id: remaining.join(", "),
            });
        }
        missing = remaining;
    }
    Ok(())
}
