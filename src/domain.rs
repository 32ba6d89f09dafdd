use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MibigError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Doi(String);

impl Doi {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Doi {
    type Err = MibigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let normalized = trimmed
            .strip_prefix("https://doi.org/")
            .or_else(|| trimmed.strip_prefix("https://dx.doi.org/"))
            .or_else(|| trimmed.strip_prefix("doi:"))
            .unwrap_or(trimmed);
        let Some((prefix, suffix)) = normalized.split_once('/') else {
            return Err(MibigError::InvalidDoi(value.to_string()));
        };
        let valid_prefix = prefix
            .strip_prefix("10.")
            .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(false);
        if !valid_prefix || suffix.trim().is_empty() {
            return Err(MibigError::InvalidDoi(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pmid(String);

impl Pmid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// MIBiG uses `pubmed:0` as a placeholder for "no publication".
    pub fn is_placeholder(&self) -> bool {
        self.0 == "0"
    }
}

impl fmt::Display for Pmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Pmid {
    type Err = MibigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.is_empty() || !normalized.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(MibigError::InvalidPmid(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// A single entry of `cluster.publications`, e.g. `pubmed:12345`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    Pubmed(Pmid),
    Doi(Doi),
    Patent(String),
    Url(String),
}

impl Publication {
    pub fn category(&self) -> &'static str {
        match self {
            Publication::Pubmed(_) => "pubmed",
            Publication::Doi(_) => "doi",
            Publication::Patent(_) => "patent",
            Publication::Url(_) => "url",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Publication::Pubmed(pmid) => pmid.as_str(),
            Publication::Doi(doi) => doi.as_str(),
            Publication::Patent(value) | Publication::Url(value) => value,
        }
    }

    pub fn link(&self) -> String {
        match self {
            Publication::Pubmed(pmid) => format!("https://www.ncbi.nlm.nih.gov/pubmed/{pmid}"),
            Publication::Doi(doi) => format!("https://dx.doi.org/{doi}"),
            Publication::Patent(id) => format!("https://patents.google.com/patent/{id}"),
            Publication::Url(url) => url.clone(),
        }
    }
}

impl FromStr for Publication {
    type Err = MibigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (kind, rest) = trimmed
            .split_once(':')
            .ok_or_else(|| MibigError::InvalidPublication(value.to_string()))?;
        match kind {
            "pubmed" => Ok(Publication::Pubmed(rest.parse()?)),
            "doi" => Ok(Publication::Doi(rest.parse()?)),
            "patent" if !rest.trim().is_empty() => Ok(Publication::Patent(rest.trim().to_string())),
            "url" if !rest.trim().is_empty() => Ok(Publication::Url(rest.trim().to_string())),
            _ => Err(MibigError::InvalidPublication(value.to_string())),
        }
    }
}

/// Taxon used to drive downstream analysis, derived from the NCBI lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Taxon {
    Bacteria,
    Fungi,
    Plants,
}

impl fmt::Display for Taxon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Taxon::Bacteria => write!(f, "bacteria"),
            Taxon::Fungi => write!(f, "fungi"),
            Taxon::Plants => write!(f, "plants"),
        }
    }
}
