//! Minimal genomic record model: CDS features with locations, plus the
//! bookkeeping needed for name de-duplication and input alterations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MibigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "1")]
    Forward,
    #[serde(rename = "-1")]
    Reverse,
    #[serde(rename = "0")]
    Unknown,
}

impl Strand {
    pub fn from_sign(value: i8) -> Self {
        match value.signum() {
            1 => Strand::Forward,
            -1 => Strand::Reverse,
            _ => Strand::Unknown,
        }
    }

    fn symbol(&self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
            Strand::Unknown => '?',
        }
    }
}

/// 0-based, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub parts: Vec<Span>,
    pub strand: Strand,
}

impl Location {
    pub fn new(start: i64, end: i64, strand: Strand) -> Result<Self, MibigError> {
        Self::compound(vec![Span { start, end }], strand)
    }

    pub fn compound(parts: Vec<Span>, strand: Strand) -> Result<Self, MibigError> {
        if parts.is_empty() {
            return Err(MibigError::InvalidLocation("location without parts".to_string()));
        }
        if let Some(bad) = parts.iter().find(|span| span.start < 0 || span.end < span.start) {
            return Err(MibigError::InvalidLocation(format!("[{}:{}]", bad.start, bad.end)));
        }
        Ok(Self { parts, strand })
    }

    /// Converts 1-based inclusive `(start, end)` pairs.
    pub fn from_one_based<I>(exons: I, strand: Strand) -> Result<Self, MibigError>
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        let parts = exons
            .into_iter()
            .map(|(start, end)| Span { start: start - 1, end })
            .collect();
        Self::compound(parts, strand)
    }

    pub fn start(&self) -> i64 {
        self.parts.iter().map(|span| span.start).min().unwrap_or(0)
    }

    pub fn end(&self) -> i64 {
        self.parts.iter().map(|span| span.end).max().unwrap_or(0)
    }

    /// True when every part of `other` lies inside one part of `self`.
    pub fn contains(&self, other: &Location) -> bool {
        other.parts.iter().all(|inner| {
            self.parts
                .iter()
                .any(|outer| outer.start <= inner.start && inner.end <= outer.end)
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = self.strand.symbol();
        if let [single] = self.parts.as_slice() {
            return write!(f, "[{}:{}]({symbol})", single.start, single.end);
        }
        let joined: Vec<String> = self
            .parts
            .iter()
            .map(|span| format!("[{}:{}]({symbol})", span.start, span.end))
            .collect();
        write!(f, "join{{{}}}", joined.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdsFeature {
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locus_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl CdsFeature {
    pub fn with_locus_tag(location: Location, locus_tag: &str) -> Self {
        Self {
            location,
            locus_tag: Some(locus_tag.to_string()),
            gene: None,
            protein_id: None,
            product: None,
            translation: None,
        }
    }

    /// Preferred name: locus tag, then gene, then protein id.
    pub fn name(&self) -> Option<&str> {
        [&self.locus_tag, &self.gene, &self.protein_id]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|name| !name.is_empty())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        [&self.locus_tag, &self.gene, &self.protein_id]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

/// The operations sideloading needs from a genomic record.
pub trait GenomicRecord {
    fn id(&self) -> &str;
    fn seq_len(&self) -> i64;
    fn cds_features(&self) -> &[CdsFeature];
    fn cds_features_mut(&mut self) -> &mut [CdsFeature];
    fn add_cds_feature(&mut self, feature: CdsFeature, auto_deduplicate: bool) -> Result<(), MibigError>;
    fn add_alteration(&mut self, description: &str);
    fn alterations(&self) -> &[String];

    fn cds_features_within(&self, area: &Location) -> Vec<&CdsFeature> {
        self.cds_features()
            .iter()
            .filter(|cds| area.contains(&cds.location))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    id: String,
    seq_len: i64,
    #[serde(default)]
    cds_features: Vec<CdsFeature>,
    #[serde(default)]
    alterations: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Record {
    id: String,
    seq_len: i64,
    cds: Vec<CdsFeature>,
    by_name: BTreeMap<String, usize>,
    by_location: BTreeMap<String, usize>,
    alterations: Vec<String>,
    renames: BTreeMap<String, Vec<String>>,
    alternative_names: BTreeMap<String, BTreeSet<String>>,
}

impl Record {
    pub fn new(id: &str, seq_len: i64) -> Self {
        Self {
            id: id.to_string(),
            seq_len,
            ..Self::default()
        }
    }

    /// Loads a JSON snapshot. Features go through de-duplication, so
    /// duplicates in the snapshot show up as alterations.
    pub fn load(path: &Path) -> Result<Self, MibigError> {
        let content = fs::read_to_string(path)
            .map_err(|err| MibigError::Filesystem(format!("{}: {err}", path.display())))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, MibigError> {
        let snapshot: Snapshot =
            serde_json::from_str(content).map_err(|err| MibigError::RecordParse(err.to_string()))?;
        Self::from_snapshot(snapshot)
    }

    pub fn from_value(value: Value) -> Result<Self, MibigError> {
        let snapshot: Snapshot =
            serde_json::from_value(value).map_err(|err| MibigError::RecordParse(err.to_string()))?;
        Self::from_snapshot(snapshot)
    }

    fn from_snapshot(snapshot: Snapshot) -> Result<Self, MibigError> {
        let mut record = Self::new(&snapshot.id, snapshot.seq_len);
        record.alterations = snapshot.alterations;
        for feature in snapshot.cds_features {
            record.add_cds_feature(feature, true)?;
        }
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String, MibigError> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|err| MibigError::RecordParse(err.to_string()))
    }

    pub fn to_value(&self) -> Result<Value, MibigError> {
        serde_json::to_value(self.snapshot()).map_err(|err| MibigError::RecordParse(err.to_string()))
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id.clone(),
            seq_len: self.seq_len,
            cds_features: self.cds.clone(),
            alterations: self.alterations.clone(),
        }
    }

    /// Original names that were renamed during de-duplication.
    pub fn renames(&self) -> impl Iterator<Item = &str> {
        self.renames.keys().map(String::as_str)
    }

    pub fn cds_by_name(&self, name: &str) -> Option<&CdsFeature> {
        self.by_name.get(name).map(|index| &self.cds[*index])
    }

    /// Resolves any of a CDS's names (locus tag, gene, protein id) to its
    /// unique name.
    pub fn get_real_cds_name(&self, name: &str) -> Result<String, MibigError> {
        match self.alternative_names.get(name) {
            Some(names) if names.len() > 1 => Err(MibigError::AmbiguousCdsName(name.to_string())),
            Some(names) => names
                .iter()
                .next()
                .cloned()
                .ok_or_else(|| MibigError::UnknownCdsName(name.to_string())),
            None if self.by_name.contains_key(name) => Ok(name.to_string()),
            None => Err(MibigError::UnknownCdsName(name.to_string())),
        }
    }

    fn push_feature(&mut self, feature: CdsFeature, real_name: String) {
        for alternative in feature.names() {
            self.alternative_names
                .entry(alternative.to_string())
                .or_default()
                .insert(real_name.clone());
        }
        let index = self.cds.len();
        self.by_name.insert(real_name, index);
        self.by_location.insert(feature.location.to_string(), index);
        self.cds.push(feature);
    }
}

impl GenomicRecord for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn seq_len(&self) -> i64 {
        self.seq_len
    }

    fn cds_features(&self) -> &[CdsFeature] {
        &self.cds
    }

    fn cds_features_mut(&mut self) -> &mut [CdsFeature] {
        &mut self.cds
    }

    fn add_cds_feature(&mut self, mut feature: CdsFeature, auto_deduplicate: bool) -> Result<(), MibigError> {
        let original_name = feature
            .name()
            .map(str::to_string)
            .ok_or_else(|| MibigError::RecordParse(format!("unnamed CDS at {}", feature.location)))?;
        if !auto_deduplicate {
            self.push_feature(feature, original_name);
            return Ok(());
        }

        let duplicate_name = self.by_name.contains_key(&original_name);
        let location_key = feature.location.to_string();
        let duplicate_location = self.by_location.get(&location_key).copied();

        match (duplicate_name, duplicate_location) {
            (false, None) => self.push_feature(feature, original_name),
            (true, Some(_)) => {
                self.add_alteration(&format!(
                    "removed an exact duplicate of CDS feature {original_name}"
                ));
            }
            (false, Some(existing)) => {
                let existing_name = self.cds[existing].name().unwrap_or_default().to_string();
                self.add_alteration(&format!(
                    "removed {original_name} as a duplicate of {existing_name}"
                ));
            }
            (true, None) => {
                let count = self.renames.get(&original_name).map_or(0, Vec::len) + 1;
                let new_name = format!("{original_name}_rename{count}");
                let field = [
                    &mut feature.locus_tag,
                    &mut feature.gene,
                    &mut feature.protein_id,
                ]
                .into_iter()
                .find(|field| field.as_deref() == Some(original_name.as_str()));
                if let Some(field) = field {
                    *field = Some(new_name.clone());
                }
                self.push_feature(feature, new_name.clone());
                self.renames
                    .entry(original_name.clone())
                    .or_default()
                    .push(new_name.clone());
                self.add_alteration(&format!(
                    "renamed CDS with name {original_name} at {location_key} to {new_name} to avoid duplicates"
                ));
            }
        }
        Ok(())
    }

    fn add_alteration(&mut self, description: &str) {
        if !description.is_empty() {
            self.alterations.push(description.to_string());
        }
    }

    fn alterations(&self) -> &[String] {
        &self.alterations
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn cds(name: &str, start: i64, end: i64) -> CdsFeature {
        CdsFeature::with_locus_tag(Location::new(start, end, Strand::Forward).unwrap(), name)
    }

    #[test]
    fn location_display() {
        let simple = Location::new(0, 10, Strand::Forward).unwrap();
        assert_eq!(simple.to_string(), "[0:10](+)");
        let joined = Location::from_one_based([(1, 10), (21, 30)], Strand::Reverse).unwrap();
        assert_eq!(joined.to_string(), "join{[0:10](-), [20:30](-)}");
    }

    #[test]
    fn dedup_renames_same_name() {
        let mut record = Record::new("rec", 1000);
        record.add_cds_feature(cds("a", 0, 30), true).unwrap();
        record.add_cds_feature(cds("a", 60, 90), true).unwrap();
        record.add_cds_feature(cds("a", 120, 150), true).unwrap();
        let names: Vec<&str> = record
            .cds_features()
            .iter()
            .filter_map(CdsFeature::name)
            .collect();
        assert_eq!(names, vec!["a", "a_rename1", "a_rename2"]);
        assert_eq!(record.alterations().len(), 2);
        assert_eq!(record.renames().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn dedup_drops_duplicates() {
        let mut record = Record::new("rec", 1000);
        record.add_cds_feature(cds("a", 0, 30), true).unwrap();
        record.add_cds_feature(cds("a", 0, 30), true).unwrap();
        record.add_cds_feature(cds("b", 0, 30), true).unwrap();
        assert_eq!(record.cds_features().len(), 1);
        assert_eq!(
            record.alterations(),
            [
                "removed an exact duplicate of CDS feature a".to_string(),
                "removed b as a duplicate of a".to_string(),
            ]
        );
    }

    #[test]
    fn real_cds_name_lookup() {
        let mut record = Record::new("rec", 1000);
        let mut feature = cds("tag1", 0, 30);
        feature.gene = Some("abcA".to_string());
        record.add_cds_feature(feature, true).unwrap();
        let mut other = cds("tag2", 60, 90);
        other.gene = Some("abcA".to_string());
        record.add_cds_feature(other, true).unwrap();

        assert_eq!(record.get_real_cds_name("tag1").unwrap(), "tag1");
        assert_matches!(
            record.get_real_cds_name("abcA"),
            Err(MibigError::AmbiguousCdsName(_))
        );
        assert_matches!(
            record.get_real_cds_name("missing"),
            Err(MibigError::UnknownCdsName(_))
        );
    }

    #[test]
    fn snapshot_round_trip_keeps_alterations() {
        let mut record = Record::new("rec", 500);
        record.add_cds_feature(cds("a", 0, 30), true).unwrap();
        record.add_alteration("something changed");
        let restored = Record::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(restored.id(), "rec");
        assert_eq!(restored.cds_features(), record.cds_features());
        assert_eq!(restored.alterations(), record.alterations());
    }
}
