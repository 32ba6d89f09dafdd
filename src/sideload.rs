//! Applies a MIBiG annotation document to a genomic record, and decides
//! whether a previous result can be reused.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::annotations::{Loci, MibigEntry};
use crate::error::MibigError;
use crate::record::{CdsFeature, GenomicRecord, Location, Strand};
use crate::taxonomy::TaxonEntry;

/// The parts of an annotation that decide whether a prior result is still
/// valid. Missing or zero coordinates are stored as -1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub record_id: String,
    pub genbank_accession: String,
    pub coords: (i64, i64),
    pub gene_annotations: Vec<Value>,
    pub extra_genes: Vec<Value>,
}

impl Fingerprint {
    pub fn of(record_id: &str, entry: &MibigEntry) -> Result<Self, MibigError> {
        let loci = &entry.cluster.loci;
        let gene_annotations = entry
            .gene_annotations()
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| MibigError::RecordParse(err.to_string()))?;
        let extra_genes = entry
            .extra_genes()
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| MibigError::RecordParse(err.to_string()))?;
        Ok(Self {
            record_id: record_id.to_string(),
            genbank_accession: loci.accession.clone(),
            coords: fingerprint_coords(loci),
            gene_annotations,
            extra_genes,
        })
    }
}

fn fingerprint_coords(loci: &Loci) -> (i64, i64) {
    let stored = |value: Option<i64>| value.filter(|value| *value != 0).unwrap_or(-1);
    (stored(loci.start), stored(loci.end))
}

/// Checks `entry` against a previous fingerprint. Only counts are compared
/// for gene annotations and extra genes.
pub fn reconcile(prev: &Fingerprint, record_id: &str, entry: &MibigEntry) -> Result<(), MibigError> {
    let loci = &entry.cluster.loci;
    let coords = fingerprint_coords(loci);
    let mismatch = if loci.accession != prev.genbank_accession {
        Some(("genbank_accession", "GenBank accession changed"))
    } else if record_id != prev.record_id {
        Some(("record_id", "record id changed"))
    } else if coords != prev.coords {
        Some(("coords", "start/end coordinates changed"))
    } else if entry.gene_annotations().len() != prev.gene_annotations.len() {
        Some(("gene_annotations", "gene annotations changed"))
    } else if entry.extra_genes().len() != prev.extra_genes.len() {
        Some(("extra_genes", "additional genes changed"))
    } else {
        None
    };
    match mismatch {
        None => Ok(()),
        Some((field, reason)) => {
            debug!("Previous result's {field} is not the same as the new one");
            error!("Can't reuse MIBiG annotation for {}", entry.accession());
            Err(MibigError::ReuseInvalidated(reason.to_string()))
        }
    }
}

/// Sideloaded annotation state for a single record.
#[derive(Debug, Clone)]
pub struct MibigAnnotations {
    pub record_id: String,
    pub area: Location,
    pub data: MibigEntry,
    pub taxonomy: Vec<TaxonEntry>,
}

impl MibigAnnotations {
    /// Reuses a previous result after [`reconcile`] accepts it. The record is
    /// expected to already carry the earlier re-annotation.
    pub fn from_previous<R: GenomicRecord>(
        prev: &Fingerprint,
        record: &R,
        data: MibigEntry,
        taxonomy: Vec<TaxonEntry>,
    ) -> Result<Self, MibigError> {
        reconcile(prev, record.id(), &data)?;
        let area = cluster_area(&data, record.seq_len())?;
        Ok(Self {
            record_id: record.id().to_string(),
            area,
            data,
            taxonomy,
        })
    }

    pub fn fingerprint(&self) -> Result<Fingerprint, MibigError> {
        Fingerprint::of(&self.record_id, &self.data)
    }

    pub fn product(&self) -> String {
        self.data.cluster.biosynthetic_class.join(", ")
    }
}

/// `[start - 1, end)` of the annotated locus, defaulting to the full record.
pub fn cluster_area(entry: &MibigEntry, seq_len: i64) -> Result<Location, MibigError> {
    let loci = &entry.cluster.loci;
    let start = loci.start.filter(|start| *start > 0).map_or(0, |start| start - 1);
    let end = loci.end.filter(|end| *end > 0).unwrap_or(seq_len);
    Location::new(start, end, Strand::Unknown)
}

/// Re-annotates `record` from `data` and verifies every gene the document
/// mentions exists in the record.
pub fn mibig_loader<R: GenomicRecord>(
    data: MibigEntry,
    record: &mut R,
    taxonomy: Vec<TaxonEntry>,
) -> Result<MibigAnnotations, MibigError> {
    let area = cluster_area(&data, record.seq_len())?;

    for gene in data.extra_genes() {
        let Some(location) = &gene.location else {
            continue;
        };
        if gene.id.is_empty() {
            continue;
        }
        let strand = Strand::from_sign(location.strand);
        let location = Location::from_one_based(
            location.exons.iter().map(|exon| (exon.start, exon.end)),
            strand,
        )?;
        if !area.contains(&location) {
            return Err(MibigError::GeneOutsideCluster(gene.id.clone()));
        }
        let mut feature = CdsFeature::with_locus_tag(location, &gene.id);
        feature.translation = gene.translation.clone();
        record.add_cds_feature(feature, false)?;
        record.add_alteration(&format!("{} was added", gene.id));
    }

    let annotations = data.gene_annotations();
    if !annotations.is_empty() {
        for cds in record.cds_features_mut() {
            if !area.contains(&cds.location) {
                continue;
            }
            for annotation in annotations {
                let matched = cds.locus_tag.as_deref() == Some(annotation.id.as_str())
                    || cds.protein_id.as_deref() == Some(annotation.id.as_str())
                    || (cds.gene.is_some() && cds.gene == annotation.name);
                if !matched {
                    continue;
                }
                if let Some(product) = annotation.product.as_ref().filter(|p| !p.is_empty()) {
                    cds.product = Some(product.clone());
                }
            }
        }
    }

    let existing: BTreeSet<&str> = record
        .cds_features()
        .iter()
        .flat_map(CdsFeature::names)
        .collect();
    let missing: Vec<String> = data
        .referenced_genes()
        .into_iter()
        .filter(|gene| !existing.contains(gene.as_str()))
        .collect();
    if !missing.is_empty() {
        return Err(MibigError::MissingGeneReference {
            accession: data.accession().to_string(),
            missing: missing.join(", "),
        });
    }

    Ok(MibigAnnotations {
        record_id: record.id().to_string(),
        area,
        data,
        taxonomy,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::record::Record;

    fn entry(json: &str) -> MibigEntry {
        MibigEntry::parse(json).unwrap()
    }

    const BASE: &str = r#"{"cluster": {
        "mibig_accession": "BGC0000002",
        "biosynthetic_class": ["NRP", "Polyketide"],
        "ncbi_tax_id": "1",
        "loci": {"accession": "X1", "start": 101, "end": 1000},
        "genes": {"annotations": [{"id": "orf1", "product": "synthase"}]}
    }}"#;

    #[test]
    fn area_is_zero_based() {
        let area = cluster_area(&entry(BASE), 5000).unwrap();
        assert_eq!((area.start(), area.end()), (100, 1000));
    }

    #[test]
    fn product_joins_classes() {
        let mut record = Record::new("X1", 5000);
        record
            .add_cds_feature(
                CdsFeature::with_locus_tag(Location::new(200, 400, Strand::Forward).unwrap(), "orf1"),
                true,
            )
            .unwrap();
        let annotations = mibig_loader(entry(BASE), &mut record, Vec::new()).unwrap();
        assert_eq!(annotations.product(), "NRP, Polyketide");
        assert_eq!(record.cds_features()[0].product.as_deref(), Some("synthase"));
    }

    #[test]
    fn reconcile_detects_coordinate_change() {
        let original = entry(BASE);
        let prev = Fingerprint::of("X1", &original).unwrap();
        assert!(reconcile(&prev, "X1", &original).is_ok());

        let moved = entry(&BASE.replace("\"end\": 1000", "\"end\": 1200"));
        assert_matches!(
            reconcile(&prev, "X1", &moved),
            Err(MibigError::ReuseInvalidated(_))
        );
        assert_matches!(
            reconcile(&prev, "X2", &original),
            Err(MibigError::ReuseInvalidated(_))
        );
    }

    #[test]
    fn zero_and_missing_coordinates_fingerprint_alike() {
        let zero = entry(&BASE.replace("\"start\": 101", "\"start\": 0"));
        let prev = Fingerprint::of("X1", &zero).unwrap();
        assert_eq!(prev.coords, (-1, 1000));

        let missing = entry(&BASE.replace("\"start\": 101, ", ""));
        assert_eq!(Fingerprint::of("X1", &missing).unwrap().coords, (-1, 1000));
        assert!(reconcile(&prev, "X1", &missing).is_ok());
    }
}
