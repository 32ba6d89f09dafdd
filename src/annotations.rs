//! Serde model of the MIBiG annotation document. Only the parts the
//! sideloader reads are typed; gene annotations and extra genes keep their
//! remaining fields so they can be echoed into result fingerprints.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::Publication;
use crate::error::MibigError;

#[derive(Debug, Clone, Deserialize)]
pub struct MibigEntry {
    pub cluster: Cluster,
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangelogEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub contributors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cluster {
    pub mibig_accession: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub biosynthetic_class: Vec<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub ncbi_tax_id: String,
    #[serde(default)]
    pub organism_name: String,
    pub loci: Loci,
    #[serde(default)]
    pub genes: Option<Genes>,
    #[serde(default)]
    pub compounds: Vec<Compound>,
    #[serde(default)]
    pub polyketide: Option<Polyketide>,
    #[serde(default)]
    pub nrp: Option<Nrp>,
    #[serde(default)]
    pub ripp: Option<Value>,
    #[serde(default)]
    pub saccharide: Option<Saccharide>,
    #[serde(default)]
    pub terpene: Option<Value>,
    #[serde(default)]
    pub publications: Vec<String>,
    #[serde(default)]
    pub retirement_reasons: Vec<String>,
}

fn default_status() -> String {
    "active".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Loci {
    pub accession: String,
    #[serde(default, alias = "start_coord")]
    pub start: Option<i64>,
    #[serde(default, alias = "end_coord")]
    pub end: Option<i64>,
    #[serde(default)]
    pub completeness: Option<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Genes {
    #[serde(default)]
    pub annotations: Vec<GeneAnnotation>,
    #[serde(default)]
    pub extra_genes: Vec<ExtraGene>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneAnnotation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<GeneFunction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tailoring: Vec<String>,
    #[serde(default, alias = "mut_pheno", skip_serializing_if = "Option::is_none")]
    pub mutation_phenotype: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneFunction {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraGene {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeneLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Exons are 1-based and inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneLocation {
    pub exons: Vec<Exon>,
    pub strand: i8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Exon {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Compound {
    pub compound: String,
    #[serde(default)]
    pub chem_moieties: Vec<ChemMoiety>,
    #[serde(default)]
    pub chem_struct: Option<String>,
    #[serde(default)]
    pub molecular_formula: Option<String>,
    #[serde(default)]
    pub mol_mass: Option<f64>,
    #[serde(default)]
    pub database_id: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChemMoiety {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subcluster: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Polyketide {
    #[serde(default)]
    pub subclasses: Vec<String>,
    #[serde(default)]
    pub cyclic: Option<bool>,
    #[serde(default)]
    pub synthases: Vec<PksSynthase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PksSynthase {
    #[serde(default)]
    pub genes: Vec<String>,
    #[serde(default)]
    pub subclass: Vec<String>,
    #[serde(default)]
    pub modules: Vec<PksModule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PksModule {
    #[serde(default)]
    pub genes: Vec<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub module_number: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Nrp {
    #[serde(default)]
    pub subclass: Option<String>,
    #[serde(default)]
    pub cyclic: Option<bool>,
    #[serde(default)]
    pub nrps_genes: Vec<NrpsGene>,
    #[serde(default)]
    pub thioesterases: Vec<Thioesterase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NrpsGene {
    pub gene_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thioesterase {
    pub gene: String,
    #[serde(default)]
    pub thioesterase_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Saccharide {
    #[serde(default)]
    pub subclass: Option<String>,
    #[serde(default)]
    pub glycosyltransferases: Vec<Glycosyltransferase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Glycosyltransferase {
    pub gene_id: String,
    #[serde(default)]
    pub specificity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublicationsOnly {
    cluster: PublicationsCluster,
}

#[derive(Debug, Deserialize)]
struct PublicationsCluster {
    #[serde(default)]
    publications: Vec<String>,
}

/// Reads only `cluster.publications`, so prefetching tolerates documents the
/// full model would reject.
pub fn load_publications(path: &Path) -> Result<Vec<String>, MibigError> {
    let content = fs::read_to_string(path)
        .map_err(|err| MibigError::Filesystem(format!("{}: {err}", path.display())))?;
    let document: PublicationsOnly =
        serde_json::from_str(&content).map_err(|err| MibigError::AnnotationParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    Ok(document.cluster.publications)
}

impl MibigEntry {
    pub fn load(path: &Path) -> Result<Self, MibigError> {
        let content = fs::read_to_string(path)
            .map_err(|err| MibigError::Filesystem(format!("{}: {err}", path.display())))?;
        Self::parse(&content).map_err(|err| MibigError::AnnotationParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn accession(&self) -> &str {
        &self.cluster.mibig_accession
    }

    pub fn is_retired(&self) -> bool {
        self.cluster.status == "retired"
    }

    pub fn gene_annotations(&self) -> &[GeneAnnotation] {
        self.cluster
            .genes
            .as_ref()
            .map(|genes| genes.annotations.as_slice())
            .unwrap_or_default()
    }

    pub fn extra_genes(&self) -> &[ExtraGene] {
        self.cluster
            .genes
            .as_ref()
            .map(|genes| genes.extra_genes.as_slice())
            .unwrap_or_default()
    }

    /// Every gene id the document refers to outside of extra gene definitions.
    pub fn referenced_genes(&self) -> BTreeSet<String> {
        let cluster = &self.cluster;
        let mut referenced: BTreeSet<String> = self
            .gene_annotations()
            .iter()
            .map(|annotation| annotation.id.clone())
            .collect();
        if let Some(nrp) = &cluster.nrp {
            referenced.extend(nrp.nrps_genes.iter().map(|gene| gene.gene_id.clone()));
            referenced.extend(nrp.thioesterases.iter().map(|thio| thio.gene.clone()));
        }
        if let Some(polyketide) = &cluster.polyketide {
            for synthase in &polyketide.synthases {
                referenced.extend(synthase.genes.iter().cloned());
                for module in &synthase.modules {
                    referenced.extend(module.genes.iter().cloned());
                }
            }
        }
        if let Some(saccharide) = &cluster.saccharide {
            referenced.extend(
                saccharide
                    .glycosyltransferases
                    .iter()
                    .map(|transferase| transferase.gene_id.clone()),
            );
        }
        for compound in &cluster.compounds {
            for moiety in &compound.chem_moieties {
                if let Some(subcluster) = &moiety.subcluster {
                    referenced.extend(subcluster.iter().cloned());
                }
            }
        }
        referenced
    }

    /// Parsed publications. Malformed entries are logged and skipped.
    pub fn publications(&self) -> Vec<Publication> {
        self.cluster
            .publications
            .iter()
            .filter_map(|raw| match raw.parse::<Publication>() {
                Ok(publication) => Some(publication),
                Err(err) => {
                    warn!("{}: skipping publication: {err}", self.accession());
                    None
                }
            })
            .collect()
    }

    /// Changelog entries ordered by version, oldest first.
    pub fn sorted_changelog(&self) -> Vec<&ChangelogEntry> {
        let mut entries: Vec<&ChangelogEntry> = self.changelog.iter().collect();
        entries.sort_by(|a, b| version_key(&a.version).cmp(&version_key(&b.version)));
        entries
    }
}

fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
