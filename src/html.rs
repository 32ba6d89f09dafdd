//! Static HTML page for a sideloaded entry.

use std::collections::BTreeSet;

use crate::annotations::{GeneAnnotation, MibigEntry};
use crate::links::ReferenceCollection;
use crate::record::{CdsFeature, GenomicRecord, Strand};
use crate::sideload::MibigAnnotations;
use crate::taxonomy::taxonomy_path;

/// Per-page rendering state. Tooltip ids are unique within one context.
#[derive(Debug, Default)]
pub struct RenderContext {
    tooltips: usize,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn help_tooltip(&mut self, text: &str, name: &str, inline: bool) -> String {
        self.tooltips += 1;
        let unique_id = format!("{name}-help-{}", self.tooltips);
        format!(
            "<div class=\"help-container{}\"> <div class=\"help-icon\" data-id=\"{unique_id}\"></div> \
             <span class=\"help-tooltip\" id=\"{unique_id}\">{}</span></div>",
            if inline { "-inline" } else { "" },
            escape(text)
        )
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// One row of the genes table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneRow {
    pub locus_tag: Option<String>,
    pub protein_id: Option<String>,
    pub gene: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub strand: Option<char>,
    pub product: String,
    pub functions: Vec<String>,
    pub evidences: Vec<String>,
    pub translation: Option<String>,
}

/// Merges CDS features in the cluster area with gene annotations. Each
/// annotation is used at most once; leftovers are appended as rows of
/// their own.
pub fn gene_rows<R: GenomicRecord>(annotations: &MibigAnnotations, record: &R) -> Vec<GeneRow> {
    let mut remaining: Vec<&GeneAnnotation> = annotations.data.gene_annotations().iter().collect();
    let mut rows = Vec::new();
    for cds in record.cds_features_within(&annotations.area) {
        let mut row = row_for_cds(cds);
        let feature_names: BTreeSet<&str> = cds.names().collect();
        let matched = remaining.iter().position(|annotation| {
            feature_names.contains(annotation.id.as_str())
                || annotation
                    .name
                    .as_deref()
                    .is_some_and(|name| feature_names.contains(name))
        });
        if let Some(index) = matched {
            let annotation = remaining.remove(index);
            apply_annotation(&mut row, annotation);
            if let Some(product) = annotation.product.as_ref().filter(|p| !p.is_empty()) {
                row.product = product.clone();
            }
        }
        rows.push(row);
    }
    for annotation in remaining {
        let mut row = GeneRow {
            locus_tag: Some(annotation.id.clone()),
            gene: annotation.name.clone(),
            product: annotation.product.clone().unwrap_or_default(),
            ..GeneRow::default()
        };
        apply_annotation(&mut row, annotation);
        rows.push(row);
    }
    rows
}

fn row_for_cds(cds: &CdsFeature) -> GeneRow {
    GeneRow {
        locus_tag: cds.locus_tag.clone(),
        protein_id: cds.protein_id.clone(),
        gene: cds.gene.clone(),
        start: Some(cds.location.start() + 1),
        end: Some(cds.location.end()),
        strand: Some(if cds.location.strand == Strand::Reverse { '-' } else { '+' }),
        product: cds.product.clone().unwrap_or_default(),
        functions: Vec::new(),
        evidences: Vec::new(),
        translation: cds.translation.clone(),
    }
}

fn apply_annotation(row: &mut GeneRow, annotation: &GeneAnnotation) {
    let mut evidences = BTreeSet::new();
    for function in &annotation.functions {
        let mut text = function.category.clone();
        if !annotation.tailoring.is_empty() {
            text.push_str(&format!(" ({})", annotation.tailoring.join(", ")));
        }
        row.functions.push(text);
        evidences.extend(function.evidence.iter().cloned());
    }
    if let Some(phenotype) = &annotation.mutation_phenotype {
        row.functions.push(format!("Mutation phenotype: {phenotype}"));
    }
    row.evidences = evidences.into_iter().collect();
}

fn section(out: &mut String, title: &str, class_name: &str, body: &str) {
    out.push_str(&format!(
        "<div class=\"details-section {class_name}\">\n<h3>{}</h3>\n{body}</div>\n",
        escape(title)
    ));
}

fn definition_table(rows: &[(&str, String)]) -> String {
    let mut out = String::from("<table class=\"mibig-table\">\n");
    for (label, value) in rows {
        out.push_str(&format!("<tr><th>{}</th><td>{value}</td></tr>\n", escape(label)));
    }
    out.push_str("</table>\n");
    out
}

fn optional(value: Option<&str>) -> String {
    value.map(escape).unwrap_or_default()
}

fn render_general(ctx: &mut RenderContext, annotations: &MibigAnnotations, references: &ReferenceCollection) -> String {
    let cluster = &annotations.data.cluster;
    let mut publications = String::new();
    if !references.is_empty() {
        publications.push_str("<ul>");
        for link in references.links() {
            publications.push_str(&format!(
                "<li><a href=\"{}\" target=\"_blank\">{}</a>",
                escape(&link.url),
                escape(&link.title)
            ));
            if let Some(info) = &link.info {
                publications.push_str(&format!(" <span class=\"reference-info\">{}</span>", escape(info)));
            }
            publications.push_str("</li>");
        }
        publications.push_str("</ul>");
    }
    let loci = &cluster.loci;
    let locus = match (loci.start, loci.end) {
        (Some(start), Some(end)) => format!("{} ({start}-{end})", escape(&loci.accession)),
        _ => escape(&loci.accession),
    };
    let mut rows = vec![
        ("MIBiG accession", escape(&cluster.mibig_accession)),
        ("Status", escape(&cluster.status)),
        ("Biosynthetic class(es)", escape(&annotations.product())),
        ("Locus", locus),
        ("Organism", escape(&cluster.organism_name)),
        (
            "Taxonomy",
            format!(
                "{}{}",
                escape(&taxonomy_path(&annotations.taxonomy)),
                ctx.help_tooltip(&format!("NCBI taxonomy id {}", cluster.ncbi_tax_id), "mibig-taxonomy", true)
            ),
        ),
    ];
    if !loci.evidence.is_empty() {
        rows.push(("Evidence", escape(&loci.evidence.join(", "))));
    }
    rows.push(("Publications", publications));
    definition_table(&rows)
}

fn render_compounds(entry: &MibigEntry) -> String {
    let mut out = String::from("<table class=\"mibig-table\">\n<tr><th>Compound</th><th>Formula</th><th>Mass</th><th>Structure</th></tr>\n");
    for compound in &entry.cluster.compounds {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&compound.compound),
            optional(compound.molecular_formula.as_deref()),
            compound.mol_mass.map(|mass| format!("{mass:.4}")).unwrap_or_default(),
            optional(compound.chem_struct.as_deref()),
        ));
    }
    out.push_str("</table>\n");
    out
}

fn render_genes(ctx: &mut RenderContext, rows: &[GeneRow]) -> String {
    let mut out = String::from(
        "<table class=\"mibig-table\">\n<tr><th>Locus tag</th><th>Protein id</th><th>Gene</th>\
         <th>Position</th><th>Product</th><th>Functions</th></tr>\n",
    );
    for row in rows {
        let position = match (row.start, row.end, row.strand) {
            (Some(start), Some(end), Some(strand)) => format!("{start}-{end} ({strand})"),
            _ => String::new(),
        };
        let mut functions: Vec<String> = row.functions.iter().map(|text| escape(text)).collect();
        if !row.evidences.is_empty() {
            functions.push(ctx.help_tooltip(
                &format!("Evidence: {}", row.evidences.join(", ")),
                "mibig-genes",
                true,
            ));
        }
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{position}</td><td>{}</td><td>{}</td></tr>\n",
            optional(row.locus_tag.as_deref()),
            optional(row.protein_id.as_deref()),
            optional(row.gene.as_deref()),
            escape(&row.product),
            functions.join("<br>"),
        ));
    }
    out.push_str("</table>\n");
    out
}

fn render_polyketide(entry: &MibigEntry) -> Option<String> {
    let polyketide = entry.cluster.polyketide.as_ref()?;
    let mut rows = vec![("Subclasses", escape(&polyketide.subclasses.join(", ")))];
    if let Some(cyclic) = polyketide.cyclic {
        rows.push(("Cyclic", if cyclic { "yes" } else { "no" }.to_string()));
    }
    let mut out = definition_table(&rows);
    for synthase in &polyketide.synthases {
        out.push_str(&format!(
            "<h4>Synthase: {}</h4>\n<ul>",
            escape(&synthase.genes.join(", "))
        ));
        for module in &synthase.modules {
            out.push_str(&format!(
                "<li>Module {}: {} [{}]</li>",
                optional(module.module_number.as_deref()),
                escape(&module.genes.join(", ")),
                escape(&module.domains.join(", "))
            ));
        }
        out.push_str("</ul>\n");
    }
    Some(out)
}

fn render_nrp(entry: &MibigEntry) -> Option<String> {
    let nrp = entry.cluster.nrp.as_ref()?;
    let mut rows = vec![("Subclass", optional(nrp.subclass.as_deref()))];
    if let Some(cyclic) = nrp.cyclic {
        rows.push(("Cyclic", if cyclic { "yes" } else { "no" }.to_string()));
    }
    let genes: Vec<&str> = nrp.nrps_genes.iter().map(|gene| gene.gene_id.as_str()).collect();
    rows.push(("NRPS genes", escape(&genes.join(", "))));
    let thioesterases: Vec<String> = nrp
        .thioesterases
        .iter()
        .map(|thio| match &thio.thioesterase_type {
            Some(kind) => format!("{} ({kind})", thio.gene),
            None => thio.gene.clone(),
        })
        .collect();
    rows.push(("Thioesterases", escape(&thioesterases.join(", "))));
    Some(definition_table(&rows))
}

fn render_saccharide(entry: &MibigEntry) -> Option<String> {
    let saccharide = entry.cluster.saccharide.as_ref()?;
    let transferases: Vec<String> = saccharide
        .glycosyltransferases
        .iter()
        .map(|gt| match &gt.specificity {
            Some(specificity) => format!("{} ({specificity})", gt.gene_id),
            None => gt.gene_id.clone(),
        })
        .collect();
    Some(definition_table(&[
        ("Subclass", optional(saccharide.subclass.as_deref())),
        ("Glycosyltransferases", escape(&transferases.join(", "))),
    ]))
}

fn render_raw(value: Option<&serde_json::Value>) -> Option<String> {
    let value = value?;
    let pretty = serde_json::to_string_pretty(value).ok()?;
    Some(format!("<pre>{}</pre>\n", escape(&pretty)))
}

fn render_history(entry: &MibigEntry) -> String {
    let mut out = String::from("<table class=\"mibig-table\">\n<tr><th>Version</th><th>Contributors</th><th>Comments</th></tr>\n");
    for log in entry.sorted_changelog() {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&log.version),
            escape(&log.contributors.join(", ")),
            log.comments.iter().map(|comment| escape(comment)).collect::<Vec<_>>().join("<br>")
        ));
    }
    out.push_str("</table>\n");
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape(title)
    )
}

pub fn render_entry<R: GenomicRecord>(
    ctx: &mut RenderContext,
    annotations: &MibigAnnotations,
    record: &R,
    references: &ReferenceCollection,
) -> String {
    let entry = &annotations.data;
    let mut body = format!("<h2>{}</h2>\n", escape(entry.accession()));
    let general = render_general(ctx, annotations, references);
    section(&mut body, "General", "mibig-general", &general);
    section(&mut body, "Compounds", "mibig-compounds", &render_compounds(entry));
    let genes = render_genes(ctx, &gene_rows(annotations, record));
    section(&mut body, "Genes", "mibig-genes", &genes);
    let class_sections = [
        ("Polyketide", "mibig-polyketide", render_polyketide(entry)),
        ("NRP", "mibig-nrp", render_nrp(entry)),
        ("RiPP", "mibig-ripp", render_raw(entry.cluster.ripp.as_ref())),
        ("Saccharide", "mibig-saccharide", render_saccharide(entry)),
        ("Terpene", "mibig-terpene", render_raw(entry.cluster.terpene.as_ref())),
    ];
    for (title, class_name, content) in class_sections {
        if let Some(content) = content {
            section(&mut body, title, class_name, &content);
        }
    }
    section(&mut body, "History", "mibig-logs", &render_history(entry));
    page(entry.accession(), &body)
}

pub fn render_retired(entry: &MibigEntry) -> String {
    let mut body = format!(
        "<h2>{}</h2>\n<p>This entry has been retired.</p>\n",
        escape(entry.accession())
    );
    if !entry.cluster.retirement_reasons.is_empty() {
        body.push_str("<ul>");
        for reason in &entry.cluster.retirement_reasons {
            body.push_str(&format!("<li>{}</li>", escape(reason)));
        }
        body.push_str("</ul>\n");
    }
    section(&mut body, "History", "mibig-logs", &render_history(entry));
    page(entry.accession(), &body)
}
