use assert_matches::assert_matches;
use mibig_sideload::error::MibigError;
use mibig_sideload::record::{CdsFeature, GenomicRecord, Location, Record, Strand};

fn cds(start: i64, end: i64, name: &str) -> CdsFeature {
    CdsFeature::with_locus_tag(Location::new(start, end, Strand::Forward).unwrap(), name)
}

#[test]
fn snapshot_duplicates_become_alterations() {
    let json = r#"{
        "id": "AB000001.1",
        "seq_len": 5000,
        "cds_features": [
            {"location": {"parts": [{"start": 0, "end": 300}], "strand": "1"}, "locus_tag": "orf1"},
            {"location": {"parts": [{"start": 0, "end": 300}], "strand": "1"}, "locus_tag": "orf1"},
            {"location": {"parts": [{"start": 0, "end": 300}], "strand": "1"}, "locus_tag": "copy"},
            {"location": {"parts": [{"start": 400, "end": 700}], "strand": "-1"}, "locus_tag": "orf1"}
        ]
    }"#;
    let record = Record::from_json(json).unwrap();

    assert_eq!(record.cds_features().len(), 2);
    assert!(record.cds_by_name("orf1_rename1").is_some());
    assert_eq!(record.renames().collect::<Vec<_>>(), vec!["orf1"]);
    assert_eq!(record.alterations().len(), 3);
    assert!(record.alterations()[0].contains("exact duplicate"));
    assert!(record.alterations()[1].contains("removed copy as a duplicate of orf1"));
    assert!(record.alterations()[2].contains("to orf1_rename1"));
}

#[test]
fn alternative_names_resolve_to_real_name() {
    let mut record = Record::new("X", 1000);
    let mut feature = cds(0, 90, "tag1");
    feature.gene = Some("abcA".to_string());
    feature.protein_id = Some("PROT1.1".to_string());
    record.add_cds_feature(feature, true).unwrap();

    assert_eq!(record.get_real_cds_name("abcA").unwrap(), "tag1");
    assert_eq!(record.get_real_cds_name("PROT1.1").unwrap(), "tag1");
    assert_matches!(
        record.get_real_cds_name("nothing"),
        Err(MibigError::UnknownCdsName(_))
    );
}

#[test]
fn shared_gene_name_is_ambiguous() {
    let mut record = Record::new("X", 1000);
    let mut first = cds(0, 90, "tag1");
    first.gene = Some("abcA".to_string());
    let mut second = cds(100, 190, "tag2");
    second.gene = Some("abcA".to_string());
    record.add_cds_feature(first, true).unwrap();
    record.add_cds_feature(second, true).unwrap();
    assert_matches!(
        record.get_real_cds_name("abcA"),
        Err(MibigError::AmbiguousCdsName(_))
    );
}

#[test]
fn features_within_area() {
    let mut record = Record::new("X", 1000);
    record.add_cds_feature(cds(0, 90, "in"), true).unwrap();
    record.add_cds_feature(cds(450, 600, "out"), true).unwrap();
    let area = Location::new(0, 500, Strand::Unknown).unwrap();
    let names: Vec<&str> = record
        .cds_features_within(&area)
        .into_iter()
        .filter_map(CdsFeature::name)
        .collect();
    assert_eq!(names, vec!["in"]);
}

#[test]
fn snapshot_survives_serialization() {
    let mut record = Record::new("X", 1000);
    record.add_cds_feature(cds(0, 90, "a"), true).unwrap();
    record.add_alteration("a was added");
    let restored = Record::from_value(record.to_value().unwrap()).unwrap();
    assert_eq!(restored.id(), "X");
    assert_eq!(restored.seq_len(), 1000);
    assert_eq!(restored.cds_features(), record.cds_features());
    assert_eq!(restored.alterations(), record.alterations());
}

#[test]
fn invalid_locations_are_rejected() {
    assert_matches!(
        Location::new(10, 5, Strand::Forward),
        Err(MibigError::InvalidLocation(_))
    );
    assert_matches!(
        Location::compound(Vec::new(), Strand::Forward),
        Err(MibigError::InvalidLocation(_))
    );
}
