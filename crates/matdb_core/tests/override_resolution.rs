use matdb_core::db::open_db_in_memory;
use matdb_core::{
    resolve, AttributeNode, DiscoveryTree, Entry, OverrideKind, OverrideService, OverrideSet,
    ParamNode, ParamValue, RecordId, RecordService, SkipReason, SqliteOverrideRepository,
    SqliteRecordRepository, ValueReplacement, ValueSource, USER_OVERRIDE_REF,
};
use rusqlite::Connection;

const COPPER: &str = r#"<Material>
  <Metadata><Id>CU-OFHC</Id><Name>Copper OFHC</Name></Metadata>
  <Category>
    <Property>
      <Phase>solid</Phase>
      <Thermal>
        <Density unit="kg/m^3">
          <Entry ref="107">8940</Entry>
          <Entry ref="109">8930</Entry>
        </Density>
      </Thermal>
    </Property>
    <Model>
      <EOSModel>
        <Row index="1"><Rho0 unit="g/cc">8.93</Rho0></Row>
        <Row index="2">
          <reacted><A unit="GPa" ref="r7">854</A></reacted>
          <unreacted><A unit="GPa">12</A></unreacted>
        </Row>
      </EOSModel>
      <Yield>
        <Sigma unit="MPa"><Entry ref="a">200</Entry><Entry ref="b">210</Entry></Sigma>
      </Yield>
    </Model>
  </Category>
</Material>"#;

const DENSITY: &str = "properties.Thermal.Density";

fn ingest(conn: &Connection) -> (RecordId, DiscoveryTree) {
    let records = RecordService::new(SqliteRecordRepository::try_new(conn).unwrap());
    let record_id = records.ingest_xml(COPPER).unwrap();
    let canonical = records.load_record(record_id).unwrap();
    (record_id, canonical)
}

fn density_entries(tree: &DiscoveryTree) -> Vec<Entry> {
    match &tree.properties["Thermal"]["Density"] {
        AttributeNode::Entries { entries, .. } => entries.clone(),
        AttributeNode::Scalar { .. } => panic!("density should carry entries"),
    }
}

fn member<'t>(tree: &'t DiscoveryTree, group: &str, key: &str) -> &'t ParamNode {
    match &tree.models[group] {
        ParamNode::Map(members) => &members[key],
        other => panic!("{group} should be a map, got {}", other.kind_name()),
    }
}

fn reacted_a(tree: &DiscoveryTree) -> ParamNode {
    let ParamNode::Rows(rows) = &tree.models["EOSModel"] else {
        panic!("eos model should be a table");
    };
    match &rows[1].params["reacted"] {
        ParamNode::Map(slot) => slot["A"].clone(),
        other => panic!("reacted should be a map, got {}", other.kind_name()),
    }
}

#[test]
fn scenario_a_preference_then_replacement() {
    let conn = open_db_in_memory().unwrap();
    let (record_id, canonical) = ingest(&conn);
    let overrides = OverrideService::new(SqliteOverrideRepository::try_new(&conn).unwrap());

    overrides
        .set_reference_preference(record_id, DENSITY, "109")
        .unwrap();
    let resolved = overrides.resolve(record_id, &canonical).unwrap();
    let entries = density_entries(&resolved);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].value.as_deref(), Some("8930"));
    assert_eq!(entries[0].reference.as_deref(), Some("109"));

    overrides
        .set_value_override(record_id, DENSITY, "9000", Some("kg/m^3"))
        .unwrap();
    let resolved = overrides.resolve(record_id, &canonical).unwrap();
    let entries = density_entries(&resolved);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].value.as_deref(), Some("9000"));
    assert_eq!(entries[0].reference.as_deref(), Some(USER_OVERRIDE_REF));
    assert_eq!(
        resolved.properties["Thermal"]["Density"].unit(),
        Some("kg/m^3")
    );

    // The preference stays stored while the replacement wins.
    let kinds: Vec<OverrideKind> = overrides
        .list_overrides(record_id)
        .unwrap()
        .into_iter()
        .map(|stored| stored.kind)
        .collect();
    assert!(kinds.contains(&OverrideKind::ReferencePreference));
    assert!(kinds.contains(&OverrideKind::ValueReplacement));

    // Canonical storage is untouched.
    let records = RecordService::new(SqliteRecordRepository::try_new(&conn).unwrap());
    assert_eq!(records.load_record(record_id).unwrap(), canonical);
    assert_eq!(density_entries(&canonical).len(), 2);
}

#[test]
fn resolution_is_pure_and_deterministic() {
    let conn = open_db_in_memory().unwrap();
    let (record_id, canonical) = ingest(&conn);
    let before = serde_json::to_string(&canonical).unwrap();
    let set = OverrideSet::default()
        .prefer(DENSITY, "107")
        .prefer("models.Yield.Sigma", "b")
        .replace(
            "models.EOSModel.2.reacted.A",
            ValueReplacement::new("900"),
        );

    let first = serde_json::to_string(&resolve(record_id, &canonical, &set)).unwrap();
    let second = serde_json::to_string(&resolve(record_id, &canonical, &set)).unwrap();

    assert_eq!(first, second);
    assert_eq!(serde_json::to_string(&canonical).unwrap(), before);
    assert_ne!(first, before);
}

#[test]
fn precedence_law_holds_for_parameters_in_rows() {
    let conn = open_db_in_memory().unwrap();
    let (record_id, canonical) = ingest(&conn);
    let set = OverrideSet::default()
        .prefer("models.EOSModel.2.reacted.A", "r7")
        .replace(
            "models.EOSModel.2.reacted.A",
            ValueReplacement::new("900"),
        );

    let resolved = resolve(record_id, &canonical, &set);

    // Unit falls back to the original when the replacement has none.
    assert_eq!(
        reacted_a(&resolved),
        ParamNode::Scalar(
            ParamValue::text("900")
                .with_unit("GPa")
                .with_reference(USER_OVERRIDE_REF)
                .with_ordinal(1)
        )
    );
}

#[test]
fn list_preference_keeps_the_matching_value() {
    let conn = open_db_in_memory().unwrap();
    let (record_id, canonical) = ingest(&conn);
    let set = OverrideSet::default().prefer("models.Yield.Sigma", "b");

    let resolved = resolve(record_id, &canonical, &set);

    let ParamNode::List(values) = member(&resolved, "Yield", "Sigma") else {
        panic!("sigma should stay a list");
    };
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value.as_deref(), Some("210"));
}

#[test]
fn unresolvable_overrides_are_skipped_without_side_effects() {
    let conn = open_db_in_memory().unwrap();
    let (record_id, canonical) = ingest(&conn);
    let set = OverrideSet::default()
        .prefer("properties.Optical.Index", "1")
        .prefer(DENSITY, "999")
        .replace("models.EOSModel.2", ValueReplacement::new("1"))
        .replace("models.EOSModel.7.Rho0", ValueReplacement::new("1"))
        .replace("nonsense", ValueReplacement::new("1"));

    let overrides = OverrideService::new(SqliteOverrideRepository::try_new(&conn).unwrap());
    let resolution = matdb_core::resolve_detailed(record_id, &canonical, &set);

    assert_eq!(resolution.tree, canonical);
    assert!(resolution.applied.is_empty());
    let reason_of = |path: &str| {
        resolution
            .skipped
            .iter()
            .find(|skipped| skipped.path == path)
            .map(|skipped| skipped.reason.clone())
            .unwrap()
    };
    assert_eq!(reason_of("properties.Optical.Index"), SkipReason::AbsentPath);
    assert_eq!(reason_of(DENSITY), SkipReason::NoMatchingReference);
    assert_eq!(reason_of("models.EOSModel.2"), SkipReason::NotALeaf);
    assert_eq!(reason_of("models.EOSModel.7.Rho0"), SkipReason::AbsentPath);
    assert!(matches!(reason_of("nonsense"), SkipReason::MalformedPath(_)));

    // Nothing stored: the service resolves to the canonical tree.
    assert_eq!(overrides.resolve(record_id, &canonical).unwrap(), canonical);
}

#[test]
fn scalar_attribute_replacement_becomes_a_single_entry() {
    let conn = open_db_in_memory().unwrap();
    let (record_id, canonical) = ingest(&conn);
    let set = OverrideSet::default().replace("properties.Phase.Phase", ValueReplacement::new("liquid"));

    let resolved = resolve(record_id, &canonical, &set);

    assert_eq!(
        resolved.properties["Phase"]["Phase"],
        AttributeNode::Entries {
            unit: None,
            entries: vec![Entry::new(1, "liquid").with_reference(USER_OVERRIDE_REF)],
        }
    );
}

#[test]
fn effective_value_follows_override_priority() {
    let conn = open_db_in_memory().unwrap();
    let (record_id, canonical) = ingest(&conn);
    let overrides = OverrideService::new(SqliteOverrideRepository::try_new(&conn).unwrap());

    let first = overrides
        .effective_value(record_id, &canonical, DENSITY)
        .unwrap()
        .unwrap();
    assert_eq!(first.source, ValueSource::FirstEntry);
    assert_eq!(first.value.as_deref(), Some("8940"));

    overrides
        .set_reference_preference(record_id, DENSITY, "109")
        .unwrap();
    let preferred = overrides
        .effective_value(record_id, &canonical, DENSITY)
        .unwrap()
        .unwrap();
    assert_eq!(preferred.source, ValueSource::PreferredReference);
    assert_eq!(preferred.value.as_deref(), Some("8930"));

    overrides
        .set_value_override(record_id, DENSITY, "9000", None)
        .unwrap();
    let replaced = overrides
        .effective_value(record_id, &canonical, DENSITY)
        .unwrap()
        .unwrap();
    assert_eq!(replaced.source, ValueSource::UserOverride);
    assert_eq!(replaced.value.as_deref(), Some("9000"));
    assert_eq!(replaced.unit.as_deref(), Some("kg/m^3"));
    assert_eq!(replaced.reference.as_deref(), Some(USER_OVERRIDE_REF));

    assert_eq!(
        overrides
            .effective_value(record_id, &canonical, "models.EOSModel.2")
            .unwrap(),
        None
    );
}

#[test]
fn detailed_resolution_reports_applied_overrides_in_kind_order() {
    let conn = open_db_in_memory().unwrap();
    let (record_id, canonical) = ingest(&conn);
    let overrides = OverrideService::new(SqliteOverrideRepository::try_new(&conn).unwrap());
    overrides
        .set_value_override(record_id, DENSITY, "9000", None)
        .unwrap();
    overrides
        .set_reference_preference(record_id, "models.Yield.Sigma", "a")
        .unwrap();

    let resolution = overrides.resolve_detailed(record_id, &canonical).unwrap();

    let applied: Vec<(&str, OverrideKind)> = resolution
        .applied
        .iter()
        .map(|applied| (applied.path.as_str(), applied.kind))
        .collect();
    assert_eq!(
        applied,
        vec![
            ("models.Yield.Sigma", OverrideKind::ReferencePreference),
            (DENSITY, OverrideKind::ValueReplacement),
        ]
    );
    assert!(resolution.skipped.is_empty());
}
