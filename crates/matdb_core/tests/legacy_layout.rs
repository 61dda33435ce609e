//! Rows in the layout that predates the nested one: written by the crate for
//! allowlisted shapes, or inserted here with raw SQL.

use matdb_core::db::open_db_in_memory;
use matdb_core::{
    parse_xml_str, AttributeNode, DiscoveryTree, Entry, ParamNode, ParamValue, RecordId,
    RecordRepoError, RecordRepository, SqliteRecordRepository,
};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

fn setup() -> (Connection, RecordId) {
    let conn = open_db_in_memory().unwrap();
    let mut tree = DiscoveryTree::default();
    tree.metadata
        .insert("id".to_string(), Some("LEG-1".to_string()));
    tree.metadata
        .insert("name".to_string(), Some("Legacy".to_string()));
    let record_id = SqliteRecordRepository::try_new(&conn)
        .unwrap()
        .create_record(&tree)
        .unwrap();
    (conn, record_id)
}

fn legacy_group(conn: &Connection, record_id: RecordId, name: &str) -> i64 {
    conn.execute(
        "INSERT INTO model_groups (record_uuid, name, storage_layout) VALUES (?1, ?2, 'legacy');",
        params![record_id.to_string(), name],
    )
    .unwrap();
    conn.last_insert_rowid()
}

fn subgroup(
    conn: &Connection,
    group_id: i64,
    parent: Option<i64>,
    name: &str,
    slot: Option<&str>,
    row_index: Option<u32>,
) -> i64 {
    conn.execute(
        "INSERT INTO subgroups (group_id, parent_subgroup_id, name, slot_name, row_index)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![group_id, parent, name, slot, row_index],
    )
    .unwrap();
    conn.last_insert_rowid()
}

fn param(conn: &Connection, subgroup_id: i64, name: &str, value: &str, ordinal: Option<u32>) {
    conn.execute(
        "INSERT INTO parameters (subgroup_id, name, value, ordinal) VALUES (?1, ?2, ?3, ?4);",
        params![subgroup_id, name, value, ordinal],
    )
    .unwrap();
}

fn scalar(value: &str) -> ParamNode {
    ParamNode::Scalar(ParamValue::text(value))
}

fn stored_layout(conn: &Connection, table: &str, name: &str) -> String {
    conn.query_row(
        &format!("SELECT storage_layout FROM {table} WHERE name = ?1;"),
        [name],
        |row| row.get(0),
    )
    .unwrap()
}

fn root_subgroups(conn: &Connection, group: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT s.name
             FROM subgroups s
             JOIN model_groups g ON g.group_id = s.group_id
             WHERE g.name = ?1 AND s.parent_subgroup_id IS NULL
             ORDER BY s.name ASC;",
        )
        .unwrap();
    stmt.query_map([group], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn material(property: &str, model: &str) -> DiscoveryTree {
    parse_xml_str(&format!(
        "<Material>
          <Metadata><Id>W-1</Id><Name>Written</Name></Metadata>
          <Category><Property>{property}</Property><Model>{model}</Model></Category>
        </Material>"
    ))
    .unwrap()
}

fn load(conn: &Connection, record_id: RecordId) -> DiscoveryTree {
    SqliteRecordRepository::try_new(conn)
        .unwrap()
        .load_tree(record_id)
        .unwrap()
}

#[test]
fn elastic_model_keeps_a_single_parameter_set_keyed() {
    let (conn, record_id) = setup();
    let group_id = legacy_group(&conn, record_id, "ElasticModel");
    let isotropic = subgroup(&conn, group_id, None, "Isotropic", None, None);
    param(&conn, isotropic, "E", "117", None);
    param(&conn, isotropic, "nu", "0.34", None);

    let tree = load(&conn, record_id);
    assert_eq!(
        tree.models["ElasticModel"],
        ParamNode::Map(BTreeMap::from([(
            "Isotropic".to_string(),
            ParamNode::Map(BTreeMap::from([
                ("E".to_string(), scalar("117")),
                ("nu".to_string(), scalar("0.34")),
            ])),
        )]))
    );
}

#[test]
fn elasto_plastic_self_named_subgroups_become_leaves() {
    let (conn, record_id) = setup();
    let group_id = legacy_group(&conn, record_id, "ElastoPlastic");
    let yield_stress = subgroup(&conn, group_id, None, "YieldStress", None, None);
    param(&conn, yield_stress, "YieldStress", "210", Some(2));
    param(&conn, yield_stress, "YieldStress", "200", Some(1));
    let hardening = subgroup(&conn, group_id, None, "Hardening", None, None);
    param(&conn, hardening, "B", "292", None);

    let tree = load(&conn, record_id);
    let ParamNode::Map(model) = &tree.models["ElastoPlastic"] else {
        panic!("elasto-plastic should be a map");
    };
    assert_eq!(
        model["YieldStress"],
        ParamNode::List(vec![
            ParamValue::text("200").with_ordinal(1),
            ParamValue::text("210").with_ordinal(2),
        ])
    );
    assert_eq!(
        model["Hardening"],
        ParamNode::Map(BTreeMap::from([("B".to_string(), scalar("292"))]))
    );
}

#[test]
fn reaction_model_flattens_the_self_named_subgroup() {
    let (conn, record_id) = setup();
    let group_id = legacy_group(&conn, record_id, "ReactionModel");
    let own = subgroup(&conn, group_id, None, "ReactionModel", None, None);
    param(&conn, own, "Kind", "Arrhenius", None);
    param(&conn, own, "Rate", "1.0", Some(1));
    param(&conn, own, "Rate", "2.0", Some(2));
    let coefficients = subgroup(&conn, group_id, None, "Coefficients", None, None);
    param(&conn, coefficients, "Ea", "80", None);

    let tree = load(&conn, record_id);
    let ParamNode::Map(model) = &tree.models["ReactionModel"] else {
        panic!("reaction model should be a map");
    };
    assert_eq!(model["Kind"], scalar("Arrhenius"));
    assert!(matches!(&model["Rate"], ParamNode::List(values) if values.len() == 2));
    assert_eq!(
        model["Coefficients"],
        ParamNode::Map(BTreeMap::from([("Ea".to_string(), scalar("80"))]))
    );
}

#[test]
fn eos_model_reads_rows_with_slots_and_skips_stray_roots() {
    let (conn, record_id) = setup();
    let group_id = legacy_group(&conn, record_id, "EOSModel");
    for index in [3, 1] {
        let row = subgroup(&conn, group_id, None, "Row", None, Some(index));
        param(&conn, row, "Rho0", &format!("8.9{index}"), None);
    }
    let row_two = subgroup(&conn, group_id, None, "Row", None, Some(2));
    for (slot, value) in [("reacted", "854"), ("unreacted", "12")] {
        let slot_id = subgroup(&conn, group_id, Some(row_two), slot, Some(slot), Some(2));
        param(&conn, slot_id, "A", value, None);
    }
    subgroup(&conn, group_id, None, "Notes", None, None);

    let tree = load(&conn, record_id);
    let ParamNode::Rows(rows) = &tree.models["EOSModel"] else {
        panic!("eos model should be a table");
    };
    assert_eq!(
        rows.iter().map(|row| row.index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        rows[1].params["reacted"],
        ParamNode::Map(BTreeMap::from([("A".to_string(), scalar("854"))]))
    );
    assert_eq!(
        rows[1].params["unreacted"],
        ParamNode::Map(BTreeMap::from([("A".to_string(), scalar("12"))]))
    );
}

#[test]
fn legacy_phase_category_keeps_its_first_value() {
    let (conn, record_id) = setup();
    conn.execute(
        "INSERT INTO categories (record_uuid, name) VALUES (?1, 'Phase');",
        [record_id.to_string()],
    )
    .unwrap();
    let category_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO attributes (category_id, name) VALUES (?1, 'State');",
        [category_id],
    )
    .unwrap();
    let attribute_id = conn.last_insert_rowid();
    for (ordinal, value) in [(1, "solid"), (2, "liquid")] {
        conn.execute(
            "INSERT INTO attribute_entries (attribute_id, value, ref_id, ordinal)
             VALUES (?1, ?2, 'r', ?3);",
            params![attribute_id, value, ordinal],
        )
        .unwrap();
    }

    let tree = load(&conn, record_id);
    assert_eq!(
        tree.properties["Phase"]["State"],
        AttributeNode::Scalar {
            value: Some("solid".to_string()),
            unit: None
        }
    );
}

#[test]
fn legacy_names_outside_the_allowlist_use_the_generic_reader() {
    let (conn, record_id) = setup();
    let group_id = legacy_group(&conn, record_id, "Viscosity");
    let only = subgroup(&conn, group_id, None, "Viscosity", None, None);
    param(&conn, only, "mu", "0.1", None);

    let tree = load(&conn, record_id);
    assert_eq!(
        tree.models["Viscosity"],
        ParamNode::Map(BTreeMap::from([("mu".to_string(), scalar("0.1"))]))
    );
}

#[test]
fn parent_links_must_point_at_earlier_subgroups() {
    let (conn, record_id) = setup();
    let group_id = legacy_group(&conn, record_id, "Broken");
    let first = subgroup(&conn, group_id, None, "A", None, None);
    let second = subgroup(&conn, group_id, None, "B", None, None);
    conn.execute(
        "UPDATE subgroups SET parent_subgroup_id = ?1 WHERE subgroup_id = ?2;",
        params![second, first],
    )
    .unwrap();

    let err = SqliteRecordRepository::try_new(&conn)
        .unwrap()
        .load_tree(record_id)
        .unwrap_err();
    assert!(matches!(err, RecordRepoError::InvalidData(_)));
}

#[test]
fn allowlisted_shapes_are_written_in_their_legacy_layout() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteRecordRepository::try_new(&conn).unwrap();
    let tree = material(
        "<Phase>solid</Phase>",
        r#"<ElasticModel>
             <Isotropic><E unit="GPa">117</E></Isotropic>
             <Reference><T>293</T></Reference>
           </ElasticModel>
           <ElastoPlastic>
             <YieldStress><Entry>200</Entry><Entry>210</Entry></YieldStress>
             <Hardening><B>292</B></Hardening>
           </ElastoPlastic>
           <ReactionModel>
             <Kind>Arrhenius</Kind>
             <Coefficients><Ea>80</Ea></Coefficients>
           </ReactionModel>
           <EOSModel>
             <Row index="1"><Rho0>8.93</Rho0></Row>
             <Row index="2"><reacted><A>854</A></reacted></Row>
           </EOSModel>
           <Custom><A>1</A></Custom>"#,
    );
    let record_id = repo.create_record(&tree).unwrap();

    for group in ["ElasticModel", "ElastoPlastic", "ReactionModel", "EOSModel"] {
        assert_eq!(stored_layout(&conn, "model_groups", group), "legacy", "{group}");
    }
    assert_eq!(stored_layout(&conn, "model_groups", "Custom"), "nested");
    assert_eq!(stored_layout(&conn, "categories", "Phase"), "legacy");

    assert_eq!(root_subgroups(&conn, "ElasticModel"), vec!["Isotropic", "Reference"]);
    assert_eq!(root_subgroups(&conn, "ElastoPlastic"), vec!["Hardening", "YieldStress"]);
    assert_eq!(
        root_subgroups(&conn, "ReactionModel"),
        vec!["Coefficients", "ReactionModel"]
    );
    assert_eq!(root_subgroups(&conn, "EOSModel"), vec!["Row", "Row"]);
    assert_eq!(root_subgroups(&conn, "Custom"), vec!["Custom"]);

    assert_eq!(repo.load_tree(record_id).unwrap(), tree);
}

#[test]
fn shapes_a_legacy_layout_cannot_hold_are_written_nested() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteRecordRepository::try_new(&conn).unwrap();
    let tree = material(
        r#"<Phase><State><Entry ref="r">solid</Entry><Entry>liquid</Entry></State></Phase>"#,
        "<ElasticModel><Nu>0.3</Nu><Isotropic><E>117</E></Isotropic></ElasticModel>
         <ElastoPlastic><B><B>292</B></B></ElastoPlastic>",
    );
    let record_id = repo.create_record(&tree).unwrap();

    assert_eq!(stored_layout(&conn, "model_groups", "ElasticModel"), "nested");
    assert_eq!(stored_layout(&conn, "model_groups", "ElastoPlastic"), "nested");
    assert_eq!(stored_layout(&conn, "categories", "Phase"), "nested");
    assert_eq!(repo.load_tree(record_id).unwrap(), tree);
}

#[test]
fn additions_a_legacy_group_cannot_hold_move_it_to_nested() {
    let (conn, record_id) = setup();
    let elastic = legacy_group(&conn, record_id, "ElasticModel");
    let isotropic = subgroup(&conn, elastic, None, "Isotropic", None, None);
    param(&conn, isotropic, "E", "117", None);
    let plastic = legacy_group(&conn, record_id, "ElastoPlastic");
    let yield_stress = subgroup(&conn, plastic, None, "YieldStress", None, None);
    param(&conn, yield_stress, "YieldStress", "200", Some(1));
    param(&conn, yield_stress, "YieldStress", "210", Some(2));

    let repo = SqliteRecordRepository::try_new(&conn).unwrap();
    repo.add_parameter(record_id, "ElasticModel", "Nu", &scalar("0.34"))
        .unwrap();
    let hardening = ParamNode::Map(BTreeMap::from([("B".to_string(), scalar("292"))]));
    repo.add_parameter(record_id, "ElastoPlastic", "Hardening", &hardening)
        .unwrap();

    // A top-level leaf has no place among keyed sets.
    assert_eq!(stored_layout(&conn, "model_groups", "ElasticModel"), "nested");
    assert_eq!(stored_layout(&conn, "model_groups", "ElastoPlastic"), "legacy");

    let tree = load(&conn, record_id);
    assert_eq!(
        tree.models["ElasticModel"],
        ParamNode::Map(BTreeMap::from([
            (
                "Isotropic".to_string(),
                ParamNode::Map(BTreeMap::from([("E".to_string(), scalar("117"))])),
            ),
            ("Nu".to_string(), scalar("0.34")),
        ]))
    );
    assert_eq!(
        tree.models["ElastoPlastic"],
        ParamNode::Map(BTreeMap::from([
            ("Hardening".to_string(), hardening),
            (
                "YieldStress".to_string(),
                ParamNode::List(vec![
                    ParamValue::text("200").with_ordinal(1),
                    ParamValue::text("210").with_ordinal(2),
                ]),
            ),
        ]))
    );
}

#[test]
fn entry_attributes_move_a_legacy_phase_to_nested() {
    let (conn, record_id) = setup();
    conn.execute(
        "INSERT INTO categories (record_uuid, name) VALUES (?1, 'Phase');",
        [record_id.to_string()],
    )
    .unwrap();
    let category_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO attributes (category_id, name) VALUES (?1, 'State');",
        [category_id],
    )
    .unwrap();
    let attribute_id = conn.last_insert_rowid();
    for (ordinal, value) in [(1, "solid"), (2, "liquid")] {
        conn.execute(
            "INSERT INTO attribute_entries (attribute_id, value, ordinal) VALUES (?1, ?2, ?3);",
            params![attribute_id, value, ordinal],
        )
        .unwrap();
    }

    let repo = SqliteRecordRepository::try_new(&conn).unwrap();
    let color = AttributeNode::Scalar {
        value: Some("red".to_string()),
        unit: None,
    };
    repo.add_attribute(record_id, "Phase", "Color", &color)
        .unwrap();
    assert_eq!(stored_layout(&conn, "categories", "Phase"), "legacy");

    let history = AttributeNode::Entries {
        unit: Some("K".to_string()),
        entries: vec![Entry::new(1, "300"), Entry::new(2, "1357")],
    };
    repo.add_attribute(record_id, "Phase", "History", &history)
        .unwrap();
    assert_eq!(stored_layout(&conn, "categories", "Phase"), "nested");

    let phase = &load(&conn, record_id).properties["Phase"];
    assert_eq!(
        phase["State"],
        AttributeNode::Scalar {
            value: Some("solid".to_string()),
            unit: None
        }
    );
    assert_eq!(phase["Color"], color);
    assert_eq!(phase["History"], history);
}
