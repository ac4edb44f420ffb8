use super::SqlNode;
use crate::config::Configuration;
use crate::param_value::Value;
use crate::sql_source::{BoundSql, DynamicSqlSource};
use collapse::*;
use indexmap::IndexMap;

fn object(entries: &[(&str, Value)]) -> Value {
    let mut map = IndexMap::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    Value::Object(map)
}

fn render(node: SqlNode, parameter: &Value) -> BoundSql {
    let config = Configuration::new();
    DynamicSqlSource::new(node)
        .bound_sql(&config, parameter)
        .expect("rendering failed")
}

fn mapping_properties(bound: &BoundSql) -> Vec<&str> {
    bound
        .parameter_mappings
        .iter()
        .map(|m| m.property.as_str())
        .collect()
}

#[test]
fn test_text_applies_verbatim() {
    let bound = render(SqlNode::text("SELECT 1"), &Value::Null);
    assert_eq!(bound.sql, "SELECT 1");
    assert!(bound.parameter_mappings.is_empty());
}

#[test]
fn test_if_true_and_false() {
    let node = SqlNode::mixed([
        SqlNode::text("SELECT * FROM users"),
        SqlNode::if_("name != null", SqlNode::text(" WHERE name = #{name}")).unwrap(),
    ]);
    let with_name = render(node.clone(), &object(&[("name", Value::Str("John".into()))]));
    collapsed_eq!(&with_name.sql, "SELECT * FROM users WHERE name = ?");

    let without = render(node, &object(&[]));
    collapsed_eq!(&without.sql, "SELECT * FROM users");
    assert!(without.parameter_mappings.is_empty());
}

#[test]
fn test_choose_takes_first_true_branch() {
    let node = SqlNode::choose(
        [
            ("kind == 'id'", SqlNode::text("ORDER BY id")),
            ("kind == 'name'", SqlNode::text("ORDER BY name")),
        ],
        Some(SqlNode::text("ORDER BY created_at")),
    )
    .unwrap();

    let by_name = render(node.clone(), &object(&[("kind", Value::Str("name".into()))]));
    assert_eq!(by_name.sql, "ORDER BY name");

    let fallback = render(node, &object(&[]));
    assert_eq!(fallback.sql, "ORDER BY created_at");
}

#[test]
fn test_where_trims_leading_and() {
    let node = SqlNode::mixed([
        SqlNode::text("SELECT id FROM users"),
        SqlNode::where_(SqlNode::mixed([
            SqlNode::if_("name != null", SqlNode::text("AND name = #{name} ")).unwrap(),
            SqlNode::if_("active != null", SqlNode::text("AND active = #{active}")).unwrap(),
        ])),
    ]);
    let bound = render(
        node,
        &object(&[
            ("name", Value::Str("John".into())),
            ("active", Value::Bool(true)),
        ]),
    );
    collapsed_eq!(&bound.sql, "SELECT id FROM users WHERE name = ? AND active = ?");
}

#[test]
fn test_where_abstains_when_inner_is_empty() {
    let node = SqlNode::mixed([
        SqlNode::text("SELECT id FROM users"),
        SqlNode::where_(
            SqlNode::if_("name != null", SqlNode::text("AND name = #{name}")).unwrap(),
        ),
    ]);
    let bound = render(node, &object(&[]));
    assert_eq!(bound.sql, "SELECT id FROM users");
}

#[test]
fn test_set_strips_trailing_comma() {
    let node = SqlNode::mixed([
        SqlNode::text("UPDATE users"),
        SqlNode::set(SqlNode::mixed([
            SqlNode::if_("name != null", SqlNode::text("name = #{name},")).unwrap(),
            SqlNode::if_("email != null", SqlNode::text(" email = #{email},")).unwrap(),
        ])),
        SqlNode::text(" WHERE id = #{id}"),
    ]);
    let bound = render(
        node,
        &object(&[("name", Value::Str("a".into())), ("id", Value::Int(1))]),
    );
    collapsed_eq!(&bound.sql, "UPDATE users SET name = ? WHERE id = ?");
    assert_eq!(mapping_properties(&bound), vec!["name", "id"]);
}

#[test]
fn test_trim_strips_only_first_prefix_override() {
    let node = SqlNode::trim(
        SqlNode::text("AND AND x"),
        Some("WHERE "),
        Some("AND |OR "),
        None,
        None,
    );
    let bound = render(node, &Value::Null);
    assert_eq!(bound.sql, "WHERE AND x");
}

#[test]
fn test_trim_suffix_override_and_case_insensitivity() {
    let node = SqlNode::trim(
        SqlNode::text("and id=1"),
        Some("WHERE "),
        Some("AND |OR "),
        None,
        None,
    );
    let bound = render(node, &Value::Null);
    assert_eq!(bound.sql, "WHERE id=1");
}

#[test]
fn test_foreach_with_where_scenario() {
    let node = SqlNode::mixed([
        SqlNode::text("SELECT id FROM users "),
        SqlNode::where_(SqlNode::mixed([
            SqlNode::if_("name != null", SqlNode::text("AND name = #{name} ")).unwrap(),
            SqlNode::if_(
                "ids != null",
                SqlNode::mixed([
                    SqlNode::text(" AND id IN "),
                    SqlNode::foreach("ids", "id", None, "(", ")", ",", SqlNode::text("#{id}"))
                        .unwrap(),
                ]),
            )
            .unwrap(),
        ])),
    ]);
    let bound = render(
        node,
        &object(&[
            ("name", Value::Str("John".into())),
            (
                "ids",
                Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            ),
        ]),
    );
    collapsed_eq!(
        &bound.sql,
        "SELECT id FROM users WHERE name = ? AND id IN (?,?,?)"
    );
    assert_eq!(
        mapping_properties(&bound),
        vec!["name", "__frch_id_0", "__frch_id_1", "__frch_id_2"]
    );
    assert_eq!(
        bound.additional_parameters.get("__frch_id_0"),
        Some(&Value::Int(1))
    );
    assert_eq!(
        bound.additional_parameters.get("__frch_id_1"),
        Some(&Value::Int(2))
    );
    assert_eq!(
        bound.additional_parameters.get("__frch_id_2"),
        Some(&Value::Int(3))
    );
}

#[test]
fn test_foreach_empty_contributes_nothing() {
    let node = SqlNode::mixed([
        SqlNode::text("SELECT id FROM users "),
        SqlNode::where_(SqlNode::mixed([
            SqlNode::text("AND id IN "),
            SqlNode::foreach("ids", "id", None, "(", ")", ",", SqlNode::text("#{id}")).unwrap(),
        ])),
    ]);
    let bound = render(node, &object(&[("ids", Value::Array(vec![]))]));
    // The foreach abstained; only the literal inner text remains.
    collapsed_eq!(&bound.sql, "SELECT id FROM users WHERE id IN");
    assert!(bound.parameter_mappings.is_empty());
}

#[test]
fn test_foreach_over_associative_binds_keys() {
    let node = SqlNode::foreach(
        "filters",
        "value",
        Some("column"),
        "",
        "",
        " AND ",
        SqlNode::text("${column} = #{value}"),
    )
    .unwrap();
    let bound = render(
        node,
        &object(&[(
            "filters",
            object(&[
                ("name", Value::Str("John".into())),
                ("city", Value::Str("Oslo".into())),
            ]),
        )]),
    );
    collapsed_eq!(&bound.sql, "name = ? AND city = ?");
    assert_eq!(
        mapping_properties(&bound),
        vec!["__frch_value_0", "__frch_value_1"]
    );
}

#[test]
fn test_foreach_rewrites_dotted_and_attributed_markers() {
    let node = SqlNode::foreach(
        "users",
        "u",
        None,
        "",
        "",
        ", ",
        SqlNode::text("(#{u.id, valueType=int}, #{u.name})"),
    )
    .unwrap();
    let user = object(&[("id", Value::Int(5)), ("name", Value::Str("Ada".into()))]);
    let bound = render(node, &object(&[("users", Value::Array(vec![user]))]));
    collapsed_eq!(&bound.sql, "(?, ?)");
    assert_eq!(
        mapping_properties(&bound),
        vec!["__frch_u_0.id", "__frch_u_0.name"]
    );
    assert_eq!(
        bound.parameter_mappings[0].value_type.as_deref(),
        Some("int")
    );
}

#[test]
fn test_bind_stores_binding() {
    let node = SqlNode::mixed([
        SqlNode::bind("pattern", "'%' + name + '%'").unwrap(),
        SqlNode::text("SELECT * FROM users WHERE name LIKE #{pattern}"),
    ]);
    let bound = render(node, &object(&[("name", Value::Str("John".into()))]));
    collapsed_eq!(&bound.sql, "SELECT * FROM users WHERE name LIKE ?");
    assert_eq!(
        bound.additional_parameters.get("pattern"),
        Some(&Value::Str("%John%".into()))
    );
}

#[test]
fn test_include_splices_fragment() {
    let fragment = SqlNode::text("id, name, email");
    let node = SqlNode::mixed([
        SqlNode::text("SELECT "),
        SqlNode::include(&fragment),
        SqlNode::text(" FROM users"),
    ]);
    let bound = render(node, &Value::Null);
    assert_eq!(bound.sql, "SELECT id, name, email FROM users");
}

#[test]
fn test_evaluation_is_deterministic() {
    let node = SqlNode::foreach("ids", "id", None, "(", ")", ",", SqlNode::text("#{id}")).unwrap();
    let parameter = object(&[(
        "ids",
        Value::Array(vec![Value::Int(1), Value::Int(2)]),
    )]);
    let first = render(node.clone(), &parameter);
    let second = render(node, &parameter);
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.parameter_mappings, second.parameter_mappings);
    assert_eq!(first.additional_parameters, second.additional_parameters);
}

#[test]
fn test_nested_foreach_numbering_is_monotonic() {
    let inner = SqlNode::foreach("row", "cell", None, "(", ")", ",", SqlNode::text("#{cell}"))
        .unwrap();
    let node = SqlNode::foreach("rows", "row", None, "", "", ", ", inner).unwrap();
    let rows = Value::Array(vec![
        Value::Array(vec![Value::Int(1), Value::Int(2)]),
        Value::Array(vec![Value::Int(3)]),
    ]);
    let bound = render(node, &object(&[("rows", rows)]));
    collapsed_eq!(&bound.sql, "(?,?), (?)");
    // Unique numbers never repeat across nesting levels.
    let properties = mapping_properties(&bound);
    let mut seen = std::collections::HashSet::new();
    for property in &properties {
        assert!(seen.insert(*property), "duplicate placeholder {property}");
    }
}
