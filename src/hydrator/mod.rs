//! The hydration engine: rows in, application values out.
//!
//! Three modes exist per statement. Scalar returns the first column,
//! array keeps rows associative, and object constructs typed instances
//! through registered entity adapters. Result maps add explicit
//! column→property bindings, identity-based grouping of denormalized
//! JOIN rows into associations and collections, discriminator-driven
//! polymorphic dispatch, and auto-mapping of unclaimed columns.


use crate::config::{Configuration, HydrationMode, MappedStatement};
use crate::driver::Row;
use crate::error::{Error, Result};
use crate::param_value::Value;
use crate::result_map::{NestedMapping, ResultMap, ResultMapping};
use crate::utils::camel_case;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

pub struct Hydrator<'a> {
    config: &'a Configuration,
}

impl<'a> Hydrator<'a> {
    #[must_use]
    pub fn new(config: &'a Configuration) -> Self {
        Self { config }
    }

    /// Hydrates a fetched row stream according to the statement's mode
    /// and result map.
    pub fn hydrate_all(&self, rows: Vec<Row>, statement: &MappedStatement) -> Result<Vec<Value>> {
        let mode = statement.hydration.unwrap_or_default();
        let result_map = match &statement.result_map {
            Some(id) => Some(self.result_map(id)?),
            None => None,
        };
        match mode {
            HydrationMode::Scalar => rows
                .iter()
                .map(|row| self.hydrate_scalar(row, statement.result_type.as_deref()))
                .collect(),
            HydrationMode::Array => rows
                .iter()
                .map(|row| self.hydrate_array(row, result_map.as_deref()))
                .collect(),
            HydrationMode::Object => match &result_map {
                Some(map) if map.has_nested() => self.hydrate_grouped(&rows, map),
                _ => rows
                    .iter()
                    .map(|row| {
                        self.hydrate_object(row, result_map.as_deref(), statement.result_type.as_deref())
                    })
                    .collect(),
            },
        }
    }

    /// Hydrates one row outside any grouping context; used by cursors.
    pub fn hydrate_row(&self, row: &Row, statement: &MappedStatement) -> Result<Value> {
        let mut values = self.hydrate_all(vec![row.clone()], statement)?;
        values
            .pop()
            .ok_or_else(|| Error::hydration("row produced no value"))
    }

    fn result_map(&self, id: &str) -> Result<Arc<ResultMap>> {
        self.config
            .result_map(id)
            .map_err(|_| Error::hydration(format!("result map `{id}` is not registered")))
    }

    // Scalar mode

    fn hydrate_scalar(&self, row: &Row, target_type: Option<&str>) -> Result<Value> {
        let value = row.first().cloned().unwrap_or(Value::Null);
        let Some(target_type) = target_type else {
            return Ok(value);
        };
        if value.is_null() {
            return Ok(Value::Null);
        }
        let target_type = self.config.resolve_alias(target_type);
        if self.config.type_handlers().contains(&target_type) {
            self.config.type_handlers().resolve(&target_type).from_sql(&value)
        } else {
            Ok(value)
        }
    }

    // Array mode

    fn hydrate_array(&self, row: &Row, result_map: Option<&ResultMap>) -> Result<Value> {
        let Some(map) = result_map else {
            return Ok(Value::Object(self.passthrough_row(row)));
        };
        let map = self.discriminated(map, row)?;
        let mut properties = IndexMap::new();
        self.apply_mappings(row, &map.id_mappings, "", &mut properties)?;
        self.apply_mappings(row, &map.result_mappings, "", &mut properties)?;
        if map.auto_mapping {
            self.auto_map(row, &map, &mut properties);
        }
        Ok(Value::Object(properties))
    }

    /// A row with no result map: raw values, with optional snake→camel
    /// remapping of column names.
    fn passthrough_row(&self, row: &Row) -> IndexMap<String, Value> {
        let camel = self.config.settings().map_underscore_to_camel_case;
        row.iter()
            .map(|(column, value)| {
                let name = if camel {
                    camel_case(column)
                } else {
                    column.to_owned()
                };
                (name, value.clone())
            })
            .collect()
    }

    // Object mode, flat

    fn hydrate_object(
        &self,
        row: &Row,
        result_map: Option<&ResultMap>,
        statement_type: Option<&str>,
    ) -> Result<Value> {
        let Some(map) = result_map else {
            // No result map: fall back to the statement's declared type,
            // or pass rows through associatively.
            let Some(type_name) = statement_type else {
                return Ok(Value::Object(self.passthrough_row(row)));
            };
            return self.construct(Some(type_name), self.passthrough_row(row));
        };
        let map = self.discriminated(map, row)?;
        let mut properties = IndexMap::new();
        self.apply_mappings(row, &map.id_mappings, "", &mut properties)?;
        self.apply_mappings(row, &map.result_mappings, "", &mut properties)?;
        self.apply_associations(row, &map, &mut properties)?;
        if map.auto_mapping {
            self.auto_map(row, &map, &mut properties);
        }
        let type_name = map.type_name.as_deref().or(statement_type);
        self.construct(type_name, properties)
    }

    // Object mode, grouped over a denormalized row stream

    fn hydrate_grouped(&self, rows: &[Row], map: &ResultMap) -> Result<Vec<Value>> {
        // Parents in order of first appearance of their identity tuple.
        let mut parents: IndexMap<String, GroupedParent> = IndexMap::new();

        for row in rows {
            let map = self.discriminated(map, row)?;
            let identity = identity_tuple(row, &map.id_mappings, &map.result_mappings, "");
            if identity.iter().all(Value::is_null) {
                continue;
            }
            let key = tuple_key(&identity);

            if !parents.contains_key(&key) {
                let mut properties = IndexMap::new();
                self.apply_mappings(row, &map.id_mappings, "", &mut properties)?;
                self.apply_mappings(row, &map.result_mappings, "", &mut properties)?;
                if map.auto_mapping {
                    self.auto_map(row, &map, &mut properties);
                }
                for collection in &map.collections {
                    properties.insert(collection.property.clone(), Value::Array(Vec::new()));
                }
                for association in &map.associations {
                    properties.insert(association.property.clone(), Value::Null);
                }
                parents.insert(
                    key.clone(),
                    GroupedParent {
                        type_name: map.type_name.clone(),
                        properties,
                        seen_items: HashSet::new(),
                    },
                );
            }
            let Some(parent) = parents.get_mut(&key) else {
                continue;
            };

            // Cardinality-one associations construct once, on the first
            // row whose identity columns are not all null.
            for association in &map.associations {
                if parent
                    .properties
                    .get(&association.property)
                    .is_some_and(Value::is_null)
                {
                    let nested =
                        self.nested_view(&association.nested, association.target_type.as_deref())?;
                    if let Some(child) = self.construct_nested(row, &nested, &association.nested.column_prefix)? {
                        parent
                            .properties
                            .insert(association.property.clone(), child);
                    }
                }
            }

            // Collection items group by their prefixed identity tuple;
            // duplicates are suppressed.
            for collection in &map.collections {
                let nested =
                    self.nested_view(&collection.nested, collection.item_type.as_deref())?;
                let prefix = &collection.nested.column_prefix;
                let item_identity =
                    identity_tuple(row, &nested.id_mappings, &nested.result_mappings, prefix);
                if item_identity.iter().all(Value::is_null) {
                    continue;
                }
                let item_key = format!("{}\u{1}{}", collection.property, tuple_key(&item_identity));
                if !parent.seen_items.insert(item_key) {
                    continue;
                }
                if let Some(item) = self.construct_nested(row, &nested, prefix)? {
                    if let Some(Value::Array(items)) =
                        parent.properties.get_mut(&collection.property)
                    {
                        items.push(item);
                    }
                }
            }
        }

        parents
            .into_values()
            .map(|parent| self.construct(parent.type_name.as_deref(), parent.properties))
            .collect()
    }

    /// Constructs a nested value from one row. Returns `None` when every
    /// identity column is null, which marks the nested value absent.
    fn construct_nested(
        &self,
        row: &Row,
        map: &ResultMap,
        prefix: &str,
    ) -> Result<Option<Value>> {
        let map = self.discriminated(map, row)?;
        let identity = identity_tuple(row, &map.id_mappings, &map.result_mappings, prefix);
        if identity.iter().all(Value::is_null) {
            return Ok(None);
        }
        let mut properties = IndexMap::new();
        self.apply_mappings(row, &map.id_mappings, prefix, &mut properties)?;
        self.apply_mappings(row, &map.result_mappings, prefix, &mut properties)?;
        // Associations nest recursively; their prefixes compound.
        for association in &map.associations {
            let nested = self.nested_view(&association.nested, association.target_type.as_deref())?;
            let compound = format!("{prefix}{}", association.nested.column_prefix);
            let child = self.construct_nested(row, &nested, &compound)?;
            properties.insert(association.property.clone(), child.unwrap_or(Value::Null));
        }
        // A collection inside a nested map contributes the current row's
        // item; cross-row grouping applies to the statement's own map.
        for collection in &map.collections {
            let nested = self.nested_view(&collection.nested, collection.item_type.as_deref())?;
            let compound = format!("{prefix}{}", collection.nested.column_prefix);
            let item = self.construct_nested(row, &nested, &compound)?;
            properties.insert(
                collection.property.clone(),
                Value::Array(item.into_iter().collect()),
            );
        }
        self.construct(map.type_name.as_deref(), properties).map(Some)
    }

    // Shared pieces

    /// Applies explicit mappings, converting through declared handlers.
    fn apply_mappings(
        &self,
        row: &Row,
        mappings: &[ResultMapping],
        prefix: &str,
        properties: &mut IndexMap<String, Value>,
    ) -> Result<()> {
        for mapping in mappings {
            let column = format!("{prefix}{}", mapping.column);
            let raw = row.get(&column).cloned().unwrap_or(Value::Null);
            let value = self.convert_mapped(&raw, mapping)?;
            properties.insert(mapping.property.clone(), value);
        }
        Ok(())
    }

    fn convert_mapped(&self, raw: &Value, mapping: &ResultMapping) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        if let Some(handler) = &mapping.type_handler {
            return self.config.type_handlers().resolve(handler).from_sql(raw);
        }
        if let Some(value_type) = &mapping.value_type {
            let value_type = self.config.resolve_alias(value_type);
            if self.config.type_handlers().contains(&value_type) {
                return self.config.type_handlers().resolve(&value_type).from_sql(raw);
            }
        }
        Ok(raw.clone())
    }

    /// Inserts raw values for columns no explicit or nested mapping
    /// claimed, under the (optionally camelCased) column name.
    fn auto_map(&self, row: &Row, map: &ResultMap, properties: &mut IndexMap<String, Value>) {
        let claimed = claimed_columns(map);
        let camel = self.config.settings().map_underscore_to_camel_case;
        for (column, value) in row.iter() {
            if claimed.contains(column) {
                continue;
            }
            let name = if camel {
                camel_case(column)
            } else {
                column.to_owned()
            };
            properties.entry(name).or_insert_with(|| value.clone());
        }
    }

    /// Follows the discriminator chain to the effective map for a row.
    fn discriminated(&self, map: &ResultMap, row: &Row) -> Result<ResultMap> {
        let mut current = map.clone();
        let mut visited = HashSet::new();
        visited.insert(current.id.clone());
        while let Some(discriminator) = current.discriminator.clone() {
            let value = row
                .get(&discriminator.column)
                .cloned()
                .unwrap_or(Value::Null)
                .to_text();
            let Some(case_map_id) = discriminator.case_for(&value) else {
                break;
            };
            if !visited.insert(case_map_id.to_owned()) {
                break;
            }
            current = self.result_map(case_map_id)?.as_ref().clone();
        }
        Ok(current)
    }

    fn nested_view(
        &self,
        nested: &NestedMapping,
        target_type: Option<&str>,
    ) -> Result<ResultMap> {
        if let Some(id) = &nested.nested_result_map {
            return Ok(self.result_map(id)?.as_ref().clone());
        }
        let mut map = ResultMap::builder("(inline)").build();
        map.type_name = target_type.map(str::to_owned);
        map.id_mappings.clone_from(&nested.id_mappings);
        map.result_mappings.clone_from(&nested.result_mappings);
        Ok(map)
    }

    /// Materializes a property bag as the target type: a registered
    /// adapter runs constructor hydration, an unregistered type becomes a
    /// dynamic instance with all properties assigned directly, and no
    /// type at all keeps the bag associative.
    fn construct(
        &self,
        type_name: Option<&str>,
        properties: IndexMap<String, Value>,
    ) -> Result<Value> {
        let Some(type_name) = type_name else {
            return Ok(Value::Object(properties));
        };
        let type_name = self.config.resolve_alias(type_name);
        match self.config.entities().get(&type_name) {
            Some(def) => Ok(Value::Instance(def.construct(properties)?)),
            None => {
                let mut instance = crate::param_value::Instance::new(type_name);
                instance.properties = properties;
                Ok(Value::Instance(instance))
            }
        }
    }
}

struct GroupedParent {
    type_name: Option<String>,
    properties: IndexMap<String, Value>,
    seen_items: HashSet<String>,
}

/// The identity tuple of a row under a mapping set: values at the
/// (prefixed) identity columns, falling back to all mapped columns when
/// no identity columns are declared.
fn identity_tuple(
    row: &Row,
    id_mappings: &[ResultMapping],
    result_mappings: &[ResultMapping],
    prefix: &str,
) -> Vec<Value> {
    let mappings = if id_mappings.is_empty() {
        result_mappings
    } else {
        id_mappings
    };
    mappings
        .iter()
        .map(|mapping| {
            row.get(&format!("{prefix}{}", mapping.column))
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn tuple_key(identity: &[Value]) -> String {
    identity
        .iter()
        .map(|value| format!("{value:?}"))
        .collect::<Vec<_>>()
        .join("\u{1}")
}

fn claimed_columns(map: &ResultMap) -> HashSet<String> {
    let mut claimed: HashSet<String> = map
        .id_mappings
        .iter()
        .chain(&map.result_mappings)
        .map(|mapping| mapping.column.clone())
        .collect();
    for association in &map.associations {
        for mapping in association
            .nested
            .id_mappings
            .iter()
            .chain(&association.nested.result_mappings)
        {
            claimed.insert(format!(
                "{}{}",
                association.nested.column_prefix, mapping.column
            ));
        }
    }
    for collection in &map.collections {
        for mapping in collection
            .nested
            .id_mappings
            .iter()
            .chain(&collection.nested.result_mappings)
        {
            claimed.insert(format!(
                "{}{}",
                collection.nested.column_prefix, mapping.column
            ));
        }
    }
    claimed
}
