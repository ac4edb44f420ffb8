//! Declarative recipes shaping database rows into application values.
//!
//! A [`ResultMap`] names identity columns (used for grouping denormalized
//! JOIN rows), scalar column→property mappings, nested associations and
//! collections, and an optional discriminator for polymorphic dispatch.
//! Maps are immutable once registered.

use indexmap::IndexMap;

/// A single column→property binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMapping {
    pub property: String,
    pub column: String,
    pub value_type: Option<String>,
    pub sql_type: Option<String>,
    pub type_handler: Option<String>,
}

impl ResultMapping {
    pub fn new(property: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            column: column.into(),
            value_type: None,
            sql_type: None,
            type_handler: None,
        }
    }

    #[must_use]
    pub fn value_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = Some(value_type.into());
        self
    }

    #[must_use]
    pub fn sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }

    #[must_use]
    pub fn type_handler(mut self, type_handler: impl Into<String>) -> Self {
        self.type_handler = Some(type_handler.into());
        self
    }
}

/// Shared shape of a nested mapping: either a reference to a registered
/// result map or inline identity + scalar mappings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NestedMapping {
    pub nested_result_map: Option<String>,
    pub id_mappings: Vec<ResultMapping>,
    pub result_mappings: Vec<ResultMapping>,
    /// Prepended to nested `column` names when reading from the parent
    /// row.
    pub column_prefix: String,
}

/// A cardinality-one nested mapping. NULL in all identity columns means
/// the association is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub property: String,
    pub target_type: Option<String>,
    pub nested: NestedMapping,
}

impl Association {
    pub fn to_result_map(property: impl Into<String>, result_map_id: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            target_type: None,
            nested: NestedMapping {
                nested_result_map: Some(result_map_id.into()),
                ..NestedMapping::default()
            },
        }
    }

    pub fn inline(
        property: impl Into<String>,
        target_type: impl Into<String>,
        id_mappings: Vec<ResultMapping>,
        result_mappings: Vec<ResultMapping>,
    ) -> Self {
        Self {
            property: property.into(),
            target_type: Some(target_type.into()),
            nested: NestedMapping {
                nested_result_map: None,
                id_mappings,
                result_mappings,
                column_prefix: String::new(),
            },
        }
    }

    #[must_use]
    pub fn column_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.nested.column_prefix = prefix.into();
        self
    }
}

/// A cardinality-many nested mapping. Items group by their identity-column
/// tuple under the parent; duplicates are suppressed.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub property: String,
    pub item_type: Option<String>,
    pub nested: NestedMapping,
}

impl Collection {
    pub fn to_result_map(property: impl Into<String>, result_map_id: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            item_type: None,
            nested: NestedMapping {
                nested_result_map: Some(result_map_id.into()),
                ..NestedMapping::default()
            },
        }
    }

    pub fn inline(
        property: impl Into<String>,
        item_type: impl Into<String>,
        id_mappings: Vec<ResultMapping>,
        result_mappings: Vec<ResultMapping>,
    ) -> Self {
        Self {
            property: property.into(),
            item_type: Some(item_type.into()),
            nested: NestedMapping {
                nested_result_map: None,
                id_mappings,
                result_mappings,
                column_prefix: String::new(),
            },
        }
    }

    #[must_use]
    pub fn column_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.nested.column_prefix = prefix.into();
        self
    }
}

/// Polymorphic dispatch: the stringified value of `column` selects a
/// replacement result map; a miss falls back to the base map.
#[derive(Debug, Clone, PartialEq)]
pub struct Discriminator {
    pub column: String,
    pub value_type: Option<String>,
    pub cases: IndexMap<String, String>,
}

impl Discriminator {
    pub fn new(
        column: impl Into<String>,
        cases: impl IntoIterator<Item = (&'static str, &'static str)>,
    ) -> Self {
        Self {
            column: column.into(),
            value_type: None,
            cases: cases
                .into_iter()
                .map(|(value, map_id)| (value.to_owned(), map_id.to_owned()))
                .collect(),
        }
    }

    #[must_use]
    pub fn case_for(&self, value: &str) -> Option<&str> {
        self.cases.get(value).map(String::as_str)
    }
}

/// A complete row-shaping recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMap {
    pub id: String,
    pub type_name: Option<String>,
    pub id_mappings: Vec<ResultMapping>,
    pub result_mappings: Vec<ResultMapping>,
    pub associations: Vec<Association>,
    pub collections: Vec<Collection>,
    pub discriminator: Option<Discriminator>,
    pub auto_mapping: bool,
    pub extends: Option<String>,
}

impl ResultMap {
    pub fn builder(id: impl Into<String>) -> ResultMapBuilder {
        ResultMapBuilder {
            map: Self {
                id: id.into(),
                type_name: None,
                id_mappings: Vec::new(),
                result_mappings: Vec::new(),
                associations: Vec::new(),
                collections: Vec::new(),
                discriminator: None,
                auto_mapping: false,
                extends: None,
            },
        }
    }

    /// Whether any nested mappings require grouped hydration.
    #[must_use]
    pub fn has_nested(&self) -> bool {
        !self.associations.is_empty() || !self.collections.is_empty()
    }

    /// Merges a parent map into this one for `extends` resolution: the
    /// child keeps its own mappings and inherits every parent mapping for
    /// a property it does not claim itself.
    #[must_use]
    pub fn merged_with(mut self, parent: &ResultMap) -> Self {
        if self.type_name.is_none() {
            self.type_name.clone_from(&parent.type_name);
        }
        merge_by_property(&mut self.id_mappings, &parent.id_mappings, |m| &m.property);
        merge_by_property(&mut self.result_mappings, &parent.result_mappings, |m| {
            &m.property
        });
        merge_by_property(&mut self.associations, &parent.associations, |a| {
            &a.property
        });
        merge_by_property(&mut self.collections, &parent.collections, |c| &c.property);
        if self.discriminator.is_none() {
            self.discriminator.clone_from(&parent.discriminator);
        }
        self
    }
}

fn merge_by_property<T: Clone>(own: &mut Vec<T>, parent: &[T], property: impl Fn(&T) -> &String) {
    for inherited in parent {
        if !own.iter().any(|m| property(m) == property(inherited)) {
            own.push(inherited.clone());
        }
    }
}

/// Fluent construction for [`ResultMap`].
pub struct ResultMapBuilder {
    map: ResultMap,
}

impl ResultMapBuilder {
    #[must_use]
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.map.type_name = Some(type_name.into());
        self
    }

    #[must_use]
    pub fn id_mapping(mut self, mapping: ResultMapping) -> Self {
        self.map.id_mappings.push(mapping);
        self
    }

    #[must_use]
    pub fn mapping(mut self, mapping: ResultMapping) -> Self {
        self.map.result_mappings.push(mapping);
        self
    }

    #[must_use]
    pub fn association(mut self, association: Association) -> Self {
        self.map.associations.push(association);
        self
    }

    #[must_use]
    pub fn collection(mut self, collection: Collection) -> Self {
        self.map.collections.push(collection);
        self
    }

    #[must_use]
    pub fn discriminator(mut self, discriminator: Discriminator) -> Self {
        self.map.discriminator = Some(discriminator);
        self
    }

    #[must_use]
    pub fn auto_mapping(mut self, enabled: bool) -> Self {
        self.map.auto_mapping = enabled;
        self
    }

    #[must_use]
    pub fn extends(mut self, parent_id: impl Into<String>) -> Self {
        self.map.extends = Some(parent_id.into());
        self
    }

    #[must_use]
    pub fn build(self) -> ResultMap {
        self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shapes_map() {
        let map = ResultMap::builder("blog.authorMap")
            .type_name("Author")
            .id_mapping(ResultMapping::new("id", "author_id"))
            .mapping(ResultMapping::new("name", "author_name").value_type("string"))
            .collection(Collection::to_result_map("posts", "blog.postMap").column_prefix("post_"))
            .build();
        assert_eq!(map.id, "blog.authorMap");
        assert!(map.has_nested());
        assert_eq!(map.collections[0].nested.column_prefix, "post_");
    }

    #[test]
    fn test_extends_merge_child_wins() {
        let parent = ResultMap::builder("shop.vehicleMap")
            .type_name("Vehicle")
            .id_mapping(ResultMapping::new("id", "id"))
            .mapping(ResultMapping::new("brand", "brand"))
            .mapping(ResultMapping::new("wheels", "wheel_count"))
            .build();
        let child = ResultMap::builder("shop.carMap")
            .type_name("Car")
            .extends("shop.vehicleMap")
            .mapping(ResultMapping::new("wheels", "car_wheels"))
            .build()
            .merged_with(&parent);

        assert_eq!(child.type_name.as_deref(), Some("Car"));
        assert_eq!(child.id_mappings.len(), 1);
        let wheels: Vec<_> = child
            .result_mappings
            .iter()
            .filter(|m| m.property == "wheels")
            .collect();
        assert_eq!(wheels.len(), 1);
        assert_eq!(wheels[0].column, "car_wheels");
        assert!(child.result_mappings.iter().any(|m| m.property == "brand"));
    }

    #[test]
    fn test_discriminator_case_lookup() {
        let discriminator =
            Discriminator::new("vehicle_type", [("car", "shop.carMap"), ("truck", "shop.truckMap")]);
        assert_eq!(discriminator.case_for("car"), Some("shop.carMap"));
        assert_eq!(discriminator.case_for("spaceship"), None);
    }
}
