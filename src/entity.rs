//! Per-type adapters for application values.
//!
//! The engine never reflects over application types. Instead, developers
//! register an [`EntityDef`] per hydration target: the constructor
//! parameter list (with defaults and null admission), read-only
//! properties, and optional getter/setter closures standing in for
//! accessor methods. Types without a registered adapter still hydrate
//! through the dynamic fallback (all properties assigned directly).

use crate::error::{Error, Result};
use crate::param_value::{Instance, ParamsMap, Value};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

type GetterFn = Arc<dyn Fn(&Instance) -> Value + Send + Sync>;
type SetterFn = Arc<dyn Fn(&mut Instance, Value) + Send + Sync>;

/// A constructor parameter of a registered type.
#[derive(Debug, Clone)]
pub struct ConstructorParam {
    pub name: String,
    /// Fallback when the property map holds no value.
    pub default: Option<Value>,
    /// Whether null is an admissible final fallback.
    pub nullable: bool,
}

impl ConstructorParam {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            nullable: false,
        }
    }

    pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
            nullable: false,
        }
    }

    pub fn nullable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            nullable: true,
        }
    }
}

/// Declarative shape of one application type.
pub struct EntityDef {
    name: String,
    constructor: Vec<ConstructorParam>,
    readonly: HashSet<String>,
    getters: IndexMap<String, GetterFn>,
    setters: IndexMap<String, SetterFn>,
}

impl std::fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("constructor", &self.constructor)
            .field("readonly", &self.readonly)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("setters", &self.setters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructor: Vec::new(),
            readonly: HashSet::new(),
            getters: IndexMap::new(),
            setters: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn constructor(mut self, params: impl IntoIterator<Item = ConstructorParam>) -> Self {
        self.constructor = params.into_iter().collect();
        self
    }

    #[must_use]
    pub fn readonly(mut self, properties: impl IntoIterator<Item = &'static str>) -> Self {
        self.readonly = properties.into_iter().map(str::to_owned).collect();
        self
    }

    /// Registers a computed property, preferred over the stored value on
    /// dotted-path reads.
    #[must_use]
    pub fn getter(
        mut self,
        name: impl Into<String>,
        get: impl Fn(&Instance) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.getters.insert(name.into(), Arc::new(get));
        self
    }

    /// Registers a property writer, preferred over direct assignment.
    #[must_use]
    pub fn setter(
        mut self,
        name: impl Into<String>,
        set: impl Fn(&mut Instance, Value) + Send + Sync + 'static,
    ) -> Self {
        self.setters.insert(name.into(), Arc::new(set));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn has_constructor(&self) -> bool {
        !self.constructor.is_empty()
    }

    /// Constructs an instance, consuming matching values from `properties`.
    ///
    /// Constructor parameters resolve in order: property value, declared
    /// default, null if admissible; a parameter with none of the three
    /// fails. Whatever remains in the map afterwards is assigned through
    /// [`EntityDef::apply`].
    pub fn construct(&self, mut properties: IndexMap<String, Value>) -> Result<Instance> {
        let mut instance = Instance::new(self.name.clone());
        for param in &self.constructor {
            let value = match properties.shift_remove(&param.name) {
                Some(value) => value,
                None => match (&param.default, param.nullable) {
                    (Some(default), _) => default.clone(),
                    (None, true) => Value::Null,
                    (None, false) => {
                        return Err(Error::MissingConstructorArg {
                            type_name: self.name.clone(),
                            parameter: param.name.clone(),
                        });
                    }
                },
            };
            instance.properties.insert(param.name.clone(), value);
        }
        self.apply(&mut instance, properties);
        Ok(instance)
    }

    /// Assigns properties into an existing instance: registered setter
    /// first, else direct write unless the property is read-only.
    pub fn apply(&self, instance: &mut Instance, properties: IndexMap<String, Value>) {
        for (name, value) in properties {
            self.set(instance, &name, value);
        }
    }

    /// Writes one property. Returns false when the write was skipped
    /// (read-only property without a setter).
    pub fn set(&self, instance: &mut Instance, name: &str, value: Value) -> bool {
        if let Some(setter) = self.setters.get(name) {
            setter(instance, value);
            return true;
        }
        if self.readonly.contains(name) {
            return false;
        }
        instance.properties.insert(name.to_owned(), value);
        true
    }

    /// Reads one property: getter preferred, stored value otherwise.
    #[must_use]
    pub fn property(&self, instance: &Instance, name: &str) -> Option<Value> {
        if let Some(getter) = self.getters.get(name) {
            return Some(getter(instance));
        }
        instance.property(name).cloned()
    }

    /// Flattens an instance into a parameter bag: stored properties plus
    /// getter values, with stored properties winning name collisions.
    #[must_use]
    pub fn extract(&self, instance: &Instance) -> ParamsMap {
        let mut bag: ParamsMap = instance
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, getter) in &self.getters {
            bag.entry(name.clone())
                .or_insert_with(|| getter(instance));
        }
        bag
    }
}

/// Shared registry of entity adapters, readable from any session.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    defs: DashMap<String, Arc<EntityDef>>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, def: EntityDef) {
        self.defs
            .insert(def.name.to_ascii_lowercase(), Arc::new(def));
    }

    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Arc<EntityDef>> {
        self.defs
            .get(&type_name.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Reads a property of any value: map lookup for associative values,
    /// adapter-mediated access for instances.
    #[must_use]
    pub fn property(&self, base: &Value, name: &str) -> Option<Value> {
        match base {
            Value::Object(object) => object.get(name).cloned(),
            Value::Instance(instance) => match self.get(&instance.type_name) {
                Some(def) => def.property(instance, name),
                None => instance.property(name).cloned(),
            },
            _ => None,
        }
    }

    /// Walks a dotted path starting from `root`.
    #[must_use]
    pub fn resolve_path(&self, root: &Value, path: &str) -> Option<Value> {
        let mut current = root.clone();
        for segment in path.split('.') {
            current = self.property(&current, segment)?;
        }
        Some(current)
    }

    /// Walks a dotted path whose first segment is a key of `bag`.
    #[must_use]
    pub fn lookup(&self, bag: &ParamsMap, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => bag.get(path).cloned(),
            Some((head, rest)) => {
                let base = bag.get(head)?;
                self.resolve_path(base, rest)
            }
        }
    }

    /// Flattens a caller parameter into the evaluation bag per the
    /// extraction rules: maps pass through, instances contribute stored
    /// properties plus getter values. A bare scalar or array parameter is
    /// exposed under the conventional name `value`.
    #[must_use]
    pub fn extract(&self, parameter: &Value) -> ParamsMap {
        match parameter {
            Value::Null => ParamsMap::new(),
            Value::Object(object) => object
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Value::Instance(instance) => match self.get(&instance.type_name) {
                Some(def) => def.extract(instance),
                None => instance
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
            other => {
                let mut bag = ParamsMap::new();
                bag.insert("value".to_owned(), other.clone());
                bag
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn author_def() -> EntityDef {
        EntityDef::new("Author")
            .constructor([
                ConstructorParam::required("id"),
                ConstructorParam::with_default("name", "anonymous"),
                ConstructorParam::nullable("email"),
            ])
            .readonly(["id"])
            .getter("label", |instance| {
                Value::Str(format!(
                    "#{} {}",
                    instance.property("id").map(Value::to_text).unwrap_or_default(),
                    instance
                        .property("name")
                        .map(Value::to_text)
                        .unwrap_or_default()
                ))
            })
    }

    #[test]
    fn test_construct_with_defaults() {
        let mut props = IndexMap::new();
        props.insert("id".to_string(), Value::Int(7));
        props.insert("active".to_string(), Value::Bool(true));
        let instance = author_def().construct(props).unwrap();
        assert_eq!(instance.property("id"), Some(&Value::Int(7)));
        assert_eq!(instance.property("name"), Some(&Value::Str("anonymous".into())));
        assert_eq!(instance.property("email"), Some(&Value::Null));
        assert_eq!(instance.property("active"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = author_def().construct(IndexMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Hydration);
    }

    #[test]
    fn test_readonly_skipped_on_set() {
        let def = author_def();
        let mut props = IndexMap::new();
        props.insert("id".to_string(), Value::Int(1));
        let mut instance = def.construct(props).unwrap();
        assert!(!def.set(&mut instance, "id", Value::Int(99)));
        assert_eq!(instance.property("id"), Some(&Value::Int(1)));
        assert!(def.set(&mut instance, "name", Value::Str("Ada".into())));
    }

    #[test]
    fn test_getter_preferred_on_read_but_not_extraction() {
        let registry = EntityRegistry::new();
        registry.register(author_def().setter("shadow", |_, _| {}));
        let mut props = IndexMap::new();
        props.insert("id".to_string(), Value::Int(2));
        props.insert("name".to_string(), Value::Str("Ada".into()));
        let instance = registry.get("author").unwrap().construct(props).unwrap();
        let value = Value::Instance(instance);

        assert_eq!(
            registry.property(&value, "label"),
            Some(Value::Str("#2 Ada".into()))
        );
        let bag = registry.extract(&value);
        // Stored properties win collisions; the getter only adds new names.
        assert_eq!(bag.get("name"), Some(&Value::Str("Ada".into())));
        assert_eq!(bag.get("label"), Some(&Value::Str("#2 Ada".into())));
    }

    #[test]
    fn test_resolve_dotted_path() {
        let registry = EntityRegistry::new();
        let mut inner = IndexMap::new();
        inner.insert("city".to_string(), Value::Str("Oslo".into()));
        let mut bag = ParamsMap::new();
        bag.insert("address".to_string(), Value::Object(inner));
        assert_eq!(
            registry.lookup(&bag, "address.city"),
            Some(Value::Str("Oslo".into()))
        );
        assert_eq!(registry.lookup(&bag, "address.zip"), None);
        assert_eq!(registry.lookup(&bag, "missing"), None);
    }
}
