//! The in-memory configuration model.
//!
//! An external loader (the XML mapper parser, or test code building
//! statements programmatically) populates a [`Configuration`] during
//! startup: settings, type aliases, environments, result maps, mapped
//! statements with compiled SQL sources, per-namespace caches, and the
//! shared registries. After loading, the configuration is shared
//! immutably across sessions; only the concurrent registries accept late
//! registration.

use crate::cache::{build_cache, Cache, CacheConfig};
use crate::datasource::ConnectionSource;
use crate::dynamic::SqlNode;
use crate::entity::EntityRegistry;
use crate::error::{Error, Result};
use crate::param_value::{ParamsMap, Value};
use crate::result_map::ResultMap;
use crate::session::MapperInterface;
use crate::sql_source::SqlSource;
use crate::telemetry::QueryHook;
use crate::transaction::TransactionFactory;
use crate::type_handler::TypeHandlerRegistry;
use dashmap::DashMap;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use strum_macros::Display;
use threadsafe_lru::LruCache;

/// What a mapped statement does, as declared by its author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StatementKind {
    #[strum(to_string = "SELECT")]
    Select,
    #[strum(to_string = "INSERT")]
    Insert,
    #[strum(to_string = "UPDATE")]
    Update,
    #[strum(to_string = "DELETE")]
    Delete,
    #[strum(to_string = "CALLABLE")]
    Callable,
}

impl StatementKind {
    /// Whether the statement may be dispatched through `select_*`.
    #[must_use]
    pub const fn is_query(self) -> bool {
        matches!(self, Self::Select | Self::Callable)
    }

    /// Whether the statement may be dispatched through
    /// `insert`/`update`/`delete` (the write kinds are interchangeable
    /// with one another).
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

/// The statement-preparation policy a session runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ExecutorType {
    #[default]
    #[strum(to_string = "SIMPLE")]
    Simple,
    #[strum(to_string = "REUSE")]
    Reuse,
    #[strum(to_string = "BATCH")]
    Batch,
}

impl ExecutorType {
    pub fn parse(text: &str) -> Result<Self> {
        match text.to_ascii_uppercase().as_str() {
            "SIMPLE" => Ok(Self::Simple),
            "REUSE" => Ok(Self::Reuse),
            "BATCH" => Ok(Self::Batch),
            other => Err(Error::config(
                Settings::OPT_DEFAULT_EXECUTOR_TYPE,
                format!("`{other}` is not an executor type"),
            )),
        }
    }
}

/// How query rows become application values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum HydrationMode {
    /// Construct a typed instance per row.
    #[default]
    #[strum(to_string = "OBJECT")]
    Object,
    /// Keep rows associative.
    #[strum(to_string = "ARRAY")]
    Array,
    /// Return the first column of each row.
    #[strum(to_string = "SCALAR")]
    Scalar,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub cache_enabled: bool,
    pub lazy_loading_enabled: bool,
    pub map_underscore_to_camel_case: bool,
    pub default_executor_type: ExecutorType,
    /// Applied when a statement declares no timeout of its own; zero
    /// keeps the driver default.
    pub default_statement_timeout_ms: u64,
    pub use_generated_keys: bool,
    pub debug_mode: bool,
    /// Reject `${...}` substitutions that are not identifier-safe.
    pub strict_substitution: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_enabled: crate::DEFAULT_CACHE_ENABLED,
            lazy_loading_enabled: false,
            map_underscore_to_camel_case: crate::DEFAULT_MAP_UNDERSCORE_TO_CAMEL_CASE,
            default_executor_type: ExecutorType::Simple,
            default_statement_timeout_ms: crate::DEFAULT_STATEMENT_TIMEOUT_MS,
            use_generated_keys: false,
            debug_mode: false,
            strict_substitution: false,
        }
    }
}

impl Settings {
    pub const OPT_CACHE_ENABLED: &'static str = "cacheEnabled";
    pub const OPT_LAZY_LOADING_ENABLED: &'static str = "lazyLoadingEnabled";
    pub const OPT_MAP_UNDERSCORE_TO_CAMEL_CASE: &'static str = "mapUnderscoreToCamelCase";
    pub const OPT_DEFAULT_EXECUTOR_TYPE: &'static str = "defaultExecutorType";
    pub const OPT_DEFAULT_STATEMENT_TIMEOUT: &'static str = "defaultStatementTimeout";
    pub const OPT_USE_GENERATED_KEYS: &'static str = "useGeneratedKeys";
    pub const OPT_DEBUG_MODE: &'static str = "debugMode";
    pub const OPT_STRICT_SUBSTITUTION: &'static str = "strictSubstitution";

    /// Parses a settings map with typed validation. The timeout accepts
    /// an integer (milliseconds) or a human-readable duration string.
    pub fn from_map(options: &ParamsMap) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in options {
            match key.as_str() {
                Self::OPT_CACHE_ENABLED => {
                    settings.cache_enabled = expect_bool(key, value)?;
                }
                Self::OPT_LAZY_LOADING_ENABLED => {
                    settings.lazy_loading_enabled = expect_bool(key, value)?;
                }
                Self::OPT_MAP_UNDERSCORE_TO_CAMEL_CASE => {
                    settings.map_underscore_to_camel_case = expect_bool(key, value)?;
                }
                Self::OPT_DEFAULT_EXECUTOR_TYPE => {
                    settings.default_executor_type = ExecutorType::parse(&value.to_text())?;
                }
                Self::OPT_DEFAULT_STATEMENT_TIMEOUT => {
                    settings.default_statement_timeout_ms = match value {
                        Value::Int(n) => u64::try_from(*n)?,
                        Value::Str(text) => u64::try_from(
                            parse_duration::parse(text)
                                .map_err(|e| Error::config(key.as_str(), e.to_string()))?
                                .as_millis(),
                        )?,
                        _ => {
                            return Err(Error::config(
                                key.as_str(),
                                "must be an integer or a duration string",
                            ));
                        }
                    };
                }
                Self::OPT_USE_GENERATED_KEYS => {
                    settings.use_generated_keys = expect_bool(key, value)?;
                }
                Self::OPT_DEBUG_MODE => {
                    settings.debug_mode = expect_bool(key, value)?;
                }
                Self::OPT_STRICT_SUBSTITUTION => {
                    settings.strict_substitution = expect_bool(key, value)?;
                }
                other => {
                    return Err(Error::config(other, "unknown setting"));
                }
            }
        }
        Ok(settings)
    }
}

fn expect_bool(key: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(Error::config(key, "must be a boolean")),
    }
}

/// One database environment: a connection source plus the transaction
/// flavor to run against it.
#[derive(Clone)]
pub struct Environment {
    pub id: String,
    pub data_source: Arc<dyn ConnectionSource>,
    pub transaction_factory: Arc<dyn TransactionFactory>,
}

impl Environment {
    pub fn new(
        id: impl Into<String>,
        data_source: Arc<dyn ConnectionSource>,
        transaction_factory: Arc<dyn TransactionFactory>,
    ) -> Self {
        Self {
            id: id.into(),
            data_source,
            transaction_factory,
        }
    }
}

/// A named, parameterizable SQL template with metadata for parameter and
/// result shaping. Immutable once registered.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    pub id: String,
    pub kind: StatementKind,
    pub result_map: Option<String>,
    pub result_type: Option<String>,
    pub parameter_type: Option<String>,
    pub use_generated_keys: bool,
    pub key_property: Option<String>,
    pub key_column: Option<String>,
    /// Per-call timeout; `None` falls back to the settings default.
    pub timeout_millis: Option<u64>,
    pub fetch_size: Option<u32>,
    pub hydration: Option<HydrationMode>,
    pub sql_source: Arc<SqlSource>,
}

impl MappedStatement {
    pub fn builder(
        id: impl Into<String>,
        kind: StatementKind,
        sql_source: Arc<SqlSource>,
    ) -> MappedStatementBuilder {
        MappedStatementBuilder {
            statement: Self {
                id: id.into(),
                kind,
                result_map: None,
                result_type: None,
                parameter_type: None,
                use_generated_keys: false,
                key_property: None,
                key_column: None,
                timeout_millis: None,
                fetch_size: None,
                hydration: None,
                sql_source,
            },
        }
    }

    /// The namespace part of the dotted full id.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.id.rsplit_once('.').map_or("", |(ns, _)| ns)
    }
}

pub struct MappedStatementBuilder {
    statement: MappedStatement,
}

impl MappedStatementBuilder {
    #[must_use]
    pub fn result_map(mut self, id: impl Into<String>) -> Self {
        self.statement.result_map = Some(id.into());
        self
    }

    #[must_use]
    pub fn result_type(mut self, type_name: impl Into<String>) -> Self {
        self.statement.result_type = Some(type_name.into());
        self
    }

    #[must_use]
    pub fn parameter_type(mut self, type_name: impl Into<String>) -> Self {
        self.statement.parameter_type = Some(type_name.into());
        self
    }

    #[must_use]
    pub fn use_generated_keys(mut self, enabled: bool) -> Self {
        self.statement.use_generated_keys = enabled;
        self
    }

    #[must_use]
    pub fn key_property(mut self, property: impl Into<String>) -> Self {
        self.statement.key_property = Some(property.into());
        self
    }

    #[must_use]
    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.statement.key_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn timeout_millis(mut self, timeout: u64) -> Self {
        self.statement.timeout_millis = Some(timeout);
        self
    }

    #[must_use]
    pub fn fetch_size(mut self, fetch_size: u32) -> Self {
        self.statement.fetch_size = Some(fetch_size);
        self
    }

    #[must_use]
    pub fn hydration(mut self, mode: HydrationMode) -> Self {
        self.statement.hydration = Some(mode);
        self
    }

    #[must_use]
    pub fn build(self) -> MappedStatement {
        self.statement
    }
}

/// The immutable-after-load catalog every session reads from.
pub struct Configuration {
    settings: Settings,
    type_aliases: DashMap<String, String>,
    environments: IndexMap<String, Environment>,
    default_environment: Option<String>,
    result_maps: HashMap<String, Arc<ResultMap>>,
    statements: HashMap<String, Arc<MappedStatement>>,
    fragments: HashMap<String, SqlNode>,
    caches: HashMap<String, Arc<dyn Cache>>,
    type_handlers: TypeHandlerRegistry,
    entities: EntityRegistry,
    mappers: DashMap<String, Arc<MapperInterface>>,
    query_hook: QueryHook,
    compiled_sources: LruCache<String, Arc<SqlSource>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::with_settings(Settings::default())
    }
}

impl Configuration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            type_aliases: DashMap::new(),
            environments: IndexMap::new(),
            default_environment: None,
            result_maps: HashMap::new(),
            statements: HashMap::new(),
            fragments: HashMap::new(),
            caches: HashMap::new(),
            type_handlers: TypeHandlerRegistry::new(),
            entities: EntityRegistry::new(),
            mappers: DashMap::new(),
            query_hook: QueryHook::new(),
            compiled_sources: LruCache::new(
                crate::DEFAULT_SOURCE_CACHE_SHARD_COUNT,
                crate::DEFAULT_SOURCE_CACHE_SHARD_SIZE,
            ),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    #[must_use]
    pub fn type_handlers(&self) -> &TypeHandlerRegistry {
        &self.type_handlers
    }

    #[must_use]
    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    #[must_use]
    pub fn query_hook(&self) -> &QueryHook {
        &self.query_hook
    }

    // Type aliases

    pub fn register_alias(&self, alias: &str, type_name: &str) {
        self.type_aliases
            .insert(alias.to_ascii_lowercase(), type_name.to_owned());
    }

    /// Resolves an alias case-insensitively; unknown names pass through.
    #[must_use]
    pub fn resolve_alias(&self, name: &str) -> String {
        self.type_aliases
            .get(&name.to_ascii_lowercase())
            .map_or_else(|| name.to_owned(), |entry| entry.value().clone())
    }

    // Environments

    pub fn add_environment(&mut self, environment: Environment) {
        if self.default_environment.is_none() {
            self.default_environment = Some(environment.id.clone());
        }
        self.environments
            .insert(environment.id.clone(), environment);
    }

    pub fn set_default_environment(&mut self, id: &str) -> Result<()> {
        if !self.environments.contains_key(id) {
            return Err(Error::UnknownEnvironment { id: id.to_owned() });
        }
        self.default_environment = Some(id.to_owned());
        Ok(())
    }

    /// Looks an environment up; `None` selects the default and fails when
    /// no environment was registered.
    pub fn environment(&self, id: Option<&str>) -> Result<&Environment> {
        let id = match id {
            Some(id) => id,
            None => self
                .default_environment
                .as_deref()
                .ok_or_else(|| Error::UnknownEnvironment {
                    id: "(default)".to_owned(),
                })?,
        };
        self.environments
            .get(id)
            .ok_or_else(|| Error::UnknownEnvironment { id: id.to_owned() })
    }

    // Result maps

    /// Registers a result map, resolving `extends` against already
    /// registered parents.
    pub fn add_result_map(&mut self, map: ResultMap) -> Result<()> {
        let map = match &map.extends {
            Some(parent_id) => {
                let parent = self.result_map(parent_id)?;
                map.clone().merged_with(&parent)
            }
            None => map,
        };
        if self.result_maps.contains_key(&map.id) {
            return Err(Error::config(
                map.id.clone(),
                "result map is already registered",
            ));
        }
        self.result_maps.insert(map.id.clone(), Arc::new(map));
        Ok(())
    }

    pub fn result_map(&self, id: &str) -> Result<Arc<ResultMap>> {
        self.result_maps
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownResultMap { id: id.to_owned() })
    }

    // Mapped statements

    pub fn add_statement(&mut self, statement: MappedStatement) -> Result<()> {
        if self.statements.contains_key(&statement.id) {
            return Err(Error::DuplicateStatement {
                id: statement.id.clone(),
            });
        }
        self.statements
            .insert(statement.id.clone(), Arc::new(statement));
        Ok(())
    }

    /// Convenience registration for statements authored as plain text
    /// (no dynamic nodes). Identical texts share one compiled source.
    pub fn raw_statement(
        &self,
        id: &str,
        kind: StatementKind,
        text: &str,
    ) -> Result<MappedStatementBuilder> {
        let source = self.compile_raw(text)?;
        Ok(MappedStatement::builder(id, kind, source))
    }

    pub fn statement(&self, id: &str) -> Result<Arc<MappedStatement>> {
        self.statements
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownStatement { id: id.to_owned() })
    }

    /// Compiles raw statement text, caching by the text itself so
    /// repeated registrations share one source.
    pub fn compile_raw(&self, text: &str) -> Result<Arc<SqlSource>> {
        if let Some(source) = self.compiled_sources.get(text) {
            return Ok(source);
        }
        let source = Arc::new(SqlSource::raw(text)?);
        self.compiled_sources
            .insert(text.to_owned(), Arc::clone(&source));
        Ok(source)
    }

    // Reusable SQL fragments

    pub fn add_fragment(&mut self, id: &str, fragment: SqlNode) {
        self.fragments.insert(id.to_owned(), fragment);
    }

    /// An unresolved `include` reference is a configuration error.
    pub fn fragment(&self, id: &str) -> Result<&SqlNode> {
        self.fragments
            .get(id)
            .ok_or_else(|| Error::config(id, "unresolved SQL fragment reference"))
    }

    // Namespace caches

    pub fn add_cache(&mut self, namespace: &str, config: &CacheConfig) {
        self.caches
            .insert(namespace.to_owned(), build_cache(namespace, config));
    }

    #[must_use]
    pub fn cache(&self, namespace: &str) -> Option<Arc<dyn Cache>> {
        self.caches.get(namespace).cloned()
    }

    // Mapper interfaces

    pub fn add_mapper(&self, mapper: MapperInterface) {
        self.mappers
            .insert(mapper.name.clone(), Arc::new(mapper));
    }

    #[must_use]
    pub fn mapper(&self, name: &str) -> Option<Arc<MapperInterface>> {
        self.mappers.get(name).map(|entry| Arc::clone(entry.value()))
    }
}
