#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

//! A SQL-mapping data-access engine.
//!
//! Statements are authored as SQL with embedded dynamic templating
//! (`if` / `choose` / `foreach` / `where` / `set` / `trim` / `bind` /
//! `include`) and registered in a [`config::Configuration`] under dotted
//! ids. A [`session::Session`] dispatches calls to those statements through
//! an executor strategy, binds parameters through the type handler
//! registry, and hydrates result rows into values according to declarative
//! result maps.

pub mod cache;
pub mod config;
pub mod datasource;
pub mod driver;
pub mod dynamic;
pub mod entity;
pub mod error;
pub mod executor;
pub mod expr;
pub mod hydrator;
pub mod param_value;
pub mod result_map;
pub mod session;
pub mod sql_source;
pub mod telemetry;
pub mod transaction;
pub mod type_handler;
pub mod utils;

pub use config::{Configuration, ExecutorType, HydrationMode, Settings, StatementKind};
pub use error::{Error, ErrorKind, Result};
pub use param_value::{ParamsMap, Value};
pub use session::{Session, SessionFactory};

use std::num::NonZeroU32;

pub(crate) const DEFAULT_SOURCE_CACHE_SHARD_COUNT: usize = 8;
pub(crate) const DEFAULT_SOURCE_CACHE_SHARD_SIZE: usize = 256;
pub(crate) const DEFAULT_NAMESPACE_CACHE_SIZE: usize = 1024;
pub(crate) const DEFAULT_POOL_MAX_SIZE: NonZeroU32 = NonZeroU32::new(10).unwrap();
pub(crate) const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 0;
pub(crate) const DEFAULT_MAP_UNDERSCORE_TO_CAMEL_CASE: bool = false;
pub(crate) const DEFAULT_CACHE_ENABLED: bool = true;
