//! The public model surface: base factory, bound models and records.
//!
//! [`create_basemodel`] captures a database path and configuration once and
//! hands back a [`ModelBase`]; every model built from it shares the same
//! storage handle and options. Declaring a model is an explicit registration
//! step — an ordered list of `(field name, Column)` pairs — rather than
//! attribute introspection, so the schema is derived eagerly and cached for
//! the process lifetime. The async runtime surface (`create`, `fetch`,
//! `save`, `delete`) suspends only at storage and lock boundaries.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::datatype::Value;
use crate::error::{QuartError, Result};
use crate::persist::{RowMap, StorageHandle};
use crate::query::{Filter, LookupPlan};
use crate::schema::{Column, Schema, SURROGATE_KEY};

lazy_static! {
    // one derived schema per (database path, model name) for the process lifetime
    static ref SCHEMAS: Mutex<HashMap<(PathBuf, String), Arc<Schema>>> =
        Mutex::new(HashMap::new());
}

/// Configuration captured once per base model and applied to every model
/// derived from it. Loadable from a config file and `QUARTDB_*` environment
/// variables via [`DatabaseOptions::load`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Create the database file and tables when missing.
    pub create_table: bool,
    /// Serialize writes across OS processes with an advisory lock file.
    pub use_filelock: bool,
    /// Upper bound on cross-process lock acquisition, in milliseconds.
    pub filelock_timeout_ms: u64,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            create_table: true,
            use_filelock: true,
            filelock_timeout_ms: 10_000,
        }
    }
}

impl DatabaseOptions {
    pub fn filelock_timeout(&self) -> Duration {
        Duration::from_millis(self.filelock_timeout_ms)
    }

    /// Layered configuration: an optional file, overridden by environment
    /// variables prefixed `QUARTDB` (e.g. `QUARTDB_USE_FILELOCK=false`).
    pub fn load(file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("QUARTDB").try_parsing(true))
            .build()
            .map_err(|e| QuartError::Config(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| QuartError::Config(e.to_string()))
    }
}

/// Open (or reuse) the storage handle for `path` and return a base all
/// models for that file derive from.
///
/// Fails with [`QuartError::Connection`] when the file does not exist and
/// `create_table` is off.
pub fn create_basemodel(path: impl AsRef<Path>, options: DatabaseOptions) -> Result<ModelBase> {
    let handle = StorageHandle::open(
        path,
        options.create_table,
        options.use_filelock,
        options.filelock_timeout(),
    )?;
    Ok(ModelBase { handle, options })
}

/// A database binding shared by every model declared against it.
pub struct ModelBase {
    handle: Arc<StorageHandle>,
    options: DatabaseOptions,
}

impl ModelBase {
    /// Declare a model: derive (or re-use) its schema and bind it to this
    /// base's storage. Table creation is deferred to first use.
    ///
    /// Re-declaring a model name against the same file must be structurally
    /// identical; a conflicting redefinition fails with
    /// [`QuartError::Schema`].
    pub fn model(&self, name: &str, fields: Vec<(&str, Column)>) -> Result<Model> {
        let fields = fields
            .into_iter()
            .map(|(n, c)| (n.to_owned(), c))
            .collect();
        let derived = Schema::derive(name, fields)?;
        let key = (self.handle.path().to_path_buf(), derived.table().to_owned());
        let mut cache = SCHEMAS
            .lock()
            .map_err(|_| QuartError::Schema("schema cache poisoned".to_owned()))?;
        let schema = match cache.get(&key) {
            Some(cached) => {
                if **cached != derived {
                    return Err(QuartError::Schema(format!(
                        "conflicting redefinition of model '{name}' for '{}'",
                        self.handle.path().display()
                    )));
                }
                Arc::clone(cached)
            }
            None => {
                let schema = Arc::new(derived);
                cache.insert(key, Arc::clone(&schema));
                schema
            }
        };
        debug!(table = schema.table(), "model bound");
        Ok(Model {
            schema,
            handle: Arc::clone(&self.handle),
            create_table: self.options.create_table,
            ready: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }
}

impl fmt::Debug for ModelBase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ModelBase")
            .field("path", &self.handle.path())
            .field("options", &self.options)
            .finish()
    }
}

/// A schema-bound model over one table. All operations are async and go
/// through the storage handle's concurrency guard.
pub struct Model {
    schema: Arc<Schema>,
    handle: Arc<StorageHandle>,
    create_table: bool,
    ready: OnceCell<()>,
}

impl Model {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Table creation and additive migration, run once on first use.
    async fn ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                if self.create_table {
                    self.handle.ensure_table(&self.schema).await?;
                }
                Ok::<(), QuartError>(())
            })
            .await?;
        Ok(())
    }

    /// Insert a new row and return it as a populated [`Record`].
    ///
    /// Omitted fields take their declared defaults; an omitted NOT NULL
    /// field without a default fails before any I/O is attempted.
    pub async fn create(&self, values: Vec<(&str, Value)>) -> Result<Record> {
        self.ready().await?;
        let values = values
            .into_iter()
            .map(|(n, v)| (n.to_owned(), v))
            .collect();
        let complete = self.assemble_row(values)?;
        let pk = self.handle.insert(&self.schema, complete.clone()).await?;
        let mut record = Record::hydrated(&self.schema, complete.into_iter().collect());
        record
            .values
            .insert(self.schema.primary_key().to_owned(), pk.clone());
        record.primary_key = Some(pk);
        Ok(record)
    }

    /// Fetch every record matching the filter. An empty filter matches all
    /// rows. Each call re-executes the lookup.
    pub async fn fetch(&self, filter: &Filter) -> Result<Vec<Record>> {
        self.fetch_with(filter, None, None).await
    }

    /// Fetch with an optional limit and offset.
    pub async fn fetch_with(
        &self,
        filter: &Filter,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Record>> {
        self.ready().await?;
        let mut plan = LookupPlan::translate(&self.schema, filter)?;
        if let Some(limit) = limit {
            plan = plan.with_limit(limit);
        }
        if let Some(offset) = offset {
            plan = plan.with_offset(offset);
        }
        let rows = self.handle.select(&self.schema, plan).await?;
        Ok(rows
            .into_iter()
            .map(|row| Record::hydrated(&self.schema, row))
            .collect())
    }

    /// Count the records matching the filter without hydrating them.
    pub async fn count(&self, filter: &Filter) -> Result<u64> {
        self.ready().await?;
        let plan = LookupPlan::translate(&self.schema, filter)?;
        self.handle.count(&self.schema, plan).await
    }

    /// Persist a record: changed fields only for a previously fetched or
    /// created record, a full insert for a new one.
    pub async fn save(&self, record: &mut Record) -> Result<()> {
        self.ready().await?;
        self.check_record(record)?;
        match record.primary_key.clone() {
            None => {
                let values: Vec<(String, Value)> = self
                    .schema
                    .fields()
                    .filter_map(|(name, _)| {
                        record.values.get(name).map(|v| (name.to_owned(), v.clone()))
                    })
                    .collect();
                let complete = self.assemble_row(values)?;
                let pk = self.handle.insert(&self.schema, complete.clone()).await?;
                for (name, value) in complete {
                    record.values.insert(name, value);
                }
                record
                    .values
                    .insert(self.schema.primary_key().to_owned(), pk.clone());
                record.primary_key = Some(pk);
                record.dirty.clear();
                Ok(())
            }
            Some(pk) => {
                if record.dirty.is_empty() {
                    return Ok(());
                }
                let mut changed = Vec::with_capacity(record.dirty.len());
                for name in &record.dirty {
                    let value = record.values.get(name).cloned().unwrap_or(Value::Null);
                    self.validate_value(name, &value)?;
                    changed.push((name.clone(), value));
                }
                self.handle.update(&self.schema, pk, changed).await?;
                record.dirty.clear();
                Ok(())
            }
        }
    }

    /// Delete a record by primary key and invalidate it; any further use of
    /// the record is rejected.
    pub async fn delete(&self, record: &mut Record) -> Result<()> {
        self.ready().await?;
        self.check_record(record)?;
        let Some(pk) = record.primary_key.clone() else {
            return Err(QuartError::Constraint {
                table: self.schema.table().to_owned(),
                detail: "record was never saved; nothing to delete".to_owned(),
            });
        };
        self.handle.delete(&self.schema, pk).await?;
        record.alive = false;
        Ok(())
    }

    /// A detached record for this model; populate it with [`Record::set`]
    /// and persist it with [`Model::save`].
    pub fn new_record(&self) -> Record {
        Record {
            table: self.schema.table().to_owned(),
            primary_key_field: self.schema.primary_key().to_owned(),
            primary_key: None,
            values: HashMap::new(),
            dirty: HashSet::new(),
            alive: true,
        }
    }

    fn check_record(&self, record: &Record) -> Result<()> {
        if record.table != self.schema.table() {
            return Err(QuartError::Schema(format!(
                "record belongs to table '{}', not '{}'",
                record.table,
                self.schema.table()
            )));
        }
        if !record.alive {
            return Err(QuartError::Constraint {
                table: self.schema.table().to_owned(),
                detail: "record has been deleted; further use is invalid".to_owned(),
            });
        }
        Ok(())
    }

    fn validate_value(&self, name: &str, value: &Value) -> Result<()> {
        let Some(column) = self.schema.field(name) else {
            return Err(QuartError::UnknownField {
                table: self.schema.table().to_owned(),
                field: name.to_owned(),
            });
        };
        if value.is_null() && !column.is_nullable() {
            return Err(QuartError::Constraint {
                table: self.schema.table().to_owned(),
                detail: format!("field '{name}' is NOT NULL"),
            });
        }
        if !value.matches(column.logical_type()) {
            return Err(QuartError::Schema(format!(
                "value of kind {} does not match field '{name}' of type {} in table '{}'",
                value.kind(),
                column.logical_type(),
                self.schema.table()
            )));
        }
        Ok(())
    }

    /// Validate supplied values and fill in declared defaults, failing
    /// before I/O when a NOT NULL field has neither a value nor a default.
    fn assemble_row(&self, values: Vec<(String, Value)>) -> Result<Vec<(String, Value)>> {
        for (i, (name, value)) in values.iter().enumerate() {
            if values[..i].iter().any(|(seen, _)| seen == name) {
                return Err(QuartError::Schema(format!(
                    "field '{name}' supplied more than once for table '{}'",
                    self.schema.table()
                )));
            }
            self.validate_value(name, value)?;
        }
        let mut complete = values;
        for (name, column) in self.schema.fields() {
            if complete.iter().any(|(n, _)| n == name) {
                continue;
            }
            if let Some(default) = column.default() {
                complete.push((name.to_owned(), default.clone()));
            } else if !column.is_nullable() {
                return Err(QuartError::Constraint {
                    table: self.schema.table().to_owned(),
                    detail: format!("missing value for NOT NULL field '{name}'"),
                });
            }
        }
        Ok(complete)
    }
}

/// Hydrated in-memory instance of one row. Owned by the caller; mutations
/// are tracked per field so [`Model::save`] writes a minimal payload.
#[derive(Debug, Clone)]
pub struct Record {
    table: String,
    primary_key_field: String,
    primary_key: Option<Value>,
    values: HashMap<String, Value>,
    dirty: HashSet<String>,
    alive: bool,
}

impl Record {
    fn hydrated(schema: &Schema, row: RowMap) -> Record {
        let primary_key = row.get(schema.primary_key()).cloned();
        Record {
            table: schema.table().to_owned(),
            primary_key_field: schema.primary_key().to_owned(),
            primary_key,
            values: row,
            dirty: HashSet::new(),
            alive: true,
        }
    }

    /// The primary key value, `None` for a record not yet saved.
    pub fn id(&self) -> Option<&Value> {
        self.primary_key.as_ref()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Assign a field, marking it dirty. Validation against the schema
    /// happens in [`Model::save`], before any I/O.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        if field == self.primary_key_field || field == SURROGATE_KEY {
            // the primary key is immutable once assigned
            if self.primary_key.is_some() {
                return;
            }
        }
        self.values.insert(field.to_owned(), value.into());
        self.dirty.insert(field.to_owned());
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        match self.values.get(field) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        match self.values.get(field) {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn real(&self, field: &str) -> Option<f64> {
        match self.values.get(field) {
            Some(Value::Real(r)) => Some(*r),
            Some(Value::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn boolean(&self, field: &str) -> Option<bool> {
        match self.values.get(field) {
            Some(Value::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        match self.values.get(field) {
            Some(Value::Timestamp(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}
