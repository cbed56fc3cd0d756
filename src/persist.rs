//! SQLite persistence layer: storage handles and raw CRUD execution.
//!
//! One [`StorageHandle`] exists per distinct database file path, shared via
//! `Arc` by every model bound to that path and tracked weakly in a
//! process-wide registry keyed by canonicalized path. The handle owns the
//! physical connection and the [`ConcurrencyGuard`]. All statements are
//! prepared with `?` placeholders; caller-supplied values never reach the
//! SQL text. Blocking SQLite calls run on the blocking thread pool so
//! concurrent async callers are not stalled, and every write commits
//! durably before the operation returns.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use lazy_static::lazy_static;
use rusqlite::{Connection, ErrorCode};
use tracing::{debug, info, warn};

use crate::datatype::Value;
use crate::error::{QuartError, Result};
use crate::guard::ConcurrencyGuard;
use crate::query::LookupPlan;
use crate::schema::{ColumnInfo, MigrationStep, Schema, SURROGATE_KEY};

/// How many times an idempotent read is retried on a transient connection
/// error before the error surfaces. Writes are never retried.
const READ_RETRIES: usize = 2;

/// One fetched row, keyed by field name.
pub type RowMap = HashMap<String, Value>;

lazy_static! {
    static ref HANDLES: Mutex<HashMap<PathBuf, Weak<StorageHandle>>> =
        Mutex::new(HashMap::new());
}

/// Shared ownership unit for one physical database file.
pub struct StorageHandle {
    path: PathBuf,
    core: Arc<EngineCore>,
}

/// Connection and guard, shared with the blocking closures that do the
/// actual SQLite work. The connection is only ever touched from the
/// blocking thread pool, behind its mutex.
struct EngineCore {
    connection: Mutex<Connection>,
    guard: ConcurrencyGuard,
}

impl EngineCore {
    fn lock_connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| QuartError::Connection("connection mutex poisoned".to_owned()))
    }
}

/// Set when the caller's future is dropped. Blocking write closures consult
/// the flag before acquiring the cross-process lock, so a write abandoned
/// while still waiting never reaches the database.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn abandoned(table: &str) -> QuartError {
    QuartError::Connection(format!(
        "write to table '{table}' abandoned before it started"
    ))
}

impl StorageHandle {
    /// Open (or reuse) the handle for a database file.
    ///
    /// Paths are canonicalized so that two spellings of the same file share
    /// one handle. When the file is absent it is created only if
    /// `create_missing` is set; otherwise the call fails with a
    /// [`QuartError::Connection`].
    pub fn open(
        path: impl AsRef<Path>,
        create_missing: bool,
        use_filelock: bool,
        filelock_timeout: Duration,
    ) -> Result<Arc<StorageHandle>> {
        let path = canonicalize(path.as_ref())?;
        let mut handles = HANDLES
            .lock()
            .map_err(|_| QuartError::Connection("handle registry poisoned".to_owned()))?;
        handles.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = handles.get(&path).and_then(Weak::upgrade) {
            let requested = use_filelock.then_some(filelock_timeout);
            if existing.core.guard.filelock_timeout() != requested {
                warn!(
                    path = %path.display(),
                    "reusing storage handle; lock settings of the first opener stay in force"
                );
            }
            debug!(path = %path.display(), "reusing storage handle");
            return Ok(existing);
        }
        if !path.exists() && !create_missing {
            return Err(QuartError::Connection(format!(
                "database file '{}' does not exist",
                path.display()
            )));
        }
        let connection = Connection::open(&path).map_err(|e| {
            QuartError::Connection(format!("could not open '{}': {e}", path.display()))
        })?;
        connection.busy_timeout(Duration::from_secs(5))?;
        info!(path = %path.display(), "opened database file");
        let handle = Arc::new(StorageHandle {
            core: Arc::new(EngineCore {
                connection: Mutex::new(connection),
                guard: ConcurrencyGuard::new(&path, use_filelock, filelock_timeout),
            }),
            path,
        });
        handles.insert(handle.path.clone(), Arc::downgrade(&handle));
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.core.guard
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StorageHandle {
    /// Idempotent DDL: create the table if absent, then reconcile the
    /// catalog against the schema and apply any additive migration, then
    /// make sure declared indexes exist.
    pub async fn ensure_table(&self, schema: &Arc<Schema>) -> Result<()> {
        let _exclusive = self.core.guard.exclusive().await;
        let core = Arc::clone(&self.core);
        let schema = Arc::clone(schema);
        let cancelled = Arc::new(AtomicBool::new(false));
        let _abandon = CancelOnDrop(Arc::clone(&cancelled));
        run_blocking(move || {
            if cancelled.load(Ordering::Relaxed) {
                return Err(abandoned(schema.table()));
            }
            let _lock = core.guard.acquire_file_lock(&cancelled)?;
            let mut conn = core.lock_connection()?;
            conn.execute(&schema.create_table_sql(), [])
                .map_err(|e| classify(schema.table(), e))?;
            let existing = read_catalog(&conn, schema.table())?;
            let plan = schema.reconcile(&existing)?;
            if !plan.is_empty() {
                let tx = conn
                    .transaction()
                    .map_err(|e| classify(schema.table(), e))?;
                for step in plan.steps() {
                    info!(table = schema.table(), step = %step, "applying migration");
                    let MigrationStep::AddColumn { sql, .. } = step;
                    tx.execute(sql, []).map_err(|e| classify(schema.table(), e))?;
                }
                tx.commit().map_err(|e| classify(schema.table(), e))?;
            }
            for index_sql in schema.create_index_sql() {
                conn.execute(&index_sql, [])
                    .map_err(|e| classify(schema.table(), e))?;
            }
            Ok(())
        })
        .await
    }

    /// Insert one row; returns the primary key value of the new row.
    pub async fn insert(
        &self,
        schema: &Arc<Schema>,
        values: Vec<(String, Value)>,
    ) -> Result<Value> {
        let _exclusive = self.core.guard.exclusive().await;
        let core = Arc::clone(&self.core);
        let schema = Arc::clone(schema);
        let cancelled = Arc::new(AtomicBool::new(false));
        let _abandon = CancelOnDrop(Arc::clone(&cancelled));
        run_blocking(move || {
            if cancelled.load(Ordering::Relaxed) {
                return Err(abandoned(schema.table()));
            }
            let _lock = core.guard.acquire_file_lock(&cancelled)?;
            let conn = core.lock_connection()?;
            let sql = if values.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", schema.table())
            } else {
                let columns: Vec<&str> = values.iter().map(|(n, _)| n.as_str()).collect();
                let placeholders = vec!["?"; values.len()].join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    schema.table(),
                    columns.join(", "),
                    placeholders
                )
            };
            let params: Vec<&Value> = values.iter().map(|(_, v)| v).collect();
            conn.execute(&sql, rusqlite::params_from_iter(params))
                .map_err(|e| classify(schema.table(), e))?;
            if schema.has_surrogate_key() {
                Ok(Value::Integer(conn.last_insert_rowid()))
            } else {
                let pk = values
                    .iter()
                    .find(|(n, _)| n == schema.primary_key())
                    .map(|(_, v)| v.clone());
                pk.ok_or_else(|| QuartError::Constraint {
                    table: schema.table().to_owned(),
                    detail: format!(
                        "insert did not supply primary key '{}'",
                        schema.primary_key()
                    ),
                })
            }
        })
        .await
    }

    /// Execute a lookup plan, returning the matching rows fully hydrated.
    ///
    /// A fresh call re-executes the lookup; results are never cached. On a
    /// transient connection error the read is retried a bounded number of
    /// times before any row has been surfaced to the caller.
    pub async fn select(&self, schema: &Arc<Schema>, plan: LookupPlan) -> Result<Vec<RowMap>> {
        let _shared = self.core.guard.shared().await;
        let core = Arc::clone(&self.core);
        let schema = Arc::clone(schema);
        debug!(
            table = schema.table(),
            index_eligible = plan.is_index_eligible(),
            "executing lookup"
        );
        run_blocking(move || {
            let mut attempt = 0;
            loop {
                match select_rows(&core, &schema, &plan) {
                    Err(QuartError::Connection(detail)) if attempt < READ_RETRIES => {
                        attempt += 1;
                        debug!(
                            table = schema.table(),
                            attempt, detail, "retrying read after transient error"
                        );
                    }
                    other => return other,
                }
            }
        })
        .await
    }

    /// Count the rows a lookup plan matches without hydrating them.
    pub async fn count(&self, schema: &Arc<Schema>, plan: LookupPlan) -> Result<u64> {
        let _shared = self.core.guard.shared().await;
        let core = Arc::clone(&self.core);
        let schema = Arc::clone(schema);
        run_blocking(move || {
            let conn = core.lock_connection()?;
            let (tail, params) = plan.sql_tail();
            let sql = format!("SELECT COUNT(*) FROM {}{}", schema.table(), tail);
            let count: i64 = conn
                .query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
                    row.get(0)
                })
                .map_err(|e| classify(schema.table(), e))?;
            Ok(count as u64)
        })
        .await
    }

    /// Update the changed fields of one row, addressed by primary key.
    pub async fn update(
        &self,
        schema: &Arc<Schema>,
        primary_key: Value,
        changed: Vec<(String, Value)>,
    ) -> Result<()> {
        if changed.is_empty() {
            return Ok(());
        }
        let _exclusive = self.core.guard.exclusive().await;
        let core = Arc::clone(&self.core);
        let schema = Arc::clone(schema);
        let cancelled = Arc::new(AtomicBool::new(false));
        let _abandon = CancelOnDrop(Arc::clone(&cancelled));
        run_blocking(move || {
            if cancelled.load(Ordering::Relaxed) {
                return Err(abandoned(schema.table()));
            }
            let _lock = core.guard.acquire_file_lock(&cancelled)?;
            let conn = core.lock_connection()?;
            let assignments: Vec<String> =
                changed.iter().map(|(n, _)| format!("{n} = ?")).collect();
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                schema.table(),
                assignments.join(", "),
                schema.primary_key()
            );
            let mut params: Vec<&Value> = changed.iter().map(|(_, v)| v).collect();
            params.push(&primary_key);
            conn.execute(&sql, rusqlite::params_from_iter(params))
                .map_err(|e| classify(schema.table(), e))?;
            Ok(())
        })
        .await
    }

    /// Delete one row by primary key.
    pub async fn delete(&self, schema: &Arc<Schema>, primary_key: Value) -> Result<()> {
        let _exclusive = self.core.guard.exclusive().await;
        let core = Arc::clone(&self.core);
        let schema = Arc::clone(schema);
        let cancelled = Arc::new(AtomicBool::new(false));
        let _abandon = CancelOnDrop(Arc::clone(&cancelled));
        run_blocking(move || {
            if cancelled.load(Ordering::Relaxed) {
                return Err(abandoned(schema.table()));
            }
            let _lock = core.guard.acquire_file_lock(&cancelled)?;
            let conn = core.lock_connection()?;
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                schema.table(),
                schema.primary_key()
            );
            conn.execute(&sql, rusqlite::params![primary_key])
                .map_err(|e| classify(schema.table(), e))?;
            Ok(())
        })
        .await
    }
}

fn select_rows(core: &EngineCore, schema: &Schema, plan: &LookupPlan) -> Result<Vec<RowMap>> {
    let conn = core.lock_connection()?;
    let mut columns: Vec<String> = Vec::new();
    if schema.has_surrogate_key() {
        columns.push(SURROGATE_KEY.to_owned());
    }
    columns.extend(schema.fields().map(|(n, _)| n.to_owned()));
    let (tail, params) = plan.sql_tail();
    let sql = format!(
        "SELECT {} FROM {}{}",
        columns.join(", "),
        schema.table(),
        tail
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| classify(schema.table(), e))?;
    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(|e| classify(schema.table(), e))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| classify(schema.table(), e))? {
        let mut map = RowMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let logical_type = schema.lookup_type(name).ok_or_else(|| {
                QuartError::Connection(format!("selected column '{name}' has no declared type"))
            })?;
            let cell = row.get_ref(i).map_err(|e| classify(schema.table(), e))?;
            map.insert(name.clone(), Value::from_sql_ref(cell, logical_type)?);
        }
        out.push(map);
    }
    Ok(out)
}

/// Read the physical column set of a table from the SQLite catalog.
fn read_catalog(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    // table names are normalized identifiers, safe to splice into a pragma
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| classify(table, e))?;
    let infos = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: row.get(2)?,
                notnull: row.get::<_, i64>(3)? != 0,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })
        .map_err(|e| classify(table, e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| classify(table, e))?;
    Ok(infos)
}

/// Map a rusqlite error onto the crate taxonomy, keeping the table name so
/// the failure is actionable.
fn classify(table: &str, err: rusqlite::Error) -> QuartError {
    match &err {
        rusqlite::Error::SqliteFailure(e, message)
            if e.code == ErrorCode::ConstraintViolation =>
        {
            QuartError::Constraint {
                table: table.to_owned(),
                detail: message.clone().unwrap_or_else(|| e.to_string()),
            }
        }
        _ => QuartError::Connection(format!("table '{table}': {err}")),
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| QuartError::Connection(format!("blocking task failed: {e}")))?
}

/// Canonicalize a database path without requiring the file to exist yet:
/// the parent directory is resolved and the file name appended.
fn canonicalize(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        QuartError::Connection(format!("'{}' is not a file path", path.display()))
    })?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let parent = parent.canonicalize().map_err(|e| {
        QuartError::Connection(format!(
            "could not resolve directory '{}': {e}",
            parent.display()
        ))
    })?;
    Ok(parent.join(file_name))
}
