//! QuartDB – a lightweight embedded record store over a single SQLite file.
//!
//! QuartDB binds declaratively described models to an embedded database:
//! * A [`schema::Column`] declares one field's storage type, indexing intent,
//!   nullability, default and primary-key status.
//! * A [`schema::Schema`] is derived once per model from its ordered field
//!   declarations and cached for the process lifetime.
//! * A [`persist::StorageHandle`] owns the physical file — one handle per
//!   canonical path, shared by every model bound to it.
//! * A [`guard::ConcurrencyGuard`] serializes writes (readers-writer within
//!   the process, an advisory lock file across processes) with a bounded
//!   acquisition timeout.
//! * A [`query::LookupPlan`] is the validated, parameterized form of a
//!   structured filter mapping, marked index-eligible when it can use one.
//!
//! ## Modules
//! * [`schema`] – column descriptors, schema derivation, additive migration.
//! * [`datatype`] – the closed logical type set and the tagged runtime value.
//! * [`query`] – filter mappings and their translation into lookup plans.
//! * [`persist`] – SQLite storage engine and the per-path handle registry.
//! * [`guard`] – in-process and cross-process write coordination.
//! * [`model`] – the public factory and the async model/record surface.
//!
//! ## Quick Start
//! ```no_run
//! use quartdb::{create_basemodel, Column, DatabaseOptions, Filter, Value};
//!
//! fn main() -> quartdb::Result<()> {
//!     let rt = tokio::runtime::Runtime::new().unwrap();
//!     rt.block_on(async {
//!         let base = create_basemodel("./database.db", DatabaseOptions::default())?;
//!         let user = base.model(
//!             "User",
//!             vec![
//!                 ("name", Column::new("STRING")?.indexed()),
//!                 ("age", Column::new("INTEGER")?),
//!             ],
//!         )?;
//!         user.create(vec![("name", Value::from("Alice")), ("age", Value::from(30))])
//!             .await?;
//!         let thirty = user.fetch(&Filter::new().field("age", 30)).await?;
//!         assert_eq!(thirty.len(), 1);
//!         Ok(())
//!     })
//! }
//! ```
//!
//! ## Concurrency
//! Operations suspend only at storage and lock boundaries. Writes against
//! one file are totally ordered; each write is a single durable SQLite
//! transaction, so partial writes are never visible. With the lock file
//! enabled, no two write transactions against the same file run
//! concurrently from any cooperating process; acquisition that exceeds the
//! configured timeout fails with [`QuartError::LockTimeout`] instead of
//! blocking indefinitely. A write whose caller gives up while it is still
//! waiting for the lock is abandoned and never reaches the database.

pub mod datatype;
pub mod error;
pub mod guard;
pub mod model;
pub mod persist;
pub mod query;
pub mod schema;

pub use datatype::{LogicalType, Value};
pub use error::{QuartError, Result};
pub use model::{create_basemodel, DatabaseOptions, Model, ModelBase, Record};
pub use query::{Condition, Filter, LookupPlan, Op};
pub use schema::{Column, ColumnInfo, MigrationPlan, MigrationStep, Schema};
