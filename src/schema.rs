//! Declarative column descriptors and the table schemas derived from them.
//!
//! A model is declared as an ordered list of `(field name, Column)` pairs.
//! [`Schema::derive`] turns that list into an immutable table description:
//! normalized table name, declaration-ordered fields, the set of indexed
//! fields and the primary key (an implicit auto-incrementing `id` when no
//! field declares itself primary). [`Schema::reconcile`] compares the derived
//! schema against what a previously persisted table actually looks like and
//! either produces an additive [`MigrationPlan`] or fails loudly on drift.

use std::fmt;

use crate::datatype::{LogicalType, Value};
use crate::error::{QuartError, Result};

/// Name of the implicit auto-incrementing surrogate key.
pub const SURROGATE_KEY: &str = "id";

/// Declares a single column: storage type, indexing intent, nullability,
/// optional default and primary-key status. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    logical_type: LogicalType,
    indexed: bool,
    nullable: bool,
    default_value: Option<Value>,
    primary_key: bool,
}

impl Column {
    /// Build a column from a declared type name, e.g. `Column::new("STRING")`.
    /// Fails when the name is not in the closed type enumeration.
    pub fn new(type_name: &str) -> Result<Self> {
        Ok(Self::of(LogicalType::parse(type_name)?))
    }

    pub fn of(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            indexed: false,
            nullable: true,
            default_value: None,
            primary_key: false,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Attach a default applied when the field is omitted at insert time.
    /// The default must match the column's declared type.
    pub fn default_value(mut self, value: Value) -> Result<Self> {
        if !value.matches(self.logical_type) {
            return Err(QuartError::Schema(format!(
                "default value of kind {} does not match column type {}",
                value.kind(),
                self.logical_type
            )));
        }
        self.default_value = Some(value);
        Ok(self)
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
    pub fn default(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }
}

/// One physical column as reported by the storage catalog.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub notnull: bool,
    pub primary_key: bool,
}

/// An ordered list of additive DDL operations bringing a persisted table up
/// to the declared schema. Column removal or type change is never planned.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    steps: Vec<MigrationStep>,
}

#[derive(Debug, Clone)]
pub enum MigrationStep {
    AddColumn { field: String, sql: String },
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::AddColumn { field, .. } => write!(f, "add column {field}"),
        }
    }
}

/// Derived, immutable structural description of a model's table.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    table: String,
    fields: Vec<(String, Column)>,
    indexed: Vec<String>,
    primary_key: String,
    surrogate_key: bool,
}

impl Schema {
    /// Derive a schema from declared fields, preserving declaration order.
    ///
    /// Fails when no fields are declared, a field name repeats, more than one
    /// field claims the primary key, or a declared field collides with the
    /// implicit surrogate key.
    pub fn derive(model_name: &str, fields: Vec<(String, Column)>) -> Result<Schema> {
        let table = normalize_table_name(model_name)?;
        if fields.is_empty() {
            return Err(QuartError::Schema(format!(
                "model '{model_name}' declares no fields"
            )));
        }
        let mut primary_key: Option<String> = None;
        for (i, (name, column)) in fields.iter().enumerate() {
            if name.is_empty() {
                return Err(QuartError::Schema(format!(
                    "model '{model_name}' declares an unnamed field"
                )));
            }
            // field names are spliced into DDL and WHERE clauses, so they
            // must be plain identifiers
            if name.starts_with(|c: char| c.is_ascii_digit())
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(QuartError::Schema(format!(
                    "field '{name}' in model '{model_name}' is not a valid identifier"
                )));
            }
            if fields[..i].iter().any(|(seen, _)| seen == name) {
                return Err(QuartError::Schema(format!(
                    "duplicate field '{name}' in model '{model_name}'"
                )));
            }
            if column.is_primary_key() {
                if let Some(first) = &primary_key {
                    return Err(QuartError::Schema(format!(
                        "model '{model_name}' declares more than one primary key ('{first}' and '{name}')"
                    )));
                }
                primary_key = Some(name.clone());
            }
        }
        let surrogate_key = primary_key.is_none();
        if surrogate_key && fields.iter().any(|(name, _)| name == SURROGATE_KEY) {
            return Err(QuartError::Schema(format!(
                "field '{SURROGATE_KEY}' in model '{model_name}' collides with the implicit surrogate key; declare it with primary_key() instead"
            )));
        }
        let indexed = fields
            .iter()
            .filter(|(_, c)| c.is_indexed())
            .map(|(name, _)| name.clone())
            .collect();
        Ok(Schema {
            table,
            fields,
            indexed,
            primary_key: primary_key.unwrap_or_else(|| SURROGATE_KEY.to_owned()),
            surrogate_key,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.fields.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn field(&self, name: &str) -> Option<&Column> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn has_surrogate_key(&self) -> bool {
        self.surrogate_key
    }

    pub fn indexed_fields(&self) -> &[String] {
        &self.indexed
    }

    /// Storage type of a field referenced by name, resolving the implicit
    /// surrogate key to INTEGER. `None` when the field is not declared.
    pub fn lookup_type(&self, name: &str) -> Option<LogicalType> {
        if self.surrogate_key && name == SURROGATE_KEY {
            return Some(LogicalType::Integer);
        }
        self.field(name).map(|c| c.logical_type())
    }

    pub(crate) fn create_table_sql(&self) -> String {
        let mut parts = Vec::with_capacity(self.fields.len() + 1);
        if self.surrogate_key {
            parts.push(format!(
                "{SURROGATE_KEY} INTEGER PRIMARY KEY AUTOINCREMENT"
            ));
        }
        for (name, column) in &self.fields {
            parts.push(column_ddl(name, column));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            parts.join(", ")
        )
    }

    pub(crate) fn create_index_sql(&self) -> Vec<String> {
        self.indexed
            .iter()
            .map(|field| {
                format!(
                    "CREATE INDEX IF NOT EXISTS ix_{}_{} ON {} ({})",
                    self.table, field, self.table, field
                )
            })
            .collect()
    }

    /// Compare the persisted catalog against this schema.
    ///
    /// Columns declared here but absent physically become additive steps.
    /// Anything non-additive — a physical column the schema does not declare,
    /// an affinity mismatch, a moved primary key, or a missing NOT NULL
    /// column without a default (which SQLite cannot add) — is drift.
    pub fn reconcile(&self, existing: &[ColumnInfo]) -> Result<MigrationPlan> {
        let drift = |detail: String| QuartError::SchemaDrift {
            table: self.table.clone(),
            detail,
        };
        let mut incompatible = Vec::new();
        for info in existing {
            if self.surrogate_key && info.name == SURROGATE_KEY {
                if !info.primary_key {
                    incompatible.push(format!(
                        "column '{SURROGATE_KEY}' exists but is not the primary key"
                    ));
                }
                continue;
            }
            let Some(column) = self.field(&info.name) else {
                incompatible.push(format!(
                    "column '{}' exists in storage but is not declared",
                    info.name
                ));
                continue;
            };
            let declared = column.logical_type().affinity();
            if !info.declared_type.eq_ignore_ascii_case(declared) {
                incompatible.push(format!(
                    "column '{}' is stored as {} but declared as {}",
                    info.name, info.declared_type, declared
                ));
            }
            if info.primary_key != column.is_primary_key() {
                incompatible.push(format!(
                    "column '{}' disagrees with storage on primary key status",
                    info.name
                ));
            }
            let expects_notnull = !column.is_nullable() && !column.is_primary_key();
            if info.notnull != expects_notnull {
                incompatible.push(format!(
                    "column '{}' disagrees with storage on nullability",
                    info.name
                ));
            }
        }
        let mut steps = Vec::new();
        for (name, column) in &self.fields {
            if existing.iter().any(|info| &info.name == name) {
                continue;
            }
            if column.is_primary_key() {
                incompatible.push(format!(
                    "primary key column '{name}' is missing from storage"
                ));
                continue;
            }
            if !column.is_nullable() && column.default().is_none() {
                incompatible.push(format!(
                    "cannot add NOT NULL column '{name}' without a default"
                ));
                continue;
            }
            steps.push(MigrationStep::AddColumn {
                field: name.clone(),
                sql: format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    self.table,
                    column_ddl(name, column)
                ),
            });
        }
        if !incompatible.is_empty() {
            return Err(drift(incompatible.join("; ")));
        }
        Ok(MigrationPlan { steps })
    }
}

fn column_ddl(name: &str, column: &Column) -> String {
    let mut ddl = format!("{} {}", name, column.logical_type().affinity());
    if column.is_primary_key() {
        ddl.push_str(" PRIMARY KEY");
    }
    if !column.is_nullable() && !column.is_primary_key() {
        ddl.push_str(" NOT NULL");
    }
    if let Some(default) = column.default() {
        ddl.push_str(" DEFAULT ");
        ddl.push_str(&default.sql_literal());
    }
    ddl
}

/// Lowercase the model name and map anything outside `[a-z0-9_]` to `_`,
/// so the table name is always safe to splice into DDL.
fn normalize_table_name(model_name: &str) -> Result<String> {
    let trimmed = model_name.trim();
    if trimmed.is_empty() {
        return Err(QuartError::Schema("model name is empty".to_owned()));
    }
    let mut table: String = trimmed
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if table.starts_with(|c: char| c.is_ascii_digit()) {
        table.insert(0, '_');
    }
    Ok(table)
}
