//! Translation of structured filter mappings into parameterized lookup plans.
//!
//! A [`Filter`] maps field names to conditions: a bare value means equality,
//! otherwise a comparison operator, a set membership test or a LIKE pattern.
//! [`LookupPlan::translate`] validates every referenced field against the
//! schema, type-checks operands against declared column types and emits a
//! conjunctive WHERE clause with `?` placeholders only. When at least one
//! referenced field is indexed the plan is marked index-eligible; that is a
//! hint for the storage engine, never a correctness requirement.

use std::fmt;

use crate::datatype::{LogicalType, Value};
use crate::error::{QuartError, Result};
use crate::schema::Schema;

/// Comparison operators usable in a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// A single filter condition against one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Bare value, interpreted as equality.
    Equals(Value),
    /// Explicit comparison.
    Compare(Op, Value),
    /// Set membership.
    In(Vec<Value>),
    /// SQL LIKE pattern, text columns only.
    Like(String),
}

/// An ordered, conjunctive (AND-combined) filter mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    entries: Vec<(String, Condition)>,
}

impl Filter {
    /// An empty filter matches all rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality on a field.
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entries
            .push((name.to_owned(), Condition::Equals(value.into())));
        self
    }

    /// Explicit comparison on a field.
    pub fn compare(mut self, name: &str, op: Op, value: impl Into<Value>) -> Self {
        self.entries
            .push((name.to_owned(), Condition::Compare(op, value.into())));
        self
    }

    /// Membership in a set of values.
    pub fn one_of(mut self, name: &str, values: Vec<Value>) -> Self {
        self.entries.push((name.to_owned(), Condition::In(values)));
        self
    }

    /// LIKE pattern match on a text field.
    pub fn like(mut self, name: &str, pattern: &str) -> Self {
        self.entries
            .push((name.to_owned(), Condition::Like(pattern.to_owned())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Condition)] {
        &self.entries
    }
}

/// Translated, validated, parameterized representation of a filter mapping.
#[derive(Debug, Clone)]
pub struct LookupPlan {
    where_sql: String,
    params: Vec<Value>,
    index_eligible: bool,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl LookupPlan {
    /// Validate the filter against the schema and build the plan.
    ///
    /// Unknown fields fail with [`QuartError::UnknownField`]; operand kinds
    /// that do not match the declared column type fail with
    /// [`QuartError::Schema`]. Both are raised before any I/O is attempted.
    pub fn translate(schema: &Schema, filter: &Filter) -> Result<LookupPlan> {
        let mut clauses = Vec::with_capacity(filter.entries().len());
        let mut params = Vec::new();
        let mut index_eligible = false;
        for (name, condition) in filter.entries() {
            let logical_type =
                schema
                    .lookup_type(name)
                    .ok_or_else(|| QuartError::UnknownField {
                        table: schema.table().to_owned(),
                        field: name.clone(),
                    })?;
            if schema.indexed_fields().iter().any(|f| f == name)
                || name == schema.primary_key()
            {
                index_eligible = true;
            }
            match condition {
                Condition::Equals(value) => {
                    check_operand(schema, name, logical_type, value)?;
                    if value.is_null() {
                        clauses.push(format!("{name} IS NULL"));
                    } else {
                        clauses.push(format!("{name} = ?"));
                        params.push(value.clone());
                    }
                }
                Condition::Compare(op, value) => {
                    check_operand(schema, name, logical_type, value)?;
                    if value.is_null() {
                        // only equality semantics are defined against NULL
                        match op {
                            Op::Eq => clauses.push(format!("{name} IS NULL")),
                            Op::Ne => clauses.push(format!("{name} IS NOT NULL")),
                            _ => {
                                return Err(QuartError::Schema(format!(
                                    "ordering comparison against NULL on field '{name}'"
                                )));
                            }
                        }
                    } else {
                        clauses.push(format!("{name} {} ?", op.sql()));
                        params.push(value.clone());
                    }
                }
                Condition::In(values) => {
                    if values.is_empty() {
                        // empty membership set can never match
                        clauses.push("1 = 0".to_owned());
                        continue;
                    }
                    for value in values {
                        check_operand(schema, name, logical_type, value)?;
                    }
                    let placeholders = vec!["?"; values.len()].join(", ");
                    clauses.push(format!("{name} IN ({placeholders})"));
                    params.extend(values.iter().cloned());
                }
                Condition::Like(pattern) => {
                    if logical_type != LogicalType::Text {
                        return Err(QuartError::Schema(format!(
                            "LIKE requires a TEXT field, but '{name}' in table '{}' is {logical_type}",
                            schema.table()
                        )));
                    }
                    clauses.push(format!("{name} LIKE ?"));
                    params.push(Value::Text(pattern.clone()));
                }
            }
        }
        Ok(LookupPlan {
            where_sql: clauses.join(" AND "),
            params,
            index_eligible,
            limit: None,
            offset: None,
        })
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether the plan touches at least one indexed field. Optimization
    /// hint only; results are identical whether or not it is honored.
    pub fn is_index_eligible(&self) -> bool {
        self.index_eligible
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// The WHERE/LIMIT/OFFSET tail of a SELECT or COUNT statement, together
    /// with the parameters feeding its placeholders.
    pub(crate) fn sql_tail(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = self.params.to_vec();
        if !self.where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_sql);
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(Value::Integer(clamp_to_i64(limit)));
                params.push(Value::Integer(clamp_to_i64(offset)));
            }
            (Some(limit), None) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(clamp_to_i64(limit)));
            }
            (None, Some(offset)) => {
                // SQLite requires a LIMIT before OFFSET; -1 means unbounded
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::Integer(clamp_to_i64(offset)));
            }
            (None, None) => {}
        }
        (sql, params)
    }
}

// limits beyond i64 range saturate rather than wrap into SQLite's negative
// "unbounded" encoding
fn clamp_to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn check_operand(
    schema: &Schema,
    name: &str,
    logical_type: LogicalType,
    value: &Value,
) -> Result<()> {
    if value.matches(logical_type) {
        return Ok(());
    }
    Err(QuartError::Schema(format!(
        "filter operand of kind {} does not match field '{name}' of type {logical_type} in table '{}'",
        value.kind(),
        schema.table()
    )))
}
