use crate::error::{Result, StoreError};
use crate::execution::Execution;
use crate::schema::{self, TableKind, EXECUTION_ID_COLUMN};
use crate::value::{Field, Value};
use rusqlite::ToSql;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Saved,
    Failed,
}

/// One result row headed for a named table.
///
/// The row is committed exactly once: by the first [`OutcomeBuilder::save`]
/// or, if that never happens, when the builder is dropped. The target table
/// is created on first use and gains a nullable column for every key it has
/// not seen before.
pub struct OutcomeBuilder {
    execution: Execution,
    table: String,
    fields: Vec<Field>,
    status: Status,
}

#[derive(Serialize)]
struct PendingRow<'a> {
    table: &'a str,
    execution_id: i64,
    fields: &'a [Field],
}

impl OutcomeBuilder {
    /// `table` has already been validated by [`Execution::add`].
    pub(crate) fn new(execution: Execution, table: &str) -> Self {
        Self {
            execution,
            table: table.to_string(),
            fields: Vec::new(),
            status: Status::Pending,
        }
    }

    pub fn field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        if self.status != Status::Pending {
            return Err(StoreError::AlreadyFinalized);
        }
        schema::push_field(TableKind::Outcome, &mut self.fields, Field::new(key, value))?;
        Ok(self)
    }

    /// Append every field of `record`, e.g. a profiler's measurements.
    pub fn record(&mut self, record: impl IntoIterator<Item = Field>) -> Result<&mut Self> {
        for field in record {
            self.field(field.key, field.value)?;
        }
        Ok(self)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn is_saved(&self) -> bool {
        self.status == Status::Saved
    }

    /// Commit the row. Saving an already committed row is a no-op; a row
    /// whose commit failed reports [`StoreError::AlreadyFinalized`].
    pub fn save(&mut self) -> Result<()> {
        match self.status {
            Status::Saved => return Ok(()),
            Status::Failed => return Err(StoreError::AlreadyFinalized),
            Status::Pending => {}
        }
        let result = self.finalize();
        self.status = if result.is_ok() {
            Status::Saved
        } else {
            Status::Failed
        };
        result
    }

    fn finalize(&self) -> Result<()> {
        let table = self.table.as_str();
        let fields = &self.fields;
        self.execution.with_connection(|conn, id| {
            schema::ensure_table(conn, table, TableKind::Outcome, fields)?;
            schema::insert_row(
                conn,
                table,
                &[(EXECUTION_ID_COLUMN, &id as &dyn ToSql)],
                fields,
            )?;
            Ok(())
        })?;
        tracing::debug!(
            table,
            execution_id = self.execution.id(),
            fields = fields.len(),
            "outcome saved"
        );
        Ok(())
    }

    /// The pending row as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(PendingRow {
            table: &self.table,
            execution_id: self.execution.id(),
            fields: &self.fields,
        })
        .unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for OutcomeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [execution {}]", self.table, self.execution.id())?;
        for field in &self.fields {
            write!(f, " {}={}", field.key, field.value)?;
        }
        Ok(())
    }
}

impl fmt::Debug for OutcomeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutcomeBuilder")
            .field("table", &self.table)
            .field("execution", &self.execution.id())
            .field("fields", &self.fields)
            .field("status", &self.status)
            .finish()
    }
}

impl Drop for OutcomeBuilder {
    fn drop(&mut self) {
        if self.status != Status::Pending {
            return;
        }
        if let Err(err) = self.save() {
            tracing::error!(table = %self.table, %err, "failed to save outcome on drop");
            self.execution.report_finalize_error(err);
        }
    }
}
