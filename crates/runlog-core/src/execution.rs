use crate::database::{Database, Shared};
use crate::error::{Result, StoreError};
use crate::outcome::OutcomeBuilder;
use crate::schema::{self, TableKind, EXECUTIONS_TABLE};
use crate::value::{Field, Value};
use rusqlite::{params, Connection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub(crate) struct ExecutionInner {
    id: i64,
    closed: AtomicBool,
    db: Weak<Shared>,
}

impl ExecutionInner {
    pub(crate) fn id(&self) -> i64 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns whether this call performed the transition.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

/// Handle to one run. Clones share the same execution; the manager keeps it
/// as [`Database::current`] until it is closed.
#[derive(Clone)]
pub struct Execution {
    inner: Arc<ExecutionInner>,
}

impl Execution {
    pub(crate) fn from_inner(inner: Arc<ExecutionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> i64 {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Open, and its manager is still alive and connected.
    pub fn valid(&self) -> bool {
        !self.is_closed()
            && self
                .inner
                .db
                .upgrade()
                .is_some_and(|shared| shared.is_connected())
    }

    /// Insert `(key, value)` pairs into `parameters`, in order, in a single
    /// transaction. A key stored twice for the same execution keeps the last
    /// value.
    pub fn store_parameters<I, K, V>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let pairs: Vec<(K, V)> = pairs.into_iter().collect();
        self.with_connection(|conn, id| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO parameters(execution_id, key, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT(execution_id, key) DO UPDATE SET value = excluded.value",
                )?;
                for (key, value) in &pairs {
                    stmt.execute(params![id, key.as_ref(), value.as_ref()])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;
        tracing::debug!(
            execution_id = self.id(),
            count = pairs.len(),
            "stored parameters"
        );
        Ok(())
    }

    /// Start a result row for `table_name`; the table is created or extended
    /// when the row is saved.
    pub fn add(&self, table_name: &str) -> Result<OutcomeBuilder> {
        if self.is_closed() {
            return Err(StoreError::ClosedExecution(self.id()));
        }
        schema::validate_table_name(table_name)?;
        Ok(OutcomeBuilder::new(self.clone(), table_name))
    }

    /// Terminate this execution. Idempotent; later operations fail with
    /// [`StoreError::ClosedExecution`].
    pub fn close(&self) {
        let closed_now = match self.inner.db.upgrade() {
            Some(shared) => shared.close_execution(&self.inner),
            None => self.inner.mark_closed(),
        };
        if closed_now {
            tracing::debug!(execution_id = self.id(), "execution closed");
        }
    }

    /// Run `f` in the manager's critical section with this execution's id,
    /// re-checking the closed flag once the lock is held.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection, i64) -> Result<T>,
    ) -> Result<T> {
        let id = self.id();
        if self.is_closed() {
            return Err(StoreError::ClosedExecution(id));
        }
        let shared = self
            .inner
            .db
            .upgrade()
            .ok_or(StoreError::ClosedConnection)?;
        shared.with_connection(|conn| {
            if self.is_closed() {
                return Err(StoreError::ClosedExecution(id));
            }
            f(conn, id)
        })
    }

    /// Queue an error from a drop-time finalize on the manager, if it is
    /// still around.
    pub(crate) fn report_finalize_error(&self, err: StoreError) {
        if let Some(shared) = self.inner.db.upgrade() {
            shared.push_finalize_error(err);
        }
    }
}

impl PartialEq for Execution {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum BuilderState {
    Pending,
    Saved(Execution),
    Failed,
}

/// Collects the fact columns of a new execution. The row is written by
/// [`ExecutionBuilder::save`] or, failing that, when the builder is dropped.
pub struct ExecutionBuilder<'db> {
    db: &'db Database,
    fields: Vec<Field>,
    state: BuilderState,
}

impl<'db> ExecutionBuilder<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self {
            db,
            fields: Vec::new(),
            state: BuilderState::Pending,
        }
    }

    pub fn field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        if !matches!(self.state, BuilderState::Pending) {
            return Err(StoreError::AlreadyFinalized);
        }
        schema::push_field(TableKind::Executions, &mut self.fields, Field::new(key, value))?;
        Ok(self)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Insert the execution row and register it as the manager's current
    /// execution. Saving again returns the same execution.
    pub fn save(&mut self) -> Result<Execution> {
        match &self.state {
            BuilderState::Saved(execution) => return Ok(execution.clone()),
            BuilderState::Failed => return Err(StoreError::AlreadyFinalized),
            BuilderState::Pending => {}
        }
        match self.finalize() {
            Ok(execution) => {
                self.state = BuilderState::Saved(execution.clone());
                Ok(execution)
            }
            Err(err) => {
                self.state = BuilderState::Failed;
                Err(err)
            }
        }
    }

    fn finalize(&self) -> Result<Execution> {
        let shared = self.db.shared();
        let fields = &self.fields;
        let id = shared.with_connection(|conn| {
            schema::ensure_table(conn, EXECUTIONS_TABLE, TableKind::Executions, fields)?;
            schema::insert_row(conn, EXECUTIONS_TABLE, &[], fields)
        })?;
        let inner = Arc::new(ExecutionInner {
            id,
            closed: AtomicBool::new(false),
            db: Arc::downgrade(shared),
        });
        shared.register(inner.clone());
        tracing::info!(execution_id = id, fields = fields.len(), "execution created");
        Ok(Execution::from_inner(inner))
    }
}

impl Drop for ExecutionBuilder<'_> {
    fn drop(&mut self) {
        if !matches!(self.state, BuilderState::Pending) {
            return;
        }
        if let Err(err) = self.save() {
            tracing::error!(%err, "failed to save execution on drop");
            self.db.shared().push_finalize_error(err);
        }
    }
}
