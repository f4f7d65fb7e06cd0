use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::execution::{Execution, ExecutionBuilder, ExecutionInner};
use crate::outcome::OutcomeBuilder;
use crate::schema::BOOTSTRAP_SQL;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Connection manager for one store file.
///
/// ```no_run
/// use runlog_core::Database;
///
/// # fn main() -> runlog_core::Result<()> {
/// let db = Database::open("results.sqlite3")?;
/// let execution = db.create_execution().field("algorithm", "btree")?.save()?;
/// execution.store_parameters([("block_size", "32"), ("leaf_size", "64")])?;
/// execution.add("experiment_aging")?.field("completion_time", 32)?.save()?;
/// execution.close();
/// # Ok(())
/// # }
/// ```
///
/// The store forms a star: `executions` is the fact table, `parameters` holds
/// key/value pairs per execution, and every other table holds outcome rows
/// referencing `executions(id)`.
pub struct Database {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    path: PathBuf,
    config: StoreConfig,
    state: Mutex<State>,
    finalize_errors: Mutex<Vec<StoreError>>,
}

struct State {
    open: bool,
    keep_alive: bool,
    bootstrapped: bool,
    conn: Option<Connection>,
    executions: Vec<Arc<ExecutionInner>>,
}

fn configure(path: &Path, config: &StoreConfig) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    let mode: String = conn.pragma_update_and_check(
        None,
        "journal_mode",
        config.journal_mode.as_pragma(),
        |row| row.get(0),
    )?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "store connection configured");
    conn.pragma_update(None, "synchronous", config.synchronous.as_pragma())?;
    conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
    if let Some(pages) = config.cache_pages {
        conn.pragma_update(None, "cache_size", pages)?;
    }
    Ok(conn)
}

fn release(path: &Path, conn: Connection) {
    if let Err((_, err)) = conn.close() {
        tracing::warn!(path = %path.display(), %err, "failed to close store connection cleanly");
    }
}

impl Shared {
    fn open_connection(&self, bootstrapped: &mut bool) -> Result<Connection> {
        let wrap = |source| StoreError::Connection {
            path: self.path.clone(),
            source,
        };
        let conn = configure(&self.path, &self.config).map_err(wrap)?;
        if !*bootstrapped {
            conn.execute_batch(BOOTSTRAP_SQL).map_err(wrap)?;
            *bootstrapped = true;
        }
        Ok(conn)
    }

    /// Run `f` inside the manager's critical section. With keep-alive off the
    /// connection only lives for the duration of `f`.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(StoreError::ClosedConnection);
        }
        if !state.keep_alive {
            let mut conn = self.open_connection(&mut state.bootstrapped)?;
            let out = f(&mut conn);
            release(&self.path, conn);
            return out;
        }
        if state.conn.is_none() {
            let conn = self.open_connection(&mut state.bootstrapped)?;
            state.conn = Some(conn);
        }
        match state.conn.as_mut() {
            Some(conn) => f(conn),
            None => Err(StoreError::ClosedConnection),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().open
    }

    pub(crate) fn register(&self, execution: Arc<ExecutionInner>) {
        self.state.lock().executions.push(execution);
    }

    /// Mark `execution` closed and forget it, under the same lock writers use.
    pub(crate) fn close_execution(&self, execution: &ExecutionInner) -> bool {
        let mut state = self.state.lock();
        let was_open = execution.mark_closed();
        state.executions.retain(|e| e.id() != execution.id());
        was_open
    }

    pub(crate) fn push_finalize_error(&self, err: StoreError) {
        self.finalize_errors.lock().push(err);
    }
}

impl Database {
    /// Open the store at `path` with settings from the environment.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::from_env())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let keep_alive = config.keep_alive;
        let db = Self {
            shared: Arc::new(Shared {
                path: path.as_ref().to_path_buf(),
                config,
                state: Mutex::new(State {
                    open: false,
                    keep_alive,
                    bootstrapped: false,
                    conn: None,
                    executions: Vec::new(),
                }),
                finalize_errors: Mutex::new(Vec::new()),
            }),
        };
        db.connect()?;
        Ok(db)
    }

    /// Open the connection. A no-op when already connected.
    pub fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.open {
            return Ok(());
        }
        let conn = shared.open_connection(&mut state.bootstrapped)?;
        if state.keep_alive {
            state.conn = Some(conn);
        } else {
            release(&shared.path, conn);
        }
        state.open = true;
        tracing::info!(
            path = %shared.path.display(),
            keep_alive = state.keep_alive,
            "store connected"
        );
        Ok(())
    }

    /// Close the connection. Executions created from this manager fail with
    /// [`StoreError::ClosedConnection`] until [`Database::connect`] is called
    /// again.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.open {
            return;
        }
        state.open = false;
        if let Some(conn) = state.conn.take() {
            release(&self.shared.path, conn);
        }
        tracing::info!(path = %self.shared.path.display(), "store closed");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub fn is_keep_alive(&self) -> bool {
        self.shared.state.lock().keep_alive
    }

    /// Switching keep-alive off releases the held handle right away; switching
    /// it on reopens lazily at the next operation.
    pub fn set_keep_alive(&self, value: bool) {
        let mut state = self.shared.state.lock();
        state.keep_alive = value;
        if !value {
            if let Some(conn) = state.conn.take() {
                release(&self.shared.path, conn);
            }
        }
    }

    pub fn create_execution(&self) -> ExecutionBuilder<'_> {
        ExecutionBuilder::new(self)
    }

    /// The most recently created execution that is still open.
    ///
    /// Open executions stay registered until [`Execution::close`] is called,
    /// and this scans all of them; harnesses that create many runs through
    /// one manager should close each run when it is done.
    pub fn current(&self) -> Option<Execution> {
        let state = self.shared.state.lock();
        state
            .executions
            .iter()
            .filter(|e| !e.is_closed())
            .max_by_key(|e| e.id())
            .map(|inner| Execution::from_inner(inner.clone()))
    }

    /// Store parameters against [`Database::current`].
    pub fn store_parameters<I, K, V>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.current()
            .ok_or(StoreError::NoCurrentExecution)?
            .store_parameters(pairs)
    }

    /// Start an outcome row for [`Database::current`].
    pub fn add(&self, table_name: &str) -> Result<OutcomeBuilder> {
        self.current()
            .ok_or(StoreError::NoCurrentExecution)?
            .add(table_name)
    }

    /// Drain the errors raised by builders that were finalized on drop.
    pub fn take_finalize_errors(&self) -> Vec<StoreError> {
        std::mem::take(&mut *self.shared.finalize_errors.lock())
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.shared.path)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalMode;

    fn temp_config(keep_alive: bool) -> StoreConfig {
        StoreConfig {
            keep_alive,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn open_bootstraps_fixed_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.sqlite3");
        let db = Database::open_with_config(&path, temp_config(true)).unwrap();
        assert!(db.is_connected());
        let tables: Vec<String> = db
            .shared()
            .with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |r| r.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(names)
            })
            .unwrap();
        assert_eq!(tables, ["executions", "parameters"]);
    }

    #[test]
    fn connect_and_close_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with_config(dir.path().join("a.db"), temp_config(true)).unwrap();
        db.connect().unwrap();
        db.close();
        db.close();
        assert!(!db.is_connected());
        assert!(matches!(
            db.shared().with_connection(|_| Ok(())),
            Err(StoreError::ClosedConnection)
        ));
        db.connect().unwrap();
        db.shared().with_connection(|_| Ok(())).unwrap();
    }

    #[test]
    fn incompatible_file_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-db.sqlite3");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        let err = Database::open_with_config(&path, temp_config(true)).unwrap_err();
        assert!(matches!(err, StoreError::Connection { .. }), "{err:?}");

        let missing_dir = dir.path().join("missing").join("x.db");
        let err = Database::open_with_config(&missing_dir, temp_config(false)).unwrap_err();
        assert!(matches!(err, StoreError::Connection { .. }), "{err:?}");
    }

    #[test]
    fn pragmas_follow_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            cache_pages: Some(-2048),
            ..StoreConfig::default()
        };
        let db = Database::open_with_config(dir.path().join("p.db"), config).unwrap();
        let (mode, fk, cache): (String, i64, i64) = db
            .shared()
            .with_connection(|conn| {
                let mode = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
                let fk = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?;
                let cache = conn.query_row("PRAGMA cache_size", [], |r| r.get(0))?;
                Ok((mode, fk, cache))
            })
            .unwrap();
        assert_eq!(mode, "wal");
        assert_eq!(fk, 1);
        assert_eq!(cache, -2048);
    }

    #[test]
    fn keep_alive_off_reopens_per_operation() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            keep_alive: false,
            journal_mode: JournalMode::Delete,
            ..StoreConfig::default()
        };
        let db = Database::open_with_config(dir.path().join("idle.db"), config).unwrap();
        assert!(!db.is_keep_alive());
        assert!(db.shared().state.lock().conn.is_none());
        db.shared()
            .with_connection(|conn| {
                conn.execute("INSERT INTO executions DEFAULT VALUES", [])?;
                Ok(())
            })
            .unwrap();
        assert!(db.shared().state.lock().conn.is_none());

        db.set_keep_alive(true);
        db.shared().with_connection(|_| Ok(())).unwrap();
        assert!(db.shared().state.lock().conn.is_some());
        db.set_keep_alive(false);
        assert!(db.shared().state.lock().conn.is_none());
    }
}
