//! Runtime schema management. Tables are shaped by the column names observed
//! at insert time: read the current columns, create or extend the table, then
//! insert. Callers hold the manager lock across the whole sequence.

use crate::error::{Result, StoreError};
use crate::value::{Field, FieldType, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params_from_iter, Connection, ToSql};

pub const EXECUTIONS_TABLE: &str = "executions";
pub const PARAMETERS_TABLE: &str = "parameters";
pub const EXECUTION_ID_COLUMN: &str = "execution_id";

const MAX_IDENTIFIER_LEN: usize = 64;
const RESERVED_TABLES: &[&str] = &[EXECUTIONS_TABLE, PARAMETERS_TABLE];
const RESERVED_OUTCOME_COLUMNS: &[&str] = &[EXECUTION_ID_COLUMN, "rowid", "oid", "_rowid_"];
const RESERVED_EXECUTION_COLUMNS: &[&str] = &["id", "rowid", "oid", "_rowid_"];

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

pub(crate) const BOOTSTRAP_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS executions (
      id INTEGER PRIMARY KEY AUTOINCREMENT
    );
    CREATE TABLE IF NOT EXISTS parameters (
      execution_id INTEGER NOT NULL REFERENCES executions(id),
      key TEXT NOT NULL,
      value TEXT NOT NULL,
      PRIMARY KEY (execution_id, key)
    );
"#;

/// Which kind of table a set of fields is headed to. Decides the reserved
/// names and the implicit leading column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableKind {
    Executions,
    Outcome,
}

impl TableKind {
    fn reserved_columns(self) -> &'static [&'static str] {
        match self {
            TableKind::Executions => RESERVED_EXECUTION_COLUMNS,
            TableKind::Outcome => RESERVED_OUTCOME_COLUMNS,
        }
    }

    fn leading_column(self) -> &'static str {
        match self {
            TableKind::Executions => "id INTEGER PRIMARY KEY AUTOINCREMENT",
            TableKind::Outcome => "execution_id INTEGER NOT NULL REFERENCES executions(id)",
        }
    }
}

fn check_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::invalid_identifier(name, "empty identifier"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(StoreError::invalid_identifier(name, "longer than 64 characters"));
    }
    if !IDENTIFIER_RE.is_match(name) {
        return Err(StoreError::invalid_identifier(
            name,
            "only ASCII letters, digits and underscores are allowed, not starting with a digit",
        ));
    }
    if name.len() >= 7 && name[..7].eq_ignore_ascii_case("sqlite_") {
        return Err(StoreError::invalid_identifier(name, "the sqlite_ prefix is reserved"));
    }
    Ok(())
}

pub fn validate_table_name(name: &str) -> Result<()> {
    check_identifier(name)?;
    if RESERVED_TABLES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(StoreError::invalid_identifier(name, "reserved table name"));
    }
    Ok(())
}

pub(crate) fn validate_column_name(kind: TableKind, name: &str) -> Result<()> {
    check_identifier(name)?;
    if kind
        .reserved_columns()
        .iter()
        .any(|r| r.eq_ignore_ascii_case(name))
    {
        return Err(StoreError::invalid_identifier(name, "reserved column name"));
    }
    Ok(())
}

/// Validate `field` and append it unless its key is already present.
pub(crate) fn push_field(kind: TableKind, fields: &mut Vec<Field>, field: Field) -> Result<()> {
    validate_column_name(kind, &field.key)?;
    if fields.iter().any(|f| f.key.eq_ignore_ascii_case(&field.key)) {
        return Err(StoreError::DuplicateField(field.key));
    }
    fields.push(field);
    Ok(())
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

/// Current columns of `table`, empty when the table does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([table], |row| {
        Ok(ColumnInfo {
            name: row.get(0)?,
            declared_type: row.get(1)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Make sure `table` carries a column for every field, creating the table on
/// first use. Existing columns are never dropped or retyped.
pub(crate) fn ensure_table(
    conn: &Connection,
    table: &str,
    kind: TableKind,
    fields: &[Field],
) -> Result<()> {
    let existing = table_columns(conn, table)?;
    if existing.is_empty() {
        let mut columns = vec![kind.leading_column().to_string()];
        columns.extend(
            fields
                .iter()
                .map(|f| format!("{} {}", quote(&f.key), f.field_type().sql_type())),
        );
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(table),
            columns.join(", ")
        ))?;
        tracing::info!(table, columns = fields.len(), "created result table");
        return Ok(());
    }

    for field in fields {
        match existing
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&field.key))
        {
            Some(column) => {
                let declared = FieldType::from_declared(&column.declared_type);
                if declared != field.field_type() {
                    tracing::warn!(
                        table,
                        column = %column.name,
                        declared = declared.sql_type(),
                        supplied = field.field_type().sql_type(),
                        "value type differs from the column type; storing with SQLite affinity"
                    );
                }
            }
            None => {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote(table),
                    quote(&field.key),
                    field.field_type().sql_type()
                ))?;
                tracing::info!(table, column = %field.key, "added column");
            }
        }
    }
    Ok(())
}

/// Insert one row made of `leading` (already-bound implicit columns) followed
/// by `fields`. Returns the new rowid.
pub(crate) fn insert_row(
    conn: &Connection,
    table: &str,
    leading: &[(&str, &dyn ToSql)],
    fields: &[Field],
) -> Result<i64> {
    let names: Vec<String> = leading
        .iter()
        .map(|(name, _)| quote(name))
        .chain(fields.iter().map(|f| quote(&f.key)))
        .collect();
    if names.is_empty() {
        conn.execute(&format!("INSERT INTO {} DEFAULT VALUES", quote(table)), [])?;
        return Ok(conn.last_insert_rowid());
    }
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        names.join(","),
        placeholders.join(",")
    );
    for field in fields {
        if matches!(field.value, Value::Real(r) if r.is_nan()) {
            tracing::warn!(
                table,
                column = %field.key,
                "NaN has no SQLite representation; stored as NULL"
            );
        }
    }
    let values = leading
        .iter()
        .map(|(_, v)| *v)
        .chain(fields.iter().map(|f| &f.value as &dyn ToSql));
    conn.execute(&sql, params_from_iter(values))?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(BOOTSTRAP_SQL).unwrap();
        conn
    }

    #[test]
    fn rejects_unsafe_and_reserved_names() {
        for bad in [
            "",
            "run time",
            "t;DROP TABLE executions",
            "quote\"d",
            "it's",
            "1abc",
            "sqlite_master",
            "executions",
            "PARAMETERS",
        ] {
            assert!(
                matches!(
                    validate_table_name(bad),
                    Err(StoreError::InvalidIdentifier { .. })
                ),
                "{bad:?} accepted"
            );
        }
        assert!(validate_table_name(&"x".repeat(65)).is_err());
        validate_table_name("run_time").unwrap();
        validate_table_name("_scratch2").unwrap();

        assert!(validate_column_name(TableKind::Outcome, "Execution_ID").is_err());
        assert!(validate_column_name(TableKind::Outcome, "rowid").is_err());
        validate_column_name(TableKind::Outcome, "id").unwrap();
        assert!(validate_column_name(TableKind::Executions, "id").is_err());
        validate_column_name(TableKind::Executions, "execution_id").unwrap();
    }

    #[test]
    fn push_field_rejects_case_insensitive_duplicates() {
        let mut fields = Vec::new();
        push_field(TableKind::Outcome, &mut fields, Field::new("a", 1)).unwrap();
        let err = push_field(TableKind::Outcome, &mut fields, Field::new("A", 2)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateField(ref k) if k == "A"));
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn creates_then_extends_tables() {
        let conn = setup_conn();
        let exec_id = insert_row(&conn, EXECUTIONS_TABLE, &[], &[]).unwrap();
        assert!(table_columns(&conn, "run_time").unwrap().is_empty());

        let first = vec![Field::new("a", 1), Field::new("b", "x")];
        ensure_table(&conn, "run_time", TableKind::Outcome, &first).unwrap();
        let cols = table_columns(&conn, "run_time").unwrap();
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["execution_id", "a", "b"]);
        assert_eq!(cols[1].declared_type, "INTEGER");
        assert_eq!(cols[2].declared_type, "TEXT");

        let second = vec![Field::new("a", 2), Field::new("c", 0.5)];
        ensure_table(&conn, "run_time", TableKind::Outcome, &second).unwrap();
        insert_row(
            &conn,
            "run_time",
            &[(EXECUTION_ID_COLUMN, &exec_id as &dyn ToSql)],
            &second,
        )
        .unwrap();
        let cols = table_columns(&conn, "run_time").unwrap();
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["execution_id", "a", "b", "c"]);
        assert_eq!(cols[3].declared_type, "REAL");

        let (b, c): (Option<String>, f64) = conn
            .query_row("SELECT b, c FROM run_time", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(b, None);
        assert_eq!(c, 0.5);
    }

    #[test]
    fn keyword_identifiers_are_quoted() {
        let conn = setup_conn();
        let exec_id = insert_row(&conn, EXECUTIONS_TABLE, &[], &[]).unwrap();
        let fields = vec![Field::new("select", 1), Field::new("group", "g")];
        ensure_table(&conn, "order", TableKind::Outcome, &fields).unwrap();
        let leading = [(EXECUTION_ID_COLUMN, &exec_id as &dyn ToSql)];
        insert_row(&conn, "order", &leading, &fields).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM \"order\"", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn nan_is_stored_as_null() {
        let conn = setup_conn();
        let exec_id = insert_row(&conn, EXECUTIONS_TABLE, &[], &[]).unwrap();
        let fields = vec![Field::new("ratio", f64::NAN), Field::new("ok", 1.5)];
        ensure_table(&conn, "ratios", TableKind::Outcome, &fields).unwrap();
        let leading = [(EXECUTION_ID_COLUMN, &exec_id as &dyn ToSql)];
        insert_row(&conn, "ratios", &leading, &fields).unwrap();
        let (ratio, ok): (Option<f64>, f64) = conn
            .query_row("SELECT ratio, ok FROM ratios", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(ratio, None);
        assert_eq!(ok, 1.5);
    }
}
