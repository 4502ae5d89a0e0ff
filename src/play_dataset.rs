use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use polars::prelude::*;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Transaction, params, params_from_iter};
use tracing::{debug, info};

use crate::error::DatasetError;

pub const ROW_ID: &str = "row_id";

const AUTO_CHUNK_THRESHOLD: usize = 150_000;
const AUTO_CHUNK_SIZE: usize = 25_000;

// Tokens the dataframe reader treats as missing values.
const NULL_TOKENS: &[&str] = &["NA", "N/A", "NULL", "null", "NaN", "nan", "n/a", "#N/A"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum IfExists {
    Replace,
    Append,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Text,
}

impl SqlType {
    pub fn from_dtype(dtype: &DataType) -> Self {
        match dtype {
            DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => SqlType::Integer,
            DataType::Float32 | DataType::Float64 => SqlType::Real,
            _ => SqlType::Text,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
}

/// A CSV file materialised row-major, with one inferred SQL type per column.
#[derive(Debug, Clone, Default)]
pub struct PlayTable {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Value>>,
}

impl PlayTable {
    /// Column lookup follows SQLite's case-insensitive identifier rules.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn remove_column(&mut self, idx: usize) {
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIdOrigin {
    Source,
    Synthesized,
}

impl fmt::Display for RowIdOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowIdOrigin::Source => write!(f, "taken from the source CSV"),
            RowIdOrigin::Synthesized => write!(f, "synthesized from the 1-based CSV row ordinal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    AlreadyPrimaryKey,
    RebuiltPrimaryKey,
    NonUniqueIndex,
}

impl fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::AlreadyPrimaryKey => write!(f, "row_id already the primary key"),
            KeyStrategy::RebuiltPrimaryKey => {
                write!(f, "row_id promoted to INTEGER PRIMARY KEY (table rebuilt)")
            }
            KeyStrategy::NonUniqueIndex => write!(f, "non-unique index on row_id"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub csv_path: PathBuf,
    pub db_path: PathBuf,
    pub table: String,
    pub if_exists: IfExists,
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub db_path: PathBuf,
    pub table: String,
    pub rows_in_table: usize,
    pub rows_inserted: usize,
    pub columns: usize,
    pub row_id_origin: RowIdOrigin,
    pub key_strategy: KeyStrategy,
    pub dropped_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TableColumn {
    pub name: String,
    pub decl_type: String,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy)]
struct WriteOutcome {
    rows_inserted: usize,
    rows_in_table: usize,
    key_strategy: KeyStrategy,
}

pub fn load_csv_into_db(opts: &LoadOptions) -> Result<LoadSummary> {
    let mut table = read_csv_table(&opts.csv_path)?;
    let dropped_columns = drop_index_columns(&mut table);
    for name in &dropped_columns {
        info!(column = %name, "dropped sequential index column");
    }
    let row_id_origin = ensure_row_id(&mut table);

    let chunk_size = opts.chunk_size.or_else(|| {
        (table.len() > AUTO_CHUNK_THRESHOLD).then_some(AUTO_CHUNK_SIZE)
    });

    let mut conn = open_db(&opts.db_path)?;
    let outcome = write_table(&mut conn, &table, &opts.table, opts.if_exists, chunk_size)
        .with_context(|| {
            format!(
                "write table '{}' to {}",
                opts.table,
                opts.db_path.display()
            )
        })?;

    info!(
        table = %opts.table,
        strategy = %outcome.key_strategy,
        "row_id key strategy"
    );

    Ok(LoadSummary {
        db_path: opts.db_path.clone(),
        table: opts.table.clone(),
        rows_in_table: outcome.rows_in_table,
        rows_inserted: outcome.rows_inserted,
        columns: table.columns.len(),
        row_id_origin,
        key_strategy: outcome.key_strategy,
        dropped_columns,
    })
}

pub fn read_csv_table(path: &Path) -> Result<PlayTable> {
    if !path.exists() {
        return Err(DatasetError::MissingInput(path.to_path_buf()).into());
    }
    let null_values = NullValues::AllColumns(NULL_TOKENS.iter().map(|t| (*t).into()).collect());
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(CsvParseOptions::default().with_null_values(Some(null_values)))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("open csv {}", path.display()))?
        .finish()
        .with_context(|| format!("parse csv {}", path.display()))?;
    table_from_frame(&df)
}

fn table_from_frame(df: &DataFrame) -> Result<PlayTable> {
    let height = df.height();
    let mut columns = Vec::with_capacity(df.width());
    let mut rows = vec![Vec::with_capacity(df.width()); height];

    for column in df.get_columns() {
        columns.push(ColumnDef {
            name: column.name().to_string(),
            sql_type: SqlType::from_dtype(column.dtype()),
        });
        for (idx, row) in rows.iter_mut().enumerate() {
            let cell = column
                .get(idx)
                .with_context(|| format!("read row {idx} of column '{}'", column.name()))?;
            row.push(sql_value(cell));
        }
    }

    Ok(PlayTable { columns, rows })
}

fn sql_value(cell: AnyValue<'_>) -> Value {
    match cell {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(v) => Value::Integer(i64::from(v)),
        AnyValue::Int8(v) => Value::Integer(v.into()),
        AnyValue::Int16(v) => Value::Integer(v.into()),
        AnyValue::Int32(v) => Value::Integer(v.into()),
        AnyValue::Int64(v) => Value::Integer(v),
        AnyValue::UInt8(v) => Value::Integer(v.into()),
        AnyValue::UInt16(v) => Value::Integer(v.into()),
        AnyValue::UInt32(v) => Value::Integer(v.into()),
        AnyValue::UInt64(v) => i64::try_from(v)
            .map(Value::Integer)
            .unwrap_or(Value::Real(v as f64)),
        AnyValue::Float32(v) => real_value(v.into()),
        AnyValue::Float64(v) => real_value(v),
        AnyValue::String(v) => Value::Text(v.to_string()),
        AnyValue::StringOwned(v) => Value::Text(v.to_string()),
        other => Value::Text(other.to_string()),
    }
}

fn real_value(v: f64) -> Value {
    if v.is_nan() { Value::Null } else { Value::Real(v) }
}

/// Drops leading-index style columns (`Unnamed: 0` or blank headers) that hold exactly `0..n`.
pub fn drop_index_columns(table: &mut PlayTable) -> Vec<String> {
    let mut dropped = Vec::new();
    let mut idx = 0;
    while idx < table.columns.len() {
        let name = table.columns[idx].name.trim().to_ascii_lowercase();
        let index_like = name.is_empty() || name.starts_with("unnamed");
        let sequential = !table.rows.is_empty()
            && table
                .rows
                .iter()
                .enumerate()
                .all(|(pos, row)| matches!(row[idx], Value::Integer(v) if v == pos as i64));
        if index_like && sequential {
            dropped.push(table.columns[idx].name.clone());
            table.remove_column(idx);
        } else {
            idx += 1;
        }
    }
    dropped
}

pub fn ensure_row_id(table: &mut PlayTable) -> RowIdOrigin {
    if table.column_index(ROW_ID).is_some() {
        return RowIdOrigin::Source;
    }
    table.columns.insert(
        0,
        ColumnDef {
            name: ROW_ID.to_string(),
            sql_type: SqlType::Integer,
        },
    );
    for (pos, row) in table.rows.iter_mut().enumerate() {
        row.insert(0, Value::Integer(pos as i64 + 1));
    }
    RowIdOrigin::Synthesized
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))
}

/// Opens an existing store without creating or writing anything.
pub fn open_db_read_only(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(DatasetError::MissingInput(path.to_path_buf()).into());
    }
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("open sqlite db {} read-only", path.display()))
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .context("query sqlite_master")?;
    Ok(found > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<TableColumn>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
        .context("prepare table_info")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(TableColumn {
                name: row.get(1)?,
                decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })
        .context("query table_info")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode table_info row")?);
    }
    Ok(out)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    let count = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("count rows in '{table}'"))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn write_table(
    conn: &mut Connection,
    table: &PlayTable,
    name: &str,
    if_exists: IfExists,
    chunk_size: Option<usize>,
) -> Result<WriteOutcome> {
    if name.trim().is_empty() {
        return Err(DatasetError::EmptyTableName.into());
    }
    let exists = table_exists(conn, name)?;
    if exists && if_exists == IfExists::Fail {
        return Err(DatasetError::TableExists {
            table: name.to_string(),
        }
        .into());
    }

    let tx = conn.transaction().context("begin load transaction")?;
    let created = match (exists, if_exists) {
        (true, IfExists::Append) => {
            prepare_append(&tx, name, &table.columns)?;
            false
        }
        (true, _) => {
            tx.execute_batch(&format!("DROP TABLE {}", quote_ident(name)))
                .context("drop existing table")?;
            create_table(&tx, name, &table.columns)?;
            true
        }
        (false, _) => {
            create_table(&tx, name, &table.columns)?;
            true
        }
    };

    let rows_inserted = insert_rows(&tx, name, table, chunk_size)?;
    let key_strategy = if created {
        promote_row_id(&tx, name)?
    } else {
        create_row_id_index(&tx, name)?;
        KeyStrategy::NonUniqueIndex
    };
    let rows_in_table = count_rows(&tx, name)?;
    tx.commit().context("commit load transaction")?;

    Ok(WriteOutcome {
        rows_inserted,
        rows_in_table,
        key_strategy,
    })
}

fn create_table(tx: &Transaction<'_>, name: &str, columns: &[ColumnDef]) -> Result<()> {
    let defs = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.sql_type.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");
    tx.execute_batch(&format!("CREATE TABLE {} ({defs})", quote_ident(name)))
        .with_context(|| format!("create table '{name}'"))
}

fn prepare_append(tx: &Transaction<'_>, name: &str, columns: &[ColumnDef]) -> Result<()> {
    let existing = table_columns(tx, name)?;
    for column in columns {
        if !existing
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(&column.name))
        {
            return Err(DatasetError::SchemaMismatch {
                table: name.to_string(),
                column: column.name.clone(),
            }
            .into());
        }
    }
    // Appended ids may collide with existing ones, so the key cannot stay unique.
    if existing
        .iter()
        .any(|c| c.name.eq_ignore_ascii_case(ROW_ID) && c.primary_key)
    {
        rebuild_table(tx, name, &existing, false)?;
        info!(table = name, "row_id demoted from primary key before append");
    }
    Ok(())
}

fn insert_rows(
    tx: &Transaction<'_>,
    name: &str,
    table: &PlayTable,
    chunk_size: Option<usize>,
) -> Result<usize> {
    let column_list = table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=table.columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = tx
        .prepare(&format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
            quote_ident(name)
        ))
        .context("prepare insert")?;

    let chunk = chunk_size
        .filter(|n| *n > 0)
        .unwrap_or_else(|| table.len().max(1));
    let mut inserted = 0usize;
    for (chunk_idx, rows) in table.rows.chunks(chunk).enumerate() {
        for row in rows {
            stmt.execute(params_from_iter(row.iter()))
                .with_context(|| format!("insert row {}", inserted + 1))?;
            inserted += 1;
        }
        debug!(chunk = chunk_idx + 1, rows = inserted, "inserted chunk");
    }
    Ok(inserted)
}

fn promote_row_id(tx: &Transaction<'_>, name: &str) -> Result<KeyStrategy> {
    let columns = table_columns(tx, name)?;
    let Some(row_id) = columns.iter().find(|c| c.name.eq_ignore_ascii_case(ROW_ID)) else {
        return Err(anyhow!("table '{name}' has no {ROW_ID} column"));
    };
    if row_id.primary_key {
        return Ok(KeyStrategy::AlreadyPrimaryKey);
    }

    let (total, distinct, integers) = tx
        .query_row(
            &format!(
                "SELECT COUNT(*), COUNT(DISTINCT {id}), SUM(typeof({id}) = 'integer') FROM {}",
                quote_ident(name),
                id = quote_ident(ROW_ID)
            ),
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                ))
            },
        )
        .context("inspect row_id values")?;

    if total == distinct && total == integers {
        rebuild_table(tx, name, &columns, true)?;
        Ok(KeyStrategy::RebuiltPrimaryKey)
    } else {
        debug!(total, distinct, integers, "row_id not unique integers");
        create_row_id_index(tx, name)?;
        Ok(KeyStrategy::NonUniqueIndex)
    }
}

fn rebuild_table(
    tx: &Transaction<'_>,
    name: &str,
    columns: &[TableColumn],
    row_id_primary_key: bool,
) -> Result<()> {
    let tmp = quote_ident(&format!("{name}__tmp_rebuild"));
    let target = quote_ident(name);
    let defs = columns
        .iter()
        .map(|c| {
            if c.name.eq_ignore_ascii_case(ROW_ID) {
                let kind = if row_id_primary_key {
                    "INTEGER PRIMARY KEY"
                } else {
                    "INTEGER"
                };
                format!("{} {kind}", quote_ident(&c.name))
            } else if c.decl_type.is_empty() {
                format!("{} TEXT", quote_ident(&c.name))
            } else {
                format!("{} {}", quote_ident(&c.name), c.decl_type)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let column_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    tx.execute_batch(&format!(
        "CREATE TABLE {tmp} ({defs});
         INSERT INTO {tmp} ({column_list}) SELECT {column_list} FROM {target};
         DROP TABLE {target};
         ALTER TABLE {tmp} RENAME TO {target};"
    ))
    .with_context(|| format!("rebuild table '{name}'"))
}

fn create_row_id_index(tx: &Transaction<'_>, name: &str) -> Result<()> {
    tx.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&format!("idx_{name}_row_id")),
        quote_ident(name),
        quote_ident(ROW_ID)
    ))
    .context("create row_id index")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(names: &[&str], rows: Vec<Vec<Value>>) -> PlayTable {
        PlayTable {
            columns: names
                .iter()
                .map(|n| ColumnDef {
                    name: (*n).to_string(),
                    sql_type: SqlType::Integer,
                })
                .collect(),
            rows,
        }
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("desc"), "\"desc\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn sequential_unnamed_column_is_dropped() {
        let mut t = table(
            &["Unnamed: 0", "play_id"],
            vec![
                vec![Value::Integer(0), Value::Integer(10)],
                vec![Value::Integer(1), Value::Integer(11)],
            ],
        );
        assert_eq!(drop_index_columns(&mut t), vec!["Unnamed: 0".to_string()]);
        assert_eq!(t.columns.len(), 1);
        assert_eq!(t.rows[1], vec![Value::Integer(11)]);
    }

    #[test]
    fn non_sequential_unnamed_column_is_kept() {
        let mut t = table(
            &["Unnamed: 0"],
            vec![vec![Value::Integer(5)], vec![Value::Integer(9)]],
        );
        assert!(drop_index_columns(&mut t).is_empty());
        assert_eq!(t.columns.len(), 1);
    }

    #[test]
    fn header_only_unnamed_column_is_kept() {
        let mut t = table(&["Unnamed: 0", "play_id"], Vec::new());
        assert!(drop_index_columns(&mut t).is_empty());
        assert_eq!(t.columns.len(), 2);
    }

    #[test]
    fn row_id_is_synthesized_one_based() {
        let mut t = table(
            &["play_id"],
            vec![vec![Value::Integer(40)], vec![Value::Integer(55)]],
        );
        assert_eq!(ensure_row_id(&mut t), RowIdOrigin::Synthesized);
        assert_eq!(t.columns[0].name, ROW_ID);
        assert_eq!(t.rows[0][0], Value::Integer(1));
        assert_eq!(t.rows[1][0], Value::Integer(2));
    }

    #[test]
    fn existing_row_id_is_left_alone() {
        let mut t = table(&["row_id"], vec![vec![Value::Integer(7)]]);
        assert_eq!(ensure_row_id(&mut t), RowIdOrigin::Source);
        assert_eq!(t.rows[0], vec![Value::Integer(7)]);
    }

    #[test]
    fn upper_case_row_id_counts_as_present() {
        let mut t = table(
            &["ROW_ID", "play_id"],
            vec![vec![Value::Integer(3), Value::Integer(8)]],
        );
        assert_eq!(ensure_row_id(&mut t), RowIdOrigin::Source);
        assert_eq!(t.columns.len(), 2);

        let mut conn = Connection::open_in_memory().unwrap();
        let outcome = write_table(&mut conn, &t, "plays", IfExists::Replace, None).unwrap();
        assert_eq!(outcome.key_strategy, KeyStrategy::RebuiltPrimaryKey);
        assert_eq!(outcome.rows_in_table, 1);
    }

    #[test]
    fn table_lookup_ignores_case() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE plays (row_id INTEGER)").unwrap();
        assert!(table_exists(&conn, "PLAYS").unwrap());
        assert!(!table_exists(&conn, "drives").unwrap());
    }

    #[test]
    fn nan_floats_become_null() {
        assert_eq!(sql_value(AnyValue::Float64(f64::NAN)), Value::Null);
        assert_eq!(sql_value(AnyValue::Float64(0.25)), Value::Real(0.25));
        assert_eq!(sql_value(AnyValue::Boolean(true)), Value::Integer(1));
        assert_eq!(
            sql_value(AnyValue::String("BAL")),
            Value::Text("BAL".to_string())
        );
    }

    #[test]
    fn append_onto_primary_key_table_keeps_duplicates() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut t = table(&["play_id"], vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        ensure_row_id(&mut t);

        let first = write_table(&mut conn, &t, "plays", IfExists::Replace, None).unwrap();
        assert_eq!(first.key_strategy, KeyStrategy::RebuiltPrimaryKey);

        let second = write_table(&mut conn, &t, "plays", IfExists::Append, Some(1)).unwrap();
        assert_eq!(second.key_strategy, KeyStrategy::NonUniqueIndex);
        assert_eq!(second.rows_in_table, 4);

        let cols = table_columns(&conn, "plays").unwrap();
        assert!(cols.iter().all(|c| !c.primary_key));
    }
}
