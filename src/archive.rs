// used for persistence
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, Rows, params, params_from_iter};

// used to timestamp history entries
use chrono::Utc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::compile::{CompiledPredicate, Order};
use crate::error::{RepoError, Result};
use crate::schema::{Column, Kind, Table, VERSION, join_list, split_list};

// ------------- Value -------------
/// One field of a record as it comes out of the archive.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    List(Vec<String>),
}

impl Value {
    fn from_sql(value: ValueRef, kind: Kind) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            // text that is not valid UTF-8 keeps going, with U+FFFD in place of the bad bytes
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                match kind {
                    Kind::List => Value::List(split_list(&text)),
                    _ => Value::Text(text.into_owned()),
                }
            }
        }
    }
    /// Display form: lists are joined with spaces, null is empty.
    pub fn format(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Integer(i) => Cow::Owned(i.to_string()),
            Value::Real(r) => Cow::Owned(r.to_string()),
            Value::Text(t) => Cow::Borrowed(t),
            Value::List(items) => Cow::Owned(items.join(" ")),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Real(r) => serializer.serialize_f64(*r),
            Value::Text(t) => serializer.serialize_str(t),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

// ------------- Record -------------
/// One row: the selected column names (shared by every row of a cursor) and their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }
}

// serialized as an object with the columns in selection order
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

// ------------- Cursor -------------
/// Forward-only walk over the rows of one select. Nothing is read ahead.
pub struct Cursor<'stmt> {
    rows: Rows<'stmt>,
    columns: Arc<[String]>,
    kinds: Vec<Kind>,
}

impl Cursor<'_> {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Record>;
    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(err) => return Some(Err(err.into())),
        };
        let mut values = Vec::with_capacity(self.kinds.len());
        for (i, kind) in self.kinds.iter().enumerate() {
            match row.get_ref(i) {
                Ok(value) => values.push(Value::from_sql(value, *kind)),
                Err(err) => return Some(Err(err.into())),
            }
        }
        Some(Ok(Record::new(Arc::clone(&self.columns), values)))
    }
}

// ------------- Selection -------------
/// What to read from a table: predicate, columns, sort and paging.
#[derive(Debug, Clone)]
pub struct Selection {
    pub predicate: CompiledPredicate,
    pub columns: Vec<&'static Column>,
    pub sort: Vec<(&'static Column, Order)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Selection {
    /// Every column of every row, by key.
    pub fn all(table: Table) -> Self {
        Self {
            predicate: CompiledPredicate::all(),
            columns: table.columns().iter().collect(),
            sort: vec![(table.key(), Order::Asc)],
            limit: None,
            offset: None,
        }
    }
    pub fn to_sql(&self, table: Table) -> String {
        let columns: Vec<&str> = self.columns.iter().map(|c| c.name()).collect();
        let mut sql = format!(
            "select {} from {} where {}",
            columns.join(", "),
            table.name(),
            self.predicate.expression()
        );
        if !self.sort.is_empty() {
            let sort: Vec<String> = self
                .sort
                .iter()
                .map(|(c, o)| format!("{} {}", c.name(), o.as_sql()))
                .collect();
            sql.push_str(" order by ");
            sql.push_str(&sort.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" limit {limit} offset {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" limit {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" limit -1 offset {offset}")),
            (None, None) => (),
        }
        sql
    }
}

// ------------- History -------------
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Unix time in seconds.
    pub time: f64,
    pub event: String,
}

impl HistoryEntry {
    pub fn format_time(&self) -> String {
        let micros = (self.time * 1e6) as i64;
        match chrono::DateTime::from_timestamp_micros(micros) {
            Some(t) => t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            None => self.time.to_string(),
        }
    }
}

// ------------- Migrations -------------
struct Migration {
    from: &'static str,
    to: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[Migration {
    from: "5.0",
    to: "5.1",
    apply: history_to_table,
}];

// 5.0 kept the history as a JSON list of [time, event] pairs in SETTINGS
fn history_to_table(db: &Connection) -> Result<()> {
    db.execute_batch(HISTORY_TABLE)?;
    let stored: Option<String> = db
        .query_row(
            "select SVALUE from SETTINGS where SETTING = 'HISTORY'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(stored) = stored {
        let events: Vec<(f64, String)> = serde_json::from_str(&stored)?;
        let mut insert = db.prepare("insert into HISTORY (TIME, EVENT) values (?, ?)")?;
        for (time, event) in events {
            insert.execute(params![time, event])?;
        }
        db.execute("delete from SETTINGS where SETTING = 'HISTORY'", [])?;
    }
    Ok(())
}

const SETTINGS_TABLE: &str = "
    create table if not exists SETTINGS (
        SETTING text not null,
        SVALUE text,
        constraint referenceable_SETTING primary key (
            SETTING
        )
    );";

const HISTORY_TABLE: &str = "
    create table if not exists HISTORY (
        TIME real not null,
        EVENT text not null
    );";

fn table_ddl(table: Table, schema: &str) -> String {
    let columns: Vec<String> = table
        .columns()
        .iter()
        .map(|c| match c.kind() {
            Kind::Integer => format!("{} integer not null default 0", c.name()),
            Kind::Text | Kind::List => format!("{} text not null default ''", c.name()),
        })
        .collect();
    format!(
        "create table if not exists {schema}.{name} (\n    {columns},\n    constraint referenceable_{key} primary key ({key})\n);",
        name = table.name(),
        columns = columns.join(",\n    "),
        key = table.key().name()
    )
}

fn create_schema(db: &Connection, schema: &str) -> Result<()> {
    let mut batch = String::new();
    batch.push_str(&SETTINGS_TABLE.replace("SETTINGS", &format!("{schema}.SETTINGS")));
    batch.push_str(&HISTORY_TABLE.replace("HISTORY", &format!("{schema}.HISTORY")));
    for table in Table::ALL {
        batch.push_str(&table_ddl(table, schema));
    }
    db.execute_batch(&batch)?;
    db.execute(
        &format!("insert or ignore into {schema}.SETTINGS (SETTING, SVALUE) values ('VERSION', ?)"),
        params![VERSION],
    )?;
    Ok(())
}

/// Which way records flow between two archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// From this archive into the other one.
    Copy,
    /// From the other archive into this one.
    Merge,
}

// ------------- Archive -------------
/// An open archive file. The connection stays open for the life of the value
/// and any pending transaction is committed when it is closed or dropped.
pub struct Archive {
    path: PathBuf,
    db: Connection,
}

impl Archive {
    /// Opens the archive at `path`, creating an empty one if there is none.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)?;
        let archive = Self { path: path.to_path_buf(), db };
        archive.initialise()?;
        Ok(archive)
    }
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        let archive = Self { path: PathBuf::from(":memory:"), db };
        archive.initialise()?;
        Ok(archive)
    }
    // only brand new files get the schema; existing ones are left to upgrade()
    fn initialise(&self) -> Result<()> {
        if !self.has_table("SETTINGS")? {
            debug!(path = %self.path.display(), "creating archive");
            create_schema(&self.db, "main")?;
        }
        Ok(())
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn connection(&self) -> &Connection {
        &self.db
    }
    pub fn has_table(&self, name: &str) -> Result<bool> {
        let found = self
            .db
            .prepare_cached("select 1 from sqlite_master where type = 'table' and name = ?")?
            .exists(params![name])?;
        Ok(found)
    }
    /// The stored schema version, if the archive has one.
    pub fn version(&self) -> Result<Option<String>> {
        if !self.has_table("SETTINGS")? {
            return Ok(None);
        }
        let version = self
            .db
            .query_row(
                "select SVALUE from SETTINGS where SETTING = 'VERSION'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(version)
    }
    /// Size of the archive file in bytes; zero when in memory.
    pub fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    // ------------- Reading -------------
    /// Runs `selection` against `table` and hands the live cursor to `consume`.
    pub fn select<T, F>(&self, table: Table, selection: &Selection, consume: F) -> Result<T>
    where
        F: FnOnce(&mut Cursor<'_>) -> Result<T>,
    {
        let sql = selection.to_sql(table);
        debug!(%sql, values = ?selection.predicate.values(), "select");
        let mut statement = self.db.prepare(&sql)?;
        let columns: Arc<[String]> = selection.columns.iter().map(|c| c.name().to_string()).collect();
        let kinds = selection.columns.iter().map(|c| c.kind()).collect();
        let rows = statement.query(params_from_iter(selection.predicate.values()))?;
        let mut cursor = Cursor { rows, columns, kinds };
        consume(&mut cursor)
    }
    pub fn count(&self, table: Table) -> Result<u64> {
        let count: i64 = self
            .db
            .query_row(&format!("select count(*) from {}", table.name()), [], |r| r.get(0))?;
        Ok(count.unsigned_abs())
    }
    pub fn contains(&self, table: Table, key: &str) -> Result<bool> {
        let sql = format!("select 1 from {} where {} = ?", table.name(), table.key().name());
        Ok(self.db.prepare_cached(&sql)?.exists(params![key])?)
    }
    /// Every column of the entry with the given key.
    pub fn get(&self, table: Table, key: &str) -> Result<Option<Record>> {
        let mut selection = Selection::all(table);
        selection.predicate = CompiledPredicate::equals(table.key(), key);
        self.select(table, &selection, |cursor| cursor.next().transpose())
    }

    // ------------- Writing -------------
    /// Inserts one entry; `replace` overwrites an entry with the same key.
    pub fn insert(&self, table: Table, entry: &[(&'static Column, SqlValue)], replace: bool) -> Result<()> {
        let names: Vec<&str> = entry.iter().map(|(c, _)| c.name()).collect();
        let placeholders = vec!["?"; entry.len()].join(", ");
        let verb = if replace { "insert or replace" } else { "insert" };
        let sql = format!("{verb} into {} ({}) values ({placeholders})", table.name(), names.join(", "));
        self.db
            .prepare_cached(&sql)?
            .execute(params_from_iter(entry.iter().map(|(_, v)| v)))?;
        info!(table = %table, replace, "inserted entry");
        Ok(())
    }
    /// Updates the given columns of one entry; returns whether it existed.
    pub fn update(&self, table: Table, key: &str, fields: &[(&'static Column, SqlValue)]) -> Result<bool> {
        if fields.is_empty() {
            return Ok(self.contains(table, key)?);
        }
        let assignments: Vec<String> = fields.iter().map(|(c, _)| format!("{} = ?", c.name())).collect();
        let sql = format!(
            "update {} set {} where {} = ?",
            table.name(),
            assignments.join(", "),
            table.key().name()
        );
        let mut values: Vec<&SqlValue> = fields.iter().map(|(_, v)| v).collect();
        let key = SqlValue::Text(key.to_string());
        values.push(&key);
        let changed = self.db.prepare_cached(&sql)?.execute(params_from_iter(values))?;
        info!(table = %table, changed, "updated entry");
        Ok(changed > 0)
    }
    /// Deletes one entry; returns whether it existed.
    pub fn delete(&self, table: Table, key: &str) -> Result<bool> {
        let sql = format!("delete from {} where {} = ?", table.name(), table.key().name());
        let deleted = self.db.prepare_cached(&sql)?.execute(params![key])?;
        info!(table = %table, key, deleted, "deleted entry");
        Ok(deleted > 0)
    }
    /// Runs `work` in a transaction that is committed only if it succeeds.
    pub fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Archive) -> Result<T>,
    {
        let tx = self.db.unchecked_transaction()?;
        let out = work(self)?;
        tx.commit()?;
        Ok(out)
    }
    pub fn vacuum(&self) -> Result<()> {
        self.db.execute_batch("vacuum")?;
        Ok(())
    }

    // ------------- History -------------
    /// Appends an event stamped with the current time. Outside a transaction
    /// the row is committed as soon as this returns.
    pub fn append_history(&self, event: &str) -> Result<()> {
        let time = Utc::now().timestamp_micros() as f64 / 1e6;
        self.db
            .prepare_cached("insert into HISTORY (TIME, EVENT) values (?, ?)")?
            .execute(params![time, event])?;
        debug!(time, event, "history");
        Ok(())
    }
    /// History entries in chronological order whose event contains `filter`, ignoring case.
    pub fn history(&self, filter: Option<&str>) -> Result<Vec<HistoryEntry>> {
        let filter = filter.map(str::to_lowercase);
        let mut statement = self.db.prepare_cached("select TIME, EVENT from HISTORY order by TIME")?;
        let entries = statement.query_map([], |row| {
            Ok(HistoryEntry { time: row.get(0)?, event: row.get(1)? })
        })?;
        let mut kept = Vec::new();
        for entry in entries {
            let entry = entry?;
            if filter.as_ref().is_none_or(|f| entry.event.to_lowercase().contains(f.as_str())) {
                kept.push(entry);
            }
        }
        Ok(kept)
    }
    pub fn last_history(&self) -> Result<Option<HistoryEntry>> {
        let entry = self
            .db
            .query_row(
                "select TIME, EVENT from HISTORY order by TIME desc limit 1",
                [],
                |row| Ok(HistoryEntry { time: row.get(0)?, event: row.get(1)? }),
            )
            .optional()?;
        Ok(entry)
    }
    pub fn delete_history(&self, entry: &HistoryEntry) -> Result<bool> {
        let deleted = self
            .db
            .prepare_cached("delete from HISTORY where TIME = ? and EVENT = ?")?
            .execute(params![entry.time, entry.event])?;
        Ok(deleted > 0)
    }

    // ------------- Transfer -------------
    /// Copies or merges the selected records between this archive and the one at `other`.
    ///
    /// Returns the number of rows written per table. A missing destination file
    /// is created on copy; the other archive must be at the current version.
    pub fn transfer(
        &self,
        other: &Path,
        direction: Transfer,
        selections: &[(Table, CompiledPredicate)],
        replace: bool,
    ) -> Result<Vec<(Table, usize)>> {
        self.db.execute("attach database ? as other", params![other.to_string_lossy().into_owned()])?;
        let result = self.transfer_attached(direction, selections, replace);
        // detach even when the transfer failed
        let detached = self.db.execute_batch("detach database other");
        let written = result?;
        detached?;
        Ok(written)
    }
    fn transfer_attached(
        &self,
        direction: Transfer,
        selections: &[(Table, CompiledPredicate)],
        replace: bool,
    ) -> Result<Vec<(Table, usize)>> {
        let has_settings = self
            .db
            .prepare("select 1 from other.sqlite_master where type = 'table' and name = 'SETTINGS'")?
            .exists([])?;
        if !has_settings {
            if direction == Transfer::Merge {
                return Err(RepoError::VersionMismatch {
                    found: "none".to_string(),
                    expected: VERSION.to_string(),
                });
            }
            create_schema(&self.db, "other")?;
        }
        let version: Option<String> = self
            .db
            .query_row(
                "select SVALUE from other.SETTINGS where SETTING = 'VERSION'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        if version.as_deref() != Some(VERSION) {
            return Err(RepoError::VersionMismatch {
                found: version.unwrap_or_else(|| "none".to_string()),
                expected: VERSION.to_string(),
            });
        }
        let (from, to) = match direction {
            Transfer::Copy => ("main", "other"),
            Transfer::Merge => ("other", "main"),
        };
        let verb = if replace { "insert or replace" } else { "insert or ignore" };
        self.transaction(|archive| {
            let mut written = Vec::new();
            for (table, predicate) in selections {
                let columns: Vec<&str> = table.columns().iter().map(|c| c.name()).collect();
                let columns = columns.join(", ");
                let sql = format!(
                    "{verb} into {to}.{name} ({columns}) select {columns} from {from}.{name} where {}",
                    predicate.expression(),
                    name = table.name()
                );
                debug!(%sql, values = ?predicate.values(), "transfer");
                let rows = archive.db.execute(&sql, params_from_iter(predicate.values()))?;
                info!(table = %table, rows, ?direction, "transferred");
                written.push((*table, rows));
            }
            Ok(written)
        })
    }

    // ------------- Upgrade -------------
    /// Walks the migration chain up to [`VERSION`].
    ///
    /// Returns the version the archive started from, or `None` if it was
    /// already current. Archives from a newer or unknown version are refused.
    pub fn upgrade(&self) -> Result<Option<String>> {
        let start = self.version()?.unwrap_or_else(|| "none".to_string());
        if start == VERSION {
            return Ok(None);
        }
        let mut current = start.clone();
        self.transaction(|archive| {
            while current != VERSION {
                let step = MIGRATIONS.iter().find(|m| m.from == current).ok_or_else(|| {
                    RepoError::VersionMismatch {
                        found: current.clone(),
                        expected: VERSION.to_string(),
                    }
                })?;
                info!(from = step.from, to = step.to, "migrating");
                (step.apply)(&archive.db)?;
                archive.db.execute(
                    "update SETTINGS set SVALUE = ? where SETTING = 'VERSION'",
                    params![step.to],
                )?;
                current = step.to.to_string();
            }
            Ok(())
        })?;
        Ok(Some(start))
    }

    /// Commits any open transaction.
    pub fn commit(&self) -> Result<()> {
        if !self.db.is_autocommit() {
            self.db.execute_batch("commit")?;
        }
        Ok(())
    }
    /// Commits and closes the connection.
    pub fn close(self) -> Result<()> {
        self.commit()
        // the connection closes when self drops
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if !self.db.is_autocommit() {
            if let Err(err) = self.db.execute_batch("commit") {
                tracing::warn!(%err, "could not commit on close");
            }
        }
    }
}

// ------------- Entries -------------
/// Converts a JSON field to the stored form of `column`.
pub fn to_sql_value(column: &Column, value: &serde_json::Value) -> Result<SqlValue> {
    use serde_json::Value as Json;
    let invalid = || {
        RepoError::MalformedCommand(format!("invalid value for {}: {value}", column.name()))
    };
    let converted = match (column.kind(), value) {
        (_, Json::Null) => SqlValue::Null,
        (Kind::Integer, Json::Number(n)) => SqlValue::Integer(n.as_i64().ok_or_else(invalid)?),
        (Kind::Integer, Json::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        (Kind::Integer, Json::String(s)) => SqlValue::Integer(s.trim().parse().map_err(|_| invalid())?),
        (Kind::Text, Json::String(s)) => SqlValue::Text(s.clone()),
        (Kind::Text, Json::Number(n)) => SqlValue::Text(n.to_string()),
        (Kind::Text, Json::Bool(b)) => SqlValue::Text(b.to_string()),
        (Kind::List, Json::Array(items)) => {
            let items: Vec<String> = items
                .iter()
                .map(|i| match i {
                    Json::String(s) => Ok(s.clone()),
                    Json::Number(n) => Ok(n.to_string()),
                    _ => Err(invalid()),
                })
                .collect::<Result<_>>()?;
            SqlValue::Text(join_list(&items))
        }
        (Kind::List, Json::String(s)) => SqlValue::Text(join_list(&split_list(s))),
        _ => return Err(invalid()),
    };
    Ok(converted)
}
