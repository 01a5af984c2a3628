//! SQLite-backed implementation of the local store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use tidesync_query::{
    ident, system, Item, QueryDescription, SqlFormatter, Value,
};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::local::{LocalStore, QueryRows};
use crate::schema::{local_tables, ColumnDefinition, SqlColumnType, TableDefinition, ValueKind};
use crate::serialize::{deserialize_value, raw_to_value, serialize_parameter, serialize_value};

/// SQLite's default variable ceiling is 999; staying under 800 leaves slack
/// for engines built with a lower limit.
const MAX_PARAMETERS_PER_STATEMENT: usize = 800;

/// Config-table key prefix for per-table system-property masks.
const SYSTEM_PROPERTIES_KEY_PREFIX: &str = "systemProperties";

/// A local store over an embedded SQLite database.
///
/// Tables are defined from prototype records before [`initialize`] runs;
/// after that the schema is frozen apart from additive server-introduced
/// columns. The reserved `__operations`, `__errors` and `__config` tables
/// are defined by the store itself.
///
/// [`initialize`]: LocalStore::initialize
pub struct SqliteStore {
    conn: Mutex<Connection>,
    tables: RwLock<HashMap<String, TableDefinition>>,
    initialized: AtomicBool,
}

impl SqliteStore {
    /// Opens a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory store (useful for tests).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            tables: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        };
        store.define_system_tables()?;
        Ok(store)
    }

    fn define_system_tables(&self) -> StoreResult<()> {
        self.define_table_unchecked(
            local_tables::OPERATIONS,
            &Item::new()
                .with(system::ID, "")
                .with("kind", 0)
                .with("tableName", "")
                .with("itemId", "")
                .with("item", "")
                .with("createdAt", chrono::Utc::now())
                .with("sequence", 0)
                .with("version", 0),
        )?;
        self.define_table_unchecked(
            local_tables::ERRORS,
            &Item::new()
                .with(system::ID, "")
                .with("status", 0)
                .with("operationVersion", 0)
                .with("operationKind", 0)
                .with("tableName", "")
                .with("itemId", "")
                .with("item", "")
                .with("rawResult", "")
                .with("result", ""),
        )?;
        self.define_table_unchecked(
            local_tables::CONFIG,
            &Item::new().with(system::ID, "").with("value", ""),
        )
    }

    /// Defines an application table from a prototype record.
    ///
    /// Fails once the store is initialized; schema evolution is additive
    /// and driven through re-initialization. `id` and `__version` TEXT
    /// columns are added when the prototype does not carry them.
    pub fn define_table(&self, table_name: &str, prototype: &Item) -> StoreResult<()> {
        if local_tables::is_system_table(table_name) {
            return Err(StoreError::TableAlreadyDefined(table_name.to_owned()));
        }
        let mut prototype = prototype.clone();
        if prototype.get(system::VERSION).is_none() {
            prototype.set(system::VERSION, "");
        }
        self.define_table_unchecked(table_name, &prototype)
    }

    fn define_table_unchecked(&self, table_name: &str, prototype: &Item) -> StoreResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(StoreError::AlreadyInitialized(table_name.to_owned()));
        }
        ident::validate_identifier(table_name)?;

        let mut columns = Vec::with_capacity(prototype.len() + 1);
        if prototype.get(system::ID).is_none() {
            columns.push(ColumnDefinition::new(system::ID, ValueKind::String));
        }
        for (name, value) in prototype.fields() {
            ident::validate_identifier(name)?;
            let kind = ValueKind::of(value).ok_or_else(|| StoreError::UnsupportedColumnType {
                table: table_name.to_owned(),
                column: name.to_owned(),
            })?;
            columns.push(ColumnDefinition::new(name, kind));
        }

        let mut tables = self.tables.write();
        if tables.contains_key(table_name) {
            return Err(StoreError::TableAlreadyDefined(table_name.to_owned()));
        }
        tables.insert(table_name.to_owned(), TableDefinition::new(columns));
        Ok(())
    }

    /// The definition of `table_name`, if one exists.
    pub fn table_definition(&self, table_name: &str) -> Option<TableDefinition> {
        self.tables.read().get(table_name).cloned()
    }

    fn require_initialized(&self) -> StoreResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    fn create_or_evolve_table(
        &self,
        conn: &Connection,
        table_name: &str,
        definition: &TableDefinition,
    ) -> StoreResult<()> {
        let quoted_table = ident::format_table_name(table_name)?;

        let mut column_sql = Vec::with_capacity(definition.columns.len());
        for column in &definition.columns {
            let quoted = ident::format_member(&column.name)?;
            if column.name == system::ID {
                column_sql.push(format!("{quoted} TEXT PRIMARY KEY"));
            } else {
                column_sql.push(format!("{quoted} {}", column.store_type.as_sql()));
            }
        }
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {quoted_table} ({})",
                column_sql.join(", ")
            ),
            [],
        )?;

        // additive evolution only: new columns are appended, nothing is
        // ever dropped
        let mut existing = Vec::new();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({quoted_table})"))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            existing.push(row.get::<_, String>(1)?);
        }
        for column in &definition.columns {
            if !existing.iter().any(|c| c.eq_ignore_ascii_case(&column.name)) {
                conn.execute(
                    &format!(
                        "ALTER TABLE {quoted_table} ADD COLUMN {} {}",
                        ident::format_member(&column.name)?,
                        column.store_type.as_sql()
                    ),
                    [],
                )?;
            }
        }
        Ok(())
    }

    fn write_setting_internal(&self, conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO [__config] ([id], [value]) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn query_items(
        &self,
        conn: &Connection,
        sql: &str,
        parameters: &[(String, Value)],
        definition: Option<&TableDefinition>,
    ) -> StoreResult<Vec<Item>> {
        let mut stmt = conn.prepare(sql)?;
        for (name, value) in parameters {
            if let Some(index) = stmt.parameter_index(name)? {
                stmt.raw_bind_parameter(index, serialize_parameter(value))?;
            }
        }
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|n| (*n).to_owned()).collect();

        let mut items = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut item = Item::new();
            for (index, name) in column_names.iter().enumerate() {
                let raw: SqlValue = row.get(index)?;
                let value = match definition.and_then(|d| d.column(name)) {
                    Some(column) => deserialize_value(name, raw, column.kind)?,
                    // columns outside the map pass through as-is
                    None => raw_to_value(raw),
                };
                item.set(name.clone(), value);
            }
            items.push(item);
        }
        Ok(items)
    }

    fn execute_statement(
        &self,
        conn: &Connection,
        sql: &str,
        parameters: &[(String, Value)],
    ) -> StoreResult<usize> {
        let mut stmt = conn.prepare(sql)?;
        for (name, value) in parameters {
            if let Some(index) = stmt.parameter_index(name)? {
                stmt.raw_bind_parameter(index, serialize_parameter(value))?;
            }
        }
        Ok(stmt.raw_execute()?)
    }

    fn upsert_chunk(
        &self,
        conn: &Connection,
        table_name: &str,
        columns: &[&ColumnDefinition],
        items: &[Item],
    ) -> StoreResult<()> {
        let quoted_table = ident::format_table_name(table_name)?;
        let column_list: StoreResult<Vec<String>> = columns
            .iter()
            .map(|c| ident::format_member(&c.name).map_err(StoreError::from))
            .collect();
        let placeholders_per_row = format!("({})", vec!["?"; columns.len()].join(", "));

        let row_placeholders = vec![placeholders_per_row; items.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {quoted_table} ({}) VALUES {row_placeholders}",
            column_list?.join(", ")
        );

        let mut values: Vec<SqlValue> = Vec::with_capacity(columns.len() * items.len());
        for item in items {
            for column in columns {
                let value = item.get(&column.name).unwrap_or(&Value::Null);
                values.push(serialize_value(value, column.store_type));
            }
        }
        conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(())
    }
}

impl LocalStore for SqliteStore {
    fn initialize(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        let tables = self.tables.read();

        for (name, definition) in tables.iter() {
            self.create_or_evolve_table(&conn, name, definition)?;
        }

        // record which system columns each application table tracks so the
        // sync layer knows what to request per table
        for (name, definition) in tables.iter() {
            if local_tables::is_system_table(name) {
                continue;
            }
            self.write_setting_internal(
                &conn,
                &format!("{SYSTEM_PROPERTIES_KEY_PREFIX}|{name}"),
                &definition.system_properties.bits().to_string(),
            )?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        debug!(tables = tables.len(), "local store initialized");
        Ok(())
    }

    fn read(&self, query: &QueryDescription) -> StoreResult<QueryRows> {
        self.require_initialized()?;
        let definition = self.table_definition(&query.table_name);
        let select = SqlFormatter::new(query).format_select()?;

        let conn = self.conn.lock();
        let rows = self.query_items(&conn, &select.sql, &select.parameters, definition.as_ref())?;

        let total_count = if query.include_total_count {
            let count = SqlFormatter::new(query).format_select_count()?;
            let count_rows = self.query_items(&conn, &count.sql, &count.parameters, None)?;
            count_rows
                .first()
                .and_then(|row| row.get("count"))
                .and_then(Value::as_integer)
                .map(|c| c.max(0) as u64)
        } else {
            None
        };

        Ok(QueryRows { rows, total_count })
    }

    fn lookup(&self, table_name: &str, id: &str) -> StoreResult<Option<Item>> {
        self.require_initialized()?;
        let definition = self.table_definition(table_name);
        let quoted_table = ident::format_table_name(table_name)?;
        let quoted_id = ident::format_member(system::ID)?;
        let sql = format!("SELECT * FROM {quoted_table} WHERE {quoted_id} = @p1");
        let parameters = vec![("@p1".to_owned(), Value::String(id.to_owned()))];

        let conn = self.conn.lock();
        let mut rows = self.query_items(&conn, &sql, &parameters, definition.as_ref())?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    fn upsert(&self, table_name: &str, items: &[Item], from_server: bool) -> StoreResult<()> {
        self.require_initialized()?;
        if items.is_empty() {
            return Ok(());
        }
        let definition = self
            .table_definition(table_name)
            .ok_or_else(|| StoreError::TableNotDefined(table_name.to_owned()))?;

        // the statement covers every defined column any item carries;
        // validation rejects undefined columns unless the payload came from
        // the server, which may carry system columns the table never
        // declared (those are dropped)
        let mut columns: Vec<&ColumnDefinition> = Vec::new();
        for item in items {
            for (name, _) in item.fields() {
                match definition.column(name) {
                    Some(column) => {
                        if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
                            columns.push(column);
                        }
                    }
                    None if from_server => continue,
                    None => {
                        return Err(StoreError::ColumnNotDefined {
                            table: table_name.to_owned(),
                            column: name.to_owned(),
                        })
                    }
                }
            }
        }
        if columns.is_empty() {
            return Ok(());
        }

        // chunk whole rows so one statement never exceeds the parameter
        // ceiling
        let rows_per_chunk = (MAX_PARAMETERS_PER_STATEMENT / columns.len()).max(1);
        let conn = self.conn.lock();
        for chunk in items.chunks(rows_per_chunk) {
            self.upsert_chunk(&conn, table_name, &columns, chunk)?;
        }
        Ok(())
    }

    fn delete_by_query(&self, query: &QueryDescription) -> StoreResult<()> {
        self.require_initialized()?;
        let delete = SqlFormatter::new(query).format_delete()?;
        let conn = self.conn.lock();
        self.execute_statement(&conn, &delete.sql, &delete.parameters)?;
        Ok(())
    }

    fn delete_ids(&self, table_name: &str, ids: &[String]) -> StoreResult<()> {
        self.require_initialized()?;
        if ids.is_empty() {
            return Ok(());
        }
        let quoted_table = ident::format_table_name(table_name)?;
        let quoted_id = ident::format_member(system::ID)?;

        let conn = self.conn.lock();
        for chunk in ids.chunks(MAX_PARAMETERS_PER_STATEMENT) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            conn.execute(
                &format!("DELETE FROM {quoted_table} WHERE {quoted_id} IN ({placeholders})"),
                rusqlite::params_from_iter(chunk.iter()),
            )?;
        }
        Ok(())
    }

    fn read_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.require_initialized()?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT [value] FROM [__config] WHERE [id] = ?1")?;
        let mut rows = stmt.query(rusqlite::params![key])?;
        Ok(match rows.next()? {
            Some(row) => Some(row.get::<_, String>(0)?),
            None => None,
        })
    }

    fn write_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.require_initialized()?;
        let conn = self.conn.lock();
        self.write_setting_internal(&conn, key, value)
    }

    fn delete_setting(&self, key: &str) -> StoreResult<()> {
        self.require_initialized()?;
        let conn = self.conn.lock();
        conn.execute("DELETE FROM [__config] WHERE [id] = ?1", rusqlite::params![key])?;
        Ok(())
    }

    fn execute_sql(&self, sql: &str, parameters: &[(String, Value)]) -> StoreResult<Vec<Item>> {
        self.require_initialized()?;
        let conn = self.conn.lock();
        let column_count = conn.prepare(sql)?.column_count();
        if column_count == 0 {
            self.execute_statement(&conn, sql, parameters)?;
            Ok(Vec::new())
        } else {
            self.query_items(&conn, sql, parameters, None)
        }
    }
}
