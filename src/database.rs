use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

use crate::error::EyeDbError;
use crate::utils::Utils;

/// Handle to the eye-tracking database file.
///
/// The file must already exist: every operation in this tool works against
/// an existing experiment database, so opening never creates one.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self, EyeDbError> {
        if !db_path.is_file() {
            return Err(EyeDbError::NotFound(db_path.to_path_buf()));
        }

        let path = dunce::canonicalize(db_path)?;
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        info!("Database opened at: {}", path.display());

        Ok(Self { conn, path })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` inside `BEGIN EXCLUSIVE` ... `COMMIT`.
    ///
    /// Any error returned by `f` (or by the commit itself) rolls the whole
    /// transaction back before the error is handed to the caller.
    pub fn exclusive_transaction<T, F>(conn: &Connection, f: F) -> Result<T, EyeDbError>
    where
        F: FnOnce(&Connection) -> Result<T, EyeDbError>,
    {
        conn.execute_batch("BEGIN EXCLUSIVE")?;
        debug!("Exclusive transaction started");

        let result = f(conn).and_then(|value| {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        });

        if let Err(err) = &result {
            warn!("Rolling back transaction: {}", err);
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                // Only fails when SQLite already rolled back on its own
                debug!("Rollback reported: {}", rollback_err);
            }
        }

        result
    }

    pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, EyeDbError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All user tables, ordered by name. SQLite's internal tables are skipped.
    pub fn user_tables(conn: &Connection) -> Result<Vec<String>, EyeDbError> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tables)
    }

    pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, EyeDbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", Utils::quote_ident(table));
        let count = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }
}
