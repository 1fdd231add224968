use std::collections::HashMap;

use log::{debug, info, Level};
use logging_timer::timer;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::EyeDbError;
use crate::utils::Utils;

use super::TableSchema;

/// A row read from the source table, addressable by column name.
pub struct SourceRow<'a> {
    index: &'a HashMap<String, usize>,
    values: Vec<Value>,
}

impl<'a> SourceRow<'a> {
    /// Value of `column`, or `None` when the source table has no such column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.index.get(column).map(|&i| &self.values[i])
    }

    /// Text of `column`; NULL and absent columns both yield `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(Utils::value_to_text)
    }
}

// ============================================================================
// Shadow table migration
//
// Rebuilds a table under a new schema without touching the original until
// the very end:
//   1. CREATE the replacement ("shadow") table under a temporary name
//   2. Copy every source row through a caller-supplied transform
//   3. Verify the shadow row count matches the source
//   4. Rename the original aside (kept for manual recovery) and rename the
//      shadow into place
//
// All four steps share one exclusive transaction. Any failure rolls back
// completely: the original table keeps its name and contents, and neither
// the shadow nor the backup name is left behind.
// ============================================================================

pub struct ShadowMigration<'a> {
    source: &'a TableSchema,
    target: TableSchema,
    shadow_table: String,
    backup_table: String,
}

impl<'a> ShadowMigration<'a> {
    pub fn new(source: &'a TableSchema, target: TableSchema) -> Self {
        ShadowMigration {
            shadow_table: format!("{}_new", source.table),
            backup_table: format!("{}_old", source.table),
            source,
            target,
        }
    }

    pub fn backup_table(&self) -> &str {
        &self.backup_table
    }

    pub fn target(&self) -> &TableSchema {
        &self.target
    }

    /// Checks everything that would make the rebuild fail or lose data,
    /// before anything is written.
    pub fn check_preconditions(&self, conn: &Connection) -> Result<(), EyeDbError> {
        self.check_artifacts(conn)?;
        self.check_generated_columns()?;
        self.check_dependents(conn)
    }

    /// Both temporary names must be free, otherwise one of the renames would
    /// fail halfway through the swap.
    fn check_artifacts(&self, conn: &Connection) -> Result<(), EyeDbError> {
        for name in [&self.shadow_table, &self.backup_table] {
            if Database::table_exists(conn, name)? {
                return Err(EyeDbError::ArtifactExists(name.clone()));
            }
        }
        Ok(())
    }

    /// SQLite does not report the expression of a generated column, so the
    /// rebuilt table could not reproduce it.
    fn check_generated_columns(&self) -> Result<(), EyeDbError> {
        match self.source.columns.iter().find(|c| c.generated) {
            Some(col) => Err(EyeDbError::Error(format!(
                "Generated column \"{}\" in {} cannot be carried over by a table rebuild",
                col.name, self.source.table
            ))),
            None => Ok(()),
        }
    }

    /// Renaming the original aside rewrites every view and trigger that
    /// mentions it to point at the backup table instead.
    fn check_dependents(&self, conn: &Connection) -> Result<(), EyeDbError> {
        let dependent = conn
            .query_row(
                "SELECT type, name FROM sqlite_master
                 WHERE type IN ('view', 'trigger')
                   AND instr(lower(sql), lower(?1)) > 0
                 ORDER BY name
                 LIMIT 1",
                [&self.source.table],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match dependent {
            Some((kind, name)) => Err(EyeDbError::DependentObject {
                table: self.source.table.clone(),
                kind,
                name,
            }),
            None => Ok(()),
        }
    }

    /// Reads every source row and hands it to `f` without writing anything.
    pub fn for_each_source_row<F>(&self, conn: &Connection, mut f: F) -> Result<usize, EyeDbError>
    where
        F: FnMut(&SourceRow) -> Result<(), EyeDbError>,
    {
        let (index, rows) = self.read_source(conn)?;
        let count = rows.len();
        for values in rows {
            f(&SourceRow {
                index: &index,
                values,
            })?;
        }
        Ok(count)
    }

    /// Runs the migration. `transform` must return one value per target
    /// column, in target column order. Returns the number of rows copied.
    pub fn run<F>(&self, conn: &Connection, transform: F) -> Result<usize, EyeDbError>
    where
        F: FnMut(&SourceRow) -> Result<Vec<Value>, EyeDbError>,
    {
        self.check_preconditions(conn)?;

        let rows = Database::exclusive_transaction(conn, |c| self.apply(c, transform))
            .map_err(|e| EyeDbError::TransactionFailure(Box::new(e)))?;

        info!(
            "Rebuilt {} ({} rows); original kept as {}",
            self.source.table, rows, self.backup_table
        );
        Ok(rows)
    }

    fn apply<F>(&self, conn: &Connection, mut transform: F) -> Result<usize, EyeDbError>
    where
        F: FnMut(&SourceRow) -> Result<Vec<Value>, EyeDbError>,
    {
        let create_sql = self.target.create_table_sql(&self.shadow_table);
        debug!("{}", create_sql);
        conn.execute_batch(&create_sql)?;

        let (index, rows) = self.read_source(conn)?;
        let expected = rows.len();

        let column_list: Vec<String> = self
            .target
            .columns
            .iter()
            .map(|c| Utils::quote_ident(&c.name))
            .collect();
        let placeholders = vec!["?"; column_list.len()].join(", ");
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Utils::quote_ident(&self.shadow_table),
            column_list.join(", "),
            placeholders
        );

        {
            let _tmr = timer!(Level::Debug; "ShadowMigration.copy_rows", "{} rows", expected);
            let mut insert = conn.prepare(&insert_sql)?;
            for values in rows {
                let row = SourceRow {
                    index: &index,
                    values,
                };
                let new_values = transform(&row)?;
                if new_values.len() != column_list.len() {
                    return Err(EyeDbError::Error(format!(
                        "Transform produced {} values for {} columns",
                        new_values.len(),
                        column_list.len()
                    )));
                }
                insert.execute(params_from_iter(new_values.iter()))?;
            }
        }

        let actual = Database::count_rows(conn, &self.shadow_table)?;
        if actual != expected as i64 {
            return Err(EyeDbError::RowCountMismatch {
                expected: expected as i64,
                actual,
            });
        }

        conn.execute_batch(&format!(
            "ALTER TABLE {} RENAME TO {};
             ALTER TABLE {} RENAME TO {};",
            Utils::quote_ident(&self.source.table),
            Utils::quote_ident(&self.backup_table),
            Utils::quote_ident(&self.shadow_table),
            Utils::quote_ident(&self.source.table),
        ))?;

        Ok(expected)
    }

    fn read_source(
        &self,
        conn: &Connection,
    ) -> Result<(HashMap<String, usize>, Vec<Vec<Value>>), EyeDbError> {
        let sql = format!("SELECT * FROM {}", Utils::quote_ident(&self.source.table));
        let mut stmt = conn.prepare(&sql)?;

        let index: HashMap<String, usize> = stmt
            .column_names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.to_owned(), i))
            .collect();
        let width = stmt.column_count();

        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((index, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use pretty_assertions::assert_eq;

    fn recordings_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE recordings (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO recordings (id, name) VALUES (1, 'alpha'), (2, 'beta'), (3, 'gamma');",
        )
        .unwrap();
        conn
    }

    fn names(conn: &Connection, table: &str) -> Vec<String> {
        let sql = format!("SELECT name FROM {} ORDER BY id", Utils::quote_ident(table));
        let mut stmt = conn.prepare(&sql).unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_run_swaps_tables_and_keeps_backup() {
        let conn = recordings_conn();
        let source = TableSchema::load(&conn, "recordings").unwrap();
        let target = source
            .with_column_after("name", ColumnDef::nullable("name_len", "INTEGER"))
            .unwrap();
        let migration = ShadowMigration::new(&source, target);

        let copied = migration
            .run(&conn, |row| {
                let name = row.text("name").unwrap_or_default();
                Ok(vec![
                    row.get("id").cloned().unwrap_or(Value::Null),
                    Value::Text(name.to_uppercase()),
                    Value::Integer(name.len() as i64),
                ])
            })
            .unwrap();

        assert_eq!(copied, 3);
        assert_eq!(names(&conn, "recordings"), vec!["ALPHA", "BETA", "GAMMA"]);
        assert_eq!(names(&conn, "recordings_old"), vec!["alpha", "beta", "gamma"]);
        assert!(!Database::table_exists(&conn, "recordings_new").unwrap());

        let swapped = TableSchema::load(&conn, "recordings").unwrap();
        assert_eq!(swapped.column_names(), vec!["id", "name", "name_len"]);
        assert_eq!(swapped.columns[0].pk, 1);
        assert!(swapped.columns[1].not_null);
    }

    #[test]
    fn test_failure_mid_copy_rolls_back_everything() {
        let conn = recordings_conn();
        let source = TableSchema::load(&conn, "recordings").unwrap();
        let migration = ShadowMigration::new(&source, source.clone());

        let mut seen = 0;
        let result = migration.run(&conn, |row| {
            seen += 1;
            if seen == 2 {
                return Err(EyeDbError::Error("induced failure".into()));
            }
            Ok(vec![
                row.get("id").cloned().unwrap_or(Value::Null),
                row.get("name").cloned().unwrap_or(Value::Null),
            ])
        });

        match result {
            Err(EyeDbError::TransactionFailure(inner)) => {
                assert!(matches!(*inner, EyeDbError::Error(_)));
            }
            other => panic!("expected TransactionFailure, got {:?}", other),
        }
        assert_eq!(names(&conn, "recordings"), vec!["alpha", "beta", "gamma"]);
        assert!(!Database::table_exists(&conn, "recordings_new").unwrap());
        assert!(!Database::table_exists(&conn, "recordings_old").unwrap());
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_constraint_violation_rolls_back() {
        let conn = recordings_conn();
        let source = TableSchema::load(&conn, "recordings").unwrap();
        let migration = ShadowMigration::new(&source, source.clone());

        // name is NOT NULL in the shadow table too
        let result = migration.run(&conn, |row| {
            Ok(vec![row.get("id").cloned().unwrap_or(Value::Null), Value::Null])
        });

        assert!(matches!(result, Err(EyeDbError::TransactionFailure(_))));
        assert_eq!(names(&conn, "recordings"), vec!["alpha", "beta", "gamma"]);
        assert!(!Database::table_exists(&conn, "recordings_new").unwrap());
    }

    #[test]
    fn test_wrong_value_count_is_rejected() {
        let conn = recordings_conn();
        let source = TableSchema::load(&conn, "recordings").unwrap();
        let migration = ShadowMigration::new(&source, source.clone());

        let result = migration.run(&conn, |_| Ok(vec![Value::Null]));

        assert!(matches!(result, Err(EyeDbError::TransactionFailure(_))));
        assert_eq!(Database::count_rows(&conn, "recordings").unwrap(), 3);
    }

    #[test]
    fn test_existing_artifact_blocks_before_any_write() {
        let conn = recordings_conn();
        conn.execute_batch("CREATE TABLE recordings_old (id INTEGER)").unwrap();
        let source = TableSchema::load(&conn, "recordings").unwrap();
        let migration = ShadowMigration::new(&source, source.clone());

        let mut called = false;
        let result = migration.run(&conn, |_| {
            called = true;
            Ok(vec![])
        });

        match result {
            Err(EyeDbError::ArtifactExists(name)) => assert_eq!(name, "recordings_old"),
            other => panic!("expected ArtifactExists, got {:?}", other),
        }
        assert!(!called);
        assert!(!Database::table_exists(&conn, "recordings_new").unwrap());
    }

    #[test]
    fn test_for_each_source_row_reads_without_writing() {
        let conn = recordings_conn();
        let source = TableSchema::load(&conn, "recordings").unwrap();
        let migration = ShadowMigration::new(&source, source.clone());

        let mut collected = Vec::new();
        let count = migration
            .for_each_source_row(&conn, |row| {
                collected.push(row.text("name").unwrap_or_default());
                assert!(row.get("missing").is_none());
                Ok(())
            })
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(collected, vec!["alpha", "beta", "gamma"]);
        assert!(!Database::table_exists(&conn, "recordings_new").unwrap());
    }
}
