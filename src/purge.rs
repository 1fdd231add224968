use std::collections::BTreeMap;

use log::{info, Level};
use logging_timer::timer;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::database::Database;
use crate::error::EyeDbError;
use crate::schema::{ColumnDef, TableSchema};
use crate::utils::Utils;

// ============================================================================
// Pattern purge
//
// Finds rows in every user table where any column, cast to text, contains
// the pattern (ASCII case-insensitive, `%` and `_` taken literally). A dry
// run only reports; a committed run deletes every match in one transaction.
//
// Matching numeric columns as text can hit unintended rows (a pattern of
// "31" matches the integer 1312), so `text_columns_only` restricts the
// search to columns declared with text affinity.
// ============================================================================

const ROWID: &str = "rowid";

#[derive(Debug, Clone)]
pub struct PurgeOptions {
    pub pattern: String,
    pub commit: bool,
    pub text_columns_only: bool,
    pub sample_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TablePurge {
    pub matched_count: i64,
    pub id_columns: Vec<String>,
    pub used_rowid: bool,
    pub sample_ids: Vec<Map<String, JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurgeSummary {
    pub ok: bool,
    pub db_path: String,
    pub pattern: String,
    pub committed: bool,
    pub tables: BTreeMap<String, TablePurge>,
    pub total_matched: i64,
}

pub struct Purge;

impl Purge {
    pub fn run(
        conn: &Connection,
        db_path: &str,
        options: &PurgeOptions,
    ) -> Result<PurgeSummary, EyeDbError> {
        if options.pattern.trim().is_empty() {
            return Err(EyeDbError::Error(
                "Purge pattern must not be empty".to_string(),
            ));
        }

        let like = format!(
            "%{}%",
            Utils::escape_like(&options.pattern.to_ascii_lowercase())
        );

        let tables = if options.commit {
            Database::exclusive_transaction(conn, |c| Self::scan(c, &like, options))?
        } else {
            Self::scan(conn, &like, options)?
        };

        let total_matched: i64 = tables.values().map(|t| t.matched_count).sum();
        if options.commit {
            info!(
                "Purged {} rows matching '{}' from {} tables",
                total_matched,
                options.pattern,
                tables.len()
            );
        } else {
            info!(
                "Dry run: {} rows match '{}' in {} tables",
                total_matched,
                options.pattern,
                tables.len()
            );
        }

        Ok(PurgeSummary {
            ok: true,
            db_path: db_path.to_owned(),
            pattern: options.pattern.clone(),
            committed: options.commit,
            tables,
            total_matched,
        })
    }

    fn scan(
        conn: &Connection,
        like: &str,
        options: &PurgeOptions,
    ) -> Result<BTreeMap<String, TablePurge>, EyeDbError> {
        let _tmr = timer!(Level::Debug; "Purge.scan", "commit={}", options.commit);
        let mut tables = BTreeMap::new();

        for table in Database::user_tables(conn)? {
            let schema = TableSchema::load(conn, &table)?;
            let columns: Vec<&ColumnDef> = schema
                .columns
                .iter()
                .filter(|c| !options.text_columns_only || Self::has_text_affinity(c))
                .collect();
            if columns.is_empty() {
                continue;
            }

            let where_clause = columns
                .iter()
                .map(|c| {
                    format!(
                        "LOWER(CAST({} AS TEXT)) LIKE ? ESCAPE '\\'",
                        Utils::quote_ident(&c.name)
                    )
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            let params = vec![like; columns.len()];
            let quoted_table = Utils::quote_ident(&table);

            let matched_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE {}", quoted_table, where_clause),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )?;
            if matched_count == 0 {
                continue;
            }

            let (id_columns, used_rowid, sample_ids) =
                Self::sample_ids(conn, &schema, &where_clause, &params, options.sample_limit)?;

            if options.commit {
                conn.execute(
                    &format!("DELETE FROM {} WHERE {}", quoted_table, where_clause),
                    params_from_iter(params.iter()),
                )?;
            }

            tables.insert(
                table,
                TablePurge {
                    matched_count,
                    id_columns,
                    used_rowid,
                    sample_ids,
                },
            );
        }

        Ok(tables)
    }

    /// Identifiers of up to `limit` matching rows: the primary key columns,
    /// else `rowid`, else (tables without a rowid) the first column.
    fn sample_ids(
        conn: &Connection,
        schema: &TableSchema,
        where_clause: &str,
        params: &[&str],
        limit: usize,
    ) -> Result<(Vec<String>, bool, Vec<Map<String, JsonValue>>), EyeDbError> {
        let mut pk_columns: Vec<&ColumnDef> = schema.columns.iter().filter(|c| c.pk > 0).collect();
        pk_columns.sort_by_key(|c| c.pk);

        let preferred: Vec<String> = if pk_columns.is_empty() {
            vec![ROWID.to_string()]
        } else {
            pk_columns.iter().map(|c| c.name.clone()).collect()
        };
        let used_rowid = pk_columns.is_empty();

        match Self::select_ids(conn, &schema.table, &preferred, where_clause, params, limit) {
            Ok(ids) => Ok((preferred, used_rowid, ids)),
            Err(_) if used_rowid => {
                let fallback = match schema.columns.first() {
                    Some(col) => vec![col.name.clone()],
                    None => return Ok((Vec::new(), false, Vec::new())),
                };
                let ids =
                    Self::select_ids(conn, &schema.table, &fallback, where_clause, params, limit)?;
                Ok((fallback, false, ids))
            }
            Err(e) => Err(e),
        }
    }

    fn select_ids(
        conn: &Connection,
        table: &str,
        id_columns: &[String],
        where_clause: &str,
        params: &[&str],
        limit: usize,
    ) -> Result<Vec<Map<String, JsonValue>>, EyeDbError> {
        let select_list: Vec<String> = id_columns
            .iter()
            .map(|c| {
                if c == ROWID {
                    ROWID.to_string()
                } else {
                    Utils::quote_ident(c)
                }
            })
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT {}",
            select_list.join(", "),
            Utils::quote_ident(table),
            where_clause,
            limit
        );

        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut id = Map::new();
                for (i, name) in id_columns.iter().enumerate() {
                    let value: Value = row.get(i)?;
                    id.insert(name.clone(), Utils::value_to_json(&value));
                }
                Ok(id)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// SQLite's affinity rules: a declared type mentioning CHAR, CLOB or TEXT
    /// has text affinity. Untyped columns are included since they commonly
    /// hold text in imported data.
    fn has_text_affinity(column: &ColumnDef) -> bool {
        let decl = column.decl_type.to_ascii_uppercase();
        decl.is_empty() || ["CHAR", "CLOB", "TEXT"].iter().any(|t| decl.contains(t))
    }
}
