use std::io::Write;

use rusqlite::{types::Value, Connection};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::database::Database;
use crate::error::EyeDbError;
use crate::schema::{ColumnDef, TableSchema, CATALOG_TABLE};
use crate::utils::Utils;

/// Tables `inspect` looks at when none are named on the command line.
pub const DEFAULT_TABLES: [&str; 4] = ["gaze_data", "test_catalog", "test_group", "recordings"];

const INSPECT_SAMPLE_ROWS: usize = 2;
const EXPLORE_SAMPLE_ROWS: usize = 3;
const CHECK_SAMPLE_ROWS: usize = 5;
const MAX_DISPLAY_CHARS: usize = 100;

const SELF_AOI_COLUMNS: [&str; 4] = [
    "Mentioned character (Animal)",
    "Mentioned object",
    "self_AOIs",
    "correct_AOIs",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    pub table: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Vec<Vec<JsonValue>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub row_count: i64,
    pub sample: Vec<Vec<(String, String)>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExploreReport {
    pub tables: Vec<TableReport>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexInfo>,
}

impl ExploreReport {
    pub fn total_rows(&self) -> i64 {
        self.tables.iter().map(|t| t.row_count).sum()
    }
}

pub struct Inspector;

impl Inspector {
    /// Column names and the first `sample_rows` rows of `table`.
    pub fn snapshot(
        conn: &Connection,
        table: &str,
        sample_rows: usize,
    ) -> Result<TableSnapshot, EyeDbError> {
        let schema = TableSchema::load(conn, table)?;
        if !schema.exists() {
            return Ok(TableSnapshot {
                table: table.to_owned(),
                exists: false,
                columns: None,
                sample: None,
            });
        }

        let columns: Vec<String> = schema.columns.into_iter().map(|c| c.name).collect();
        let sample: Vec<Vec<JsonValue>> = Self::sample_rows(conn, table, sample_rows)?
            .iter()
            .map(|row| row.iter().map(Utils::value_to_json).collect())
            .collect();

        Ok(TableSnapshot {
            table: table.to_owned(),
            exists: true,
            columns: Some(columns),
            sample: Some(sample),
        })
    }

    /// One JSON line per table.
    pub fn inspect<W: Write>(
        conn: &Connection,
        tables: &[String],
        out: &mut W,
    ) -> Result<(), EyeDbError> {
        for table in tables {
            let snapshot = Self::snapshot(conn, table, INSPECT_SAMPLE_ROWS)?;
            writeln!(out, "{}", serde_json::to_string(&snapshot)?)?;
        }
        Ok(())
    }

    pub fn explore_report(conn: &Connection) -> Result<ExploreReport, EyeDbError> {
        let mut tables = Vec::new();
        let mut foreign_keys = Vec::new();

        for name in Database::user_tables(conn)? {
            let schema = TableSchema::load(conn, &name)?;
            let row_count = Database::count_rows(conn, &name)?;
            let sample: Vec<Vec<(String, String)>> = if row_count > 0 {
                let column_names: Vec<String> =
                    schema.columns.iter().map(|c| c.name.clone()).collect();
                Self::sample_rows(conn, &name, EXPLORE_SAMPLE_ROWS)?
                    .iter()
                    .map(|row| {
                        column_names
                            .iter()
                            .cloned()
                            .zip(
                                row.iter()
                                    .map(|v| Utils::value_for_display(v, MAX_DISPLAY_CHARS)),
                            )
                            .collect()
                    })
                    .collect()
            } else {
                Vec::new()
            };

            foreign_keys.extend(Self::foreign_keys(conn, &name)?);
            tables.push(TableReport {
                name,
                columns: schema.columns,
                row_count,
                sample,
            });
        }

        Ok(ExploreReport {
            tables,
            foreign_keys,
            indexes: Self::indexes(conn)?,
        })
    }

    /// Human-readable walk through every table, its relationships and indexes.
    pub fn explore<W: Write>(
        conn: &Connection,
        db_path: &str,
        out: &mut W,
    ) -> Result<ExploreReport, EyeDbError> {
        let report = Self::explore_report(conn)?;
        let rule = "=".repeat(60);

        writeln!(out, "Eye Tracking Database Analysis")?;
        writeln!(out, "{}", rule)?;
        writeln!(out, "Found database at: {}", db_path)?;

        let names: Vec<&str> = report.tables.iter().map(|t| t.name.as_str()).collect();
        writeln!(out, "Found {} tables: {}", names.len(), names.join(", "))?;

        for table in &report.tables {
            writeln!(out)?;
            writeln!(out, "{}", rule)?;
            writeln!(out, "TABLE: {}", table.name)?;
            writeln!(out, "{}", rule)?;
            writeln!(out, "COLUMNS:")?;
            for col in &table.columns {
                writeln!(out, "  {}", Self::describe_column(col))?;
            }

            writeln!(out)?;
            writeln!(out, "ROW COUNT: {}", table.row_count)?;

            if !table.sample.is_empty() {
                writeln!(out)?;
                writeln!(out, "SAMPLE DATA (first {} rows):", EXPLORE_SAMPLE_ROWS)?;
                for (i, row) in table.sample.iter().enumerate() {
                    writeln!(out)?;
                    writeln!(out, "Row {}:", i + 1)?;
                    for (name, value) in row {
                        writeln!(out, "  {}: {}", name, value)?;
                    }
                }
            }
        }

        writeln!(out)?;
        writeln!(out, "{}", rule)?;
        writeln!(out, "FOREIGN KEY RELATIONSHIPS")?;
        writeln!(out, "{}", rule)?;
        if report.foreign_keys.is_empty() {
            writeln!(out, "No explicit foreign key constraints found")?;
        }
        for fk in &report.foreign_keys {
            writeln!(
                out,
                "{}.{} -> {}.{}",
                fk.from_table,
                fk.from_column,
                fk.to_table,
                fk.to_column.as_deref().unwrap_or("<primary key>")
            )?;
        }

        writeln!(out)?;
        writeln!(out, "{}", rule)?;
        writeln!(out, "INDEXES")?;
        writeln!(out, "{}", rule)?;
        if report.indexes.is_empty() {
            writeln!(out, "No custom indexes found")?;
        }
        for index in &report.indexes {
            writeln!(out, "{} on {}:", index.name, index.table)?;
            writeln!(out, "  {}", index.sql)?;
        }

        writeln!(out)?;
        writeln!(out, "{}", rule)?;
        writeln!(out, "SUMMARY")?;
        writeln!(out, "{}", rule)?;
        writeln!(out, "Total tables: {}", report.tables.len())?;
        writeln!(out, "Total rows across all tables: {}", report.total_rows())?;
        writeln!(out, "Tables by size:")?;
        let mut by_size: Vec<&TableReport> = report.tables.iter().collect();
        by_size.sort_by(|a, b| b.row_count.cmp(&a.row_count));
        for table in by_size {
            writeln!(
                out,
                "  {}: {} rows",
                table.name,
                Utils::format_thousands(table.row_count)
            )?;
        }

        Ok(report)
    }

    /// Shows whether `test_catalog` carries `self_AOIs` and what the first
    /// few rows hold in the AOI-related columns.
    pub fn check_self_aoi<W: Write>(conn: &Connection, out: &mut W) -> Result<(), EyeDbError> {
        let schema = TableSchema::load(conn, CATALOG_TABLE)?;
        writeln!(out, "{}", serde_json::to_string(&schema.column_names())?)?;

        // Absent columns read as NULL so the check also works before migrating
        let select_list: Vec<String> = SELF_AOI_COLUMNS
            .iter()
            .map(|c| {
                if schema.has_column(c) {
                    Utils::quote_ident(c)
                } else {
                    "NULL".to_string()
                }
            })
            .collect();
        let sql = format!(
            "SELECT {} FROM {} LIMIT {}",
            select_list.join(", "),
            Utils::quote_ident(CATALOG_TABLE),
            CHECK_SAMPLE_ROWS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                (0..SELF_AOI_COLUMNS.len())
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for row in rows {
            let json: Vec<JsonValue> = row.iter().map(Utils::value_to_json).collect();
            writeln!(out, "{}", serde_json::to_string(&json)?)?;
        }
        Ok(())
    }

    fn describe_column(col: &ColumnDef) -> String {
        let pk = if col.pk > 0 { " (PRIMARY KEY)" } else { "" };
        let generated = if col.generated { " GENERATED" } else { "" };
        let not_null = if col.not_null { " NOT NULL" } else { "" };
        let default = col
            .default
            .as_ref()
            .map(|d| format!(" DEFAULT {}", d))
            .unwrap_or_default();
        format!(
            "{}: {}{}{}{}{}",
            col.name, col.decl_type, pk, not_null, default, generated
        )
    }

    fn sample_rows(
        conn: &Connection,
        table: &str,
        limit: usize,
    ) -> Result<Vec<Vec<Value>>, EyeDbError> {
        let sql = format!("SELECT * FROM {} LIMIT {}", Utils::quote_ident(table), limit);
        let mut stmt = conn.prepare(&sql)?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKey>, EyeDbError> {
        let mut stmt =
            conn.prepare("SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?)")?;
        let fks = stmt
            .query_map([table], |row| {
                Ok(ForeignKey {
                    from_table: table.to_owned(),
                    from_column: row.get(1)?,
                    to_table: row.get(0)?,
                    to_column: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fks)
    }

    fn indexes(conn: &Connection) -> Result<Vec<IndexInfo>, EyeDbError> {
        let mut stmt = conn.prepare(
            "SELECT name, tbl_name, sql FROM sqlite_master
             WHERE type = 'index' AND sql IS NOT NULL
             ORDER BY tbl_name, name",
        )?;
        let indexes = stmt
            .query_map([], |row| {
                Ok(IndexInfo {
                    name: row.get(0)?,
                    table: row.get(1)?,
                    sql: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(indexes)
    }
}
