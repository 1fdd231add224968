mod self_aoi;
mod shadow;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::EyeDbError;
use crate::utils::Utils;

pub use self_aoi::{SelfAoiMigration, CATALOG_TABLE};

/// One column as reported by `PRAGMA table_xinfo`.
///
/// `default` holds the SQL text of the default expression as SQLite reports
/// it. SQLite drops the parentheses around expression defaults, so DDL
/// always wraps it again. `pk` is the 1-based position of the column inside
/// the primary key, or 0. `generated` marks `GENERATED ALWAYS AS` columns,
/// whose expression SQLite does not report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub pk: i64,
    pub generated: bool,
}

impl ColumnDef {
    /// A nullable column with no default that is not part of the key.
    pub fn nullable(name: &str, decl_type: &str) -> Self {
        ColumnDef {
            name: name.to_owned(),
            decl_type: decl_type.to_owned(),
            not_null: false,
            default: None,
            pk: 0,
            generated: false,
        }
    }

    fn to_sql(&self, inline_pk: bool) -> String {
        let mut sql = Utils::quote_ident(&self.name);
        if !self.decl_type.is_empty() {
            sql.push(' ');
            sql.push_str(&self.decl_type);
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT (");
            sql.push_str(default);
            sql.push(')');
        }
        if inline_pk && self.pk > 0 {
            sql.push_str(" PRIMARY KEY");
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Reads the column list of `table`, generated columns included. A table
    /// that does not exist comes back with no columns.
    pub fn load(conn: &Connection, table: &str) -> Result<Self, EyeDbError> {
        let mut stmt = conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk, hidden
             FROM pragma_table_xinfo(?)
             WHERE hidden <> 1
             ORDER BY cid",
        )?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(ColumnDef {
                    name: row.get(0)?,
                    decl_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    not_null: row.get::<_, i64>(2)? != 0,
                    default: row.get(3)?,
                    pk: row.get(4)?,
                    generated: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TableSchema {
            table: table.to_owned(),
            columns,
        })
    }

    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.position(column).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Looks up `column`, failing with `SchemaMismatch` when it is absent.
    pub fn require(&self, column: &str) -> Result<usize, EyeDbError> {
        self.position(column).ok_or_else(|| EyeDbError::SchemaMismatch {
            table: self.table.clone(),
            column: column.to_owned(),
        })
    }

    /// Copy of this schema with `column` inserted immediately after `anchor`.
    /// Every other column definition is carried over unchanged.
    pub fn with_column_after(&self, anchor: &str, column: ColumnDef) -> Result<Self, EyeDbError> {
        let idx = self.require(anchor)?;
        let mut columns = self.columns.clone();
        columns.insert(idx + 1, column);
        Ok(TableSchema {
            table: self.table.clone(),
            columns,
        })
    }

    /// `CREATE TABLE` statement for these columns under the name `table`.
    ///
    /// A single-column key is written inline; a composite key becomes a
    /// table constraint ordered by key position.
    pub fn create_table_sql(&self, table: &str) -> String {
        let mut pk_columns: Vec<&ColumnDef> = self.columns.iter().filter(|c| c.pk > 0).collect();
        pk_columns.sort_by_key(|c| c.pk);
        let inline_pk = pk_columns.len() == 1;

        let mut defs: Vec<String> = self.columns.iter().map(|c| c.to_sql(inline_pk)).collect();
        if pk_columns.len() > 1 {
            let names: Vec<String> = pk_columns
                .iter()
                .map(|c| Utils::quote_ident(&c.name))
                .collect();
            defs.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }

        format!(
            "CREATE TABLE {} ({})",
            Utils::quote_ident(table),
            defs.join(", ")
        )
    }
}
