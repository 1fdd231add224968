use std::fmt;

use log::info;
use rusqlite::{types::Value, Connection};
use serde::Serialize;

use crate::error::EyeDbError;

use super::shadow::{ShadowMigration, SourceRow};
use super::{ColumnDef, TableSchema};

// ============================================================================
// test_catalog: add self_AOIs
//
// Adds a nullable `self_AOIs` column immediately after `group`. Its value is
// derived from the two mention columns; those same values are then removed
// from `correct_AOIs`, which used to carry them.
//
// Running it a second time is a no-op: the presence of `self_AOIs` is the
// marker that the table was already migrated.
// ============================================================================

pub const CATALOG_TABLE: &str = "test_catalog";
const ANCHOR_COLUMN: &str = "group";
const CORRECT_COLUMN: &str = "correct_AOIs";
const SELF_COLUMN: &str = "self_AOIs";
const MENTION_COLUMNS: [&str; 2] = ["Mentioned character (Animal)", "Mentioned object"];

const FULLWIDTH_COMMA: char = '\u{FF0C}';

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPreview {
    pub rows: usize,
    pub with_self_aois: usize,
    pub correct_changed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    AlreadyMigrated,
    Migrated { rows: usize },
    DryRun(MigrationPreview),
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOutcome::AlreadyMigrated => {
                write!(f, "{} already present; skipping migration", SELF_COLUMN)
            }
            MigrationOutcome::Migrated { rows } => write!(
                f,
                "migrated {} rows; {} added; {} adjusted",
                rows, SELF_COLUMN, CORRECT_COLUMN
            ),
            MigrationOutcome::DryRun(preview) => write!(
                f,
                "dry run: {} rows; {} would get {}; {} would change {}",
                preview.rows,
                preview.with_self_aois,
                SELF_COLUMN,
                preview.correct_changed,
                CORRECT_COLUMN
            ),
        }
    }
}

pub struct SelfAoiMigration;

impl SelfAoiMigration {
    pub fn run(conn: &Connection, dry_run: bool) -> Result<MigrationOutcome, EyeDbError> {
        let source = TableSchema::load(conn, CATALOG_TABLE)?;

        if source.has_column(SELF_COLUMN) {
            info!("{}.{} already present", CATALOG_TABLE, SELF_COLUMN);
            return Ok(MigrationOutcome::AlreadyMigrated);
        }

        // Both columns must be present before anything is written
        source.require(ANCHOR_COLUMN)?;
        source.require(CORRECT_COLUMN)?;

        let target =
            source.with_column_after(ANCHOR_COLUMN, ColumnDef::nullable(SELF_COLUMN, "TEXT"))?;
        let migration = ShadowMigration::new(&source, target);

        if dry_run {
            return Self::preview(conn, &migration).map(MigrationOutcome::DryRun);
        }

        let target_columns: Vec<String> = migration
            .target()
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect();

        let rows = migration.run(conn, |row| Ok(Self::transform_row(row, &target_columns)))?;

        info!(
            "Migrated {} rows in {}; previous table kept as {}",
            rows,
            CATALOG_TABLE,
            migration.backup_table()
        );
        Ok(MigrationOutcome::Migrated { rows })
    }

    fn preview(
        conn: &Connection,
        migration: &ShadowMigration,
    ) -> Result<MigrationPreview, EyeDbError> {
        migration.check_preconditions(conn)?;

        let mut with_self_aois = 0;
        let mut correct_changed = 0;
        let rows = migration.for_each_source_row(conn, |row| {
            let (self_aois, correct) = Self::derive(row);
            if self_aois.is_some() {
                with_self_aois += 1;
            }
            if correct != row.text(CORRECT_COLUMN) {
                correct_changed += 1;
            }
            Ok(())
        })?;

        Ok(MigrationPreview {
            rows,
            with_self_aois,
            correct_changed,
        })
    }

    /// New `self_AOIs` and `correct_AOIs` values for one catalog row.
    fn derive(row: &SourceRow) -> (Option<String>, Option<String>) {
        let parts = Self::self_parts(
            row.text(MENTION_COLUMNS[0]).as_deref(),
            row.text(MENTION_COLUMNS[1]).as_deref(),
        );
        let correct = Self::strip_self_parts(row.text(CORRECT_COLUMN).as_deref(), &parts);
        (Self::join_list(&parts), correct)
    }

    fn transform_row(row: &SourceRow, target_columns: &[String]) -> Vec<Value> {
        let (self_aois, correct) = Self::derive(row);
        target_columns
            .iter()
            .map(|name| match name.as_str() {
                SELF_COLUMN => self_aois.clone().map_or(Value::Null, Value::Text),
                CORRECT_COLUMN => correct.clone().map_or(Value::Null, Value::Text),
                _ => row.get(name).cloned().unwrap_or(Value::Null),
            })
            .collect()
    }

    /// Trimmed, non-empty mention values in column order.
    pub fn self_parts(character: Option<&str>, object: Option<&str>) -> Vec<String> {
        [character, object]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Comma-joined list, or `None` when there is nothing to store.
    pub fn join_list<S: AsRef<str>>(parts: &[S]) -> Option<String> {
        if parts.is_empty() {
            None
        } else {
            Some(
                parts
                    .iter()
                    .map(AsRef::as_ref)
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
    }

    /// Rewrites a `correct_AOIs` value without any entry that is also a self
    /// part. Full-width commas count as separators; entries are compared
    /// after trimming. An empty input or an empty result is `None`.
    pub fn strip_self_parts(correct: Option<&str>, self_parts: &[String]) -> Option<String> {
        let correct = correct.map(str::trim).unwrap_or_default();
        if correct.is_empty() {
            return None;
        }

        let normalized = correct.replace(FULLWIDTH_COMMA, ",");
        let kept: Vec<&str> = normalized
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter(|t| !self_parts.iter().any(|p| p == t))
            .collect();

        Self::join_list(&kept)
    }
}
