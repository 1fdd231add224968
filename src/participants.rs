use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::ParticipantsConfig;
use crate::database::Database;
use crate::error::EyeDbError;
use crate::schema::TableSchema;
use crate::utils::Utils;

const LEGACY_TABLE: &str = "participant_qac";

const CREATE_PARTICIPANTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS participants (
    participant TEXT PRIMARY KEY,
    is_qac INTEGER NOT NULL CHECK (is_qac IN (0,1))
);

CREATE INDEX IF NOT EXISTS idx_participants_is_qac ON participants(is_qac);
"#;

const MIGRATE_LEGACY_SQL: &str = r#"
INSERT OR REPLACE INTO participants (participant, is_qac)
SELECT participant, is_qac FROM participant_qac;

DROP TABLE participant_qac;
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantSummary {
    pub total_participants: i64,
    pub non_qac: i64,
    pub qac: i64,
    pub source_distinct: usize,
}

impl fmt::Display for ParticipantSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "participants ready; total={}, non_qac={}, qac={}, source_distinct={}",
            self.total_participants, self.non_qac, self.qac, self.source_distinct
        )
    }
}

pub struct Participants;

impl Participants {
    /// Copies the database file next to itself as `<name>.bak-YYYYmmdd-HHMMSS`.
    pub fn backup_file(db_path: &Path) -> Result<PathBuf, EyeDbError> {
        let mut backup = db_path.as_os_str().to_owned();
        backup.push(format!(".bak-{}", Local::now().format("%Y%m%d-%H%M%S")));
        let backup = PathBuf::from(backup);

        fs::copy(db_path, &backup)?;
        info!("Backed up {} to {}", db_path.display(), backup.display());
        Ok(backup)
    }

    /// Creates `participants` (and its index) when missing and folds in the
    /// legacy `participant_qac` table if one is still around. Returns whether
    /// a legacy table was migrated.
    pub fn ensure_table(conn: &Connection) -> Result<bool, EyeDbError> {
        conn.execute_batch(CREATE_PARTICIPANTS_SQL)?;

        if Database::table_exists(conn, LEGACY_TABLE)? {
            conn.execute_batch(MIGRATE_LEGACY_SQL)?;
            info!("Migrated legacy {} rows into participants", LEGACY_TABLE);
            return Ok(true);
        }
        Ok(false)
    }

    /// Fails with `SchemaMismatch` unless the configured source column exists.
    /// A double-quoted name that matches no column would otherwise read as a
    /// string literal.
    pub fn check_source(conn: &Connection, config: &ParticipantsConfig) -> Result<(), EyeDbError> {
        TableSchema::load(conn, &config.source_table)?.require(&config.source_column)?;
        Ok(())
    }

    /// Upserts every distinct participant found in the source table,
    /// classifying the configured names as non-QAC and everyone else as QAC.
    pub fn sync(
        conn: &Connection,
        config: &ParticipantsConfig,
    ) -> Result<ParticipantSummary, EyeDbError> {
        Self::check_source(conn, config)?;

        let non_qac: HashSet<&str> = config.non_qac.iter().map(String::as_str).collect();

        let source_distinct = Database::exclusive_transaction(conn, |c| {
            Self::ensure_table(c)?;

            let names = Self::distinct_participants(c, config)?;
            let mut upsert = c.prepare(
                "INSERT INTO participants (participant, is_qac) VALUES (?, ?)
                 ON CONFLICT(participant) DO UPDATE SET is_qac = excluded.is_qac",
            )?;
            for name in &names {
                let is_qac = if non_qac.contains(name.as_str()) { 0 } else { 1 };
                upsert.execute(params![name, is_qac])?;
            }
            Ok(names.len())
        })?;

        let count = |sql: &str| -> Result<i64, EyeDbError> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };

        Ok(ParticipantSummary {
            total_participants: count("SELECT COUNT(*) FROM participants")?,
            non_qac: count("SELECT COUNT(*) FROM participants WHERE is_qac = 0")?,
            qac: count("SELECT COUNT(*) FROM participants WHERE is_qac = 1")?,
            source_distinct,
        })
    }

    fn distinct_participants(
        conn: &Connection,
        config: &ParticipantsConfig,
    ) -> Result<Vec<String>, EyeDbError> {
        let column = Utils::quote_ident(&config.source_column);
        let sql = format!(
            "SELECT DISTINCT TRIM(CAST({col} AS TEXT)) AS p
             FROM {table}
             WHERE {col} IS NOT NULL
               AND TRIM(CAST({col} AS TEXT)) <> ''
             ORDER BY 1",
            col = column,
            table = Utils::quote_ident(&config.source_table)
        );

        let mut stmt = conn.prepare(&sql)?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;

    fn gaze_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE gaze_data ("Participant name" TEXT, "Gaze point X" REAL);
            INSERT INTO gaze_data VALUES
                ('TLK301', 0.1), (' TLK301 ', 0.2), ('TLK311', 0.3),
                ('TLK320', 0.4), ('TLK321', 0.5), ('', 0.6), (NULL, 0.7);
            "#,
        )
        .unwrap();
        conn
    }

    fn qac_of(conn: &Connection, participant: &str) -> i64 {
        conn.query_row(
            "SELECT is_qac FROM participants WHERE participant = ?",
            [participant],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_sync_classifies_participants() {
        let conn = gaze_conn();
        let config = Config::default_config().participants;

        let summary = Participants::sync(&conn, &config).unwrap();

        assert_eq!(
            summary,
            ParticipantSummary {
                total_participants: 4,
                non_qac: 2,
                qac: 2,
                source_distinct: 4,
            }
        );
        assert_eq!(qac_of(&conn, "TLK301"), 1);
        assert_eq!(qac_of(&conn, "TLK311"), 0);
        assert_eq!(qac_of(&conn, "TLK320"), 0);
        assert_eq!(qac_of(&conn, "TLK321"), 1);
        assert_eq!(
            summary.to_string(),
            "participants ready; total=4, non_qac=2, qac=2, source_distinct=4"
        );
    }

    #[test]
    fn test_sync_is_repeatable_and_overrides_status() {
        let conn = gaze_conn();
        let config = Config::default_config().participants;
        Participants::sync(&conn, &config).unwrap();
        conn.execute("UPDATE participants SET is_qac = 1 WHERE participant = 'TLK311'", [])
            .unwrap();

        let summary = Participants::sync(&conn, &config).unwrap();

        assert_eq!(summary.total_participants, 4);
        assert_eq!(qac_of(&conn, "TLK311"), 0);
    }

    #[test]
    fn test_legacy_table_is_folded_in() {
        let conn = gaze_conn();
        conn.execute_batch(
            "CREATE TABLE participant_qac (participant TEXT PRIMARY KEY, is_qac INTEGER NOT NULL);
             INSERT INTO participant_qac VALUES ('OLD001', 0), ('TLK301', 0);",
        )
        .unwrap();
        let config = Config::default_config().participants;

        let summary = Participants::sync(&conn, &config).unwrap();

        assert!(!Database::table_exists(&conn, LEGACY_TABLE).unwrap());
        // Legacy-only rows survive; rows also present in gaze_data get the
        // current classification
        assert_eq!(qac_of(&conn, "OLD001"), 0);
        assert_eq!(qac_of(&conn, "TLK301"), 1);
        assert_eq!(summary.total_participants, 5);
        assert_eq!(summary.source_distinct, 4);
    }

    #[test]
    fn test_ensure_table_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!Participants::ensure_table(&conn).unwrap());
        assert!(!Participants::ensure_table(&conn).unwrap());

        let schema = TableSchema::load(&conn, "participants").unwrap();
        assert_eq!(schema.column_names(), vec!["participant", "is_qac"]);

        let check = conn.execute("INSERT INTO participants VALUES ('X', 2)", []);
        assert!(check.is_err(), "is_qac is restricted to 0 or 1");
    }

    #[test]
    fn test_missing_source_column_is_schema_mismatch() {
        let conn = gaze_conn();
        let mut config = Config::default_config().participants;
        config.source_column = "participant_name".to_string();

        let result = Participants::sync(&conn, &config);

        assert!(matches!(result, Err(EyeDbError::SchemaMismatch { .. })));
        assert!(!Database::table_exists(&conn, "participants").unwrap());
    }

    #[test]
    fn test_backup_file_copies_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("eye_tracking.db");
        fs::write(&db_path, b"sqlite bytes").unwrap();

        let backup = Participants::backup_file(&db_path).unwrap();

        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("eye_tracking.db.bak-"), "{}", name);
        assert_eq!(fs::read(&backup).unwrap(), b"sqlite bytes");
    }
}
