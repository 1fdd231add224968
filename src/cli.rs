use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;
use strum::{AsRefStr, Display, EnumString};

use crate::config::Config;
use crate::database::Database;
use crate::error::EyeDbError;
use crate::inspect::{Inspector, DEFAULT_TABLES};
use crate::participants::Participants;
use crate::purge::{Purge, PurgeOptions};
use crate::schema::SelfAoiMigration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "eyedb",
    version,
    about = "eyedb: maintenance tasks for the eye-tracking experiment database"
)]
pub struct Cli {
    /// Database file (overrides the configured path and default locations)
    #[arg(long = "db", short = 'd', global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Add self_AOIs to test_catalog and drop the self entries from correct_AOIs
    #[command(name = "migrate-self-aoi")]
    MigrateSelfAoi {
        /// Report what would change without writing
        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,

        /// Output format
        #[arg(long = "format", default_value = "text")]
        format: ReportFormat,
    },

    /// Print columns and sample rows of the core tables as JSON lines
    Inspect {
        /// Table to inspect (repeatable; defaults to the core tables)
        #[arg(long = "table", short = 't')]
        tables: Vec<String>,
    },

    /// Print a full report of every table, relationship and index
    Explore {
        /// Output format
        #[arg(long = "format", default_value = "text")]
        format: ReportFormat,
    },

    /// Show the AOI-related columns of the first catalog rows
    #[command(name = "check-self-aoi")]
    CheckSelfAoi,

    /// Find rows containing a text pattern in any column (dry run unless --commit)
    Purge {
        /// Case-insensitive substring to look for
        #[arg(long = "pattern", short = 'p')]
        pattern: String,

        /// Delete the matching rows
        #[arg(long = "commit", default_value_t = false)]
        commit: bool,

        /// Only match columns declared with a text type
        #[arg(long = "text-columns-only", default_value_t = false)]
        text_columns_only: bool,

        /// Maximum number of sample identifiers reported per table
        #[arg(long = "sample-limit")]
        sample_limit: Option<usize>,
    },

    /// Create/refresh the participants lookup table from gaze_data
    #[command(name = "sync-participants")]
    SyncParticipants {
        /// Skip the file copy taken before changing the database
        #[arg(long = "no-backup", default_value_t = false)]
        no_backup: bool,
    },
}

impl Cli {
    pub fn handle_command_line() -> Result<(), EyeDbError> {
        let args = Cli::parse();
        let mut stdout = io::stdout().lock();
        Self::execute(args, Config::get(), &mut stdout)
    }

    fn execute<W: Write>(args: Cli, config: &Config, out: &mut W) -> Result<(), EyeDbError> {
        let db_path = config.database.resolve(args.db.as_deref())?;
        let db = Database::open(&db_path)?;
        let path_display = db.path().display().to_string();

        match args.command {
            Command::MigrateSelfAoi { dry_run, format } => {
                let outcome = SelfAoiMigration::run(db.conn(), dry_run)?;
                match format {
                    ReportFormat::Text => writeln!(out, "{}", outcome)?,
                    ReportFormat::Json => writeln!(out, "{}", serde_json::to_string(&outcome)?)?,
                }
            }
            Command::Inspect { tables } => {
                let tables = if tables.is_empty() {
                    DEFAULT_TABLES.iter().map(|t| t.to_string()).collect()
                } else {
                    tables
                };
                Inspector::inspect(db.conn(), &tables, out)?;
            }
            Command::Explore { format } => match format {
                ReportFormat::Text => {
                    Inspector::explore(db.conn(), &path_display, out)?;
                }
                ReportFormat::Json => {
                    let report = Inspector::explore_report(db.conn())?;
                    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
                }
            },
            Command::CheckSelfAoi => Inspector::check_self_aoi(db.conn(), out)?,
            Command::Purge {
                pattern,
                commit,
                text_columns_only,
                sample_limit,
            } => {
                let options = PurgeOptions {
                    pattern,
                    commit,
                    text_columns_only,
                    sample_limit: sample_limit.unwrap_or(config.purge.sample_limit),
                };
                let summary = Purge::run(db.conn(), &path_display, &options)?;
                writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
            }
            Command::SyncParticipants { no_backup } => {
                Participants::check_source(db.conn(), &config.participants)?;
                if no_backup {
                    info!("Skipping database backup");
                } else {
                    let backup = Participants::backup_file(db.path())?;
                    writeln!(out, "backup written to {}", backup.display())?;
                }
                let summary = Participants::sync(db.conn(), &config.participants)?;
                writeln!(out, "{}", summary)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::TempDir;

    fn temp_catalog() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eye_tracking.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                r#"
                CREATE TABLE test_catalog (
                    test_name TEXT PRIMARY KEY,
                    "group" TEXT,
                    "Mentioned character (Animal)" TEXT,
                    "Mentioned object" TEXT,
                    correct_AOIs TEXT
                );
                INSERT INTO test_catalog VALUES ('t1', 'G1', 'Dog', ' Ball ', 'Dog,Ball,Tree');
                CREATE TABLE gaze_data ("Participant name" TEXT);
                INSERT INTO gaze_data VALUES ('TLK311'), ('Jason');
                "#,
            )
            .unwrap();
        (dir, path)
    }

    fn run(path: &Path, args: &[&str]) -> Result<String, EyeDbError> {
        run_with_config(path, args, &Config::default_config())
    }

    fn run_with_config(path: &Path, args: &[&str], config: &Config) -> Result<String, EyeDbError> {
        let mut argv = vec!["eyedb", "--db", path.to_str().unwrap()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        let mut out = Vec::new();
        Cli::execute(cli, config, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn backup_count(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(".bak-")
            })
            .count()
    }

    #[test]
    fn test_cli_parsing_requires_command() {
        assert!(Cli::try_parse_from(["eyedb"]).is_err());
        assert!(Cli::try_parse_from(["eyedb", "nonexistent-command"]).is_err());
    }

    #[test]
    fn test_cli_parsing_global_db_and_flags() {
        let cli = Cli::try_parse_from(["eyedb", "purge", "-p", "Jason", "--commit", "--db", "x.db"])
            .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
        assert!(matches!(
            cli.command,
            Command::Purge { ref pattern, commit: true, text_columns_only: false, sample_limit: None }
                if pattern == "Jason"
        ));

        let cli = Cli::try_parse_from(["eyedb", "migrate-self-aoi", "--format", "JSON"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::MigrateSelfAoi { dry_run: false, format: ReportFormat::Json }
        ));

        assert!(Cli::try_parse_from(["eyedb", "explore", "--format", "yaml"]).is_err());
        assert!(Cli::try_parse_from(["eyedb", "purge"]).is_err(), "pattern is required");
    }

    #[test]
    fn test_migrate_then_noop() {
        let (_dir, path) = temp_catalog();

        let first = run(&path, &["migrate-self-aoi"]).unwrap();
        assert_eq!(first.trim(), "migrated 1 rows; self_AOIs added; correct_AOIs adjusted");

        let second = run(&path, &["migrate-self-aoi", "--format", "json"]).unwrap();
        assert_eq!(second.trim(), r#"{"outcome":"already_migrated"}"#);
    }

    #[test]
    fn test_missing_database_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.db");

        let result = run(&missing, &["inspect"]);

        assert!(matches!(result, Err(EyeDbError::NotFound(_))));
    }

    #[test]
    fn test_purge_dry_run_output() {
        let (_dir, path) = temp_catalog();

        let output = run(&path, &["purge", "--pattern", "jason"]).unwrap();
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(json["committed"], serde_json::Value::from(false));
        assert_eq!(json["total_matched"], serde_json::Value::from(1));
        assert_eq!(json["tables"]["gaze_data"]["matched_count"], serde_json::Value::from(1));
    }

    #[test]
    fn test_sync_participants_without_backup() {
        let (dir, path) = temp_catalog();

        let output = run(&path, &["sync-participants", "--no-backup"]).unwrap();

        assert_eq!(
            output.trim(),
            "participants ready; total=2, non_qac=1, qac=1, source_distinct=2"
        );
        assert_eq!(backup_count(dir.path()), 0);
    }

    #[test]
    fn test_sync_participants_bad_source_column_leaves_no_backup() {
        let (dir, path) = temp_catalog();
        let mut config = Config::default_config();
        config.participants.source_column = "participant_name".to_string();

        let result = run_with_config(&path, &["sync-participants"], &config);

        assert!(matches!(
            result,
            Err(EyeDbError::SchemaMismatch { ref column, .. }) if column == "participant_name"
        ));
        assert_eq!(backup_count(dir.path()), 0);
    }

    #[test]
    fn test_sync_participants_writes_backup_first() {
        let (dir, path) = temp_catalog();

        let output = run(&path, &["sync-participants"]).unwrap();

        assert!(output.starts_with("backup written to "), "{}", output);
        assert_eq!(backup_count(dir.path()), 1);
    }

    #[test]
    fn test_inspect_default_tables() {
        let (_dir, path) = temp_catalog();

        let output = run(&path, &["inspect"]).unwrap();

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), DEFAULT_TABLES.len());
        assert!(lines[0].starts_with(r#"{"table":"gaze_data","exists":true"#));
        assert_eq!(lines[2], r#"{"table":"test_group","exists":false}"#);
    }
}
