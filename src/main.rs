mod cli;
mod config;
mod database;
mod error;
mod inspect;
mod participants;
mod purge;
mod schema;
mod utils;

use cli::Cli;
use config::{Config, CONFIG};
use directories::ProjectDirs;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

const LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;
const LOG_FILES_KEPT: usize = 5;

fn main() {
    let Some(project_dirs) = ProjectDirs::from("", "", "eyedb") else {
        eprintln!("Could not determine a home directory for eyedb");
        std::process::exit(1);
    };

    let config = CONFIG.get_or_init(|| Config::load_config(&project_dirs));

    // Keep the handle alive so buffered log lines are flushed on exit
    let _logger = setup_logging(&project_dirs, &config.logging.log_spec());
    debug!(
        "Command-line args: {:?}",
        std::env::args_os().collect::<Vec<_>>()
    );

    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn setup_logging(project_dirs: &ProjectDirs, log_spec: &str) -> Option<LoggerHandle> {
    let log_dir = project_dirs.data_local_dir().join("logs");

    let started = Logger::try_with_str(log_spec).and_then(|logger| {
        logger
            .log_to_file(FileSpec::default().directory(log_dir).basename("eyedb"))
            .format_for_files(flexi_logger::detailed_format)
            .rotate(
                Criterion::Size(LOG_FILE_SIZE),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(LOG_FILES_KEPT),
            )
            .start()
    });

    match started {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Logging disabled: {}", e);
            None
        }
    }
}
