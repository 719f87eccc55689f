// src/logging.rs

use color_eyre::eyre::Result;
use directories::ProjectDirs;
use lazy_static::lazy_static;
use std::path::PathBuf;
use time::macros::format_description;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::{self, EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase().to_string();
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", PROJECT_NAME.clone());
    pub static ref CONFIG_ENV: String = format!("{}_CONFIG", PROJECT_NAME.clone());
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "domain-posture", env!("CARGO_PKG_NAME"))
}

pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = project_directory() {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

pub fn get_config_dir() -> PathBuf {
    if let Some(proj_dirs) = project_directory() {
        proj_dirs.config_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".config")
    }
}

/// The filter directive from `RUST_LOG`, then the project's own variable,
/// then `info` for this crate.
fn log_level() -> String {
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV.clone()))
        .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")))
}

/// Initializes file-based logging, plus a stderr copy when `verbose` is set.
pub fn initialize_logging(verbose: bool) -> Result<PathBuf> {
    let directory = get_data_dir();
    std::fs::create_dir_all(&directory)?;
    let log_path = directory.join(LOG_FILE.clone());
    let log_file = std::fs::File::create(&log_path)?;

    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    let file_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_timer(timer.clone())
        .with_target(false)
        .with_ansi(false)
        .with_filter(EnvFilter::new(log_level()));

    let stderr_subscriber = verbose.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(timer)
            .with_target(false)
            .with_filter(EnvFilter::new(log_level()))
    });

    tracing_subscriber::registry()
        .with(file_subscriber)
        .with(stderr_subscriber)
        .with(ErrorLayer::default())
        .init();

    Ok(log_path)
}
