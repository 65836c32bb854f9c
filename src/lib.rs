pub mod cli;
pub mod config;
pub mod cursor;
pub mod error;
pub mod inventory;
pub mod model;
pub mod remote;
pub mod scan;

use anyhow::{Context, Result};
use clap::Parser;

pub use cursor::CursorState;
pub use error::{
    CacheBuildError, ConfigurationError, InvalidCursorError, InventoryError, RemoteServiceError,
    ScanError,
};
pub use model::{PageResult, QueryScope, RemoteEntry, SortDirection, SortField, SubjectType};
pub use scan::{MissingScanner, ScanRequest};

/// Exit codes reported by the binary.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const CONFIGURATION: i32 = 2;
    pub const INVENTORY: i32 = 3;
    pub const REMOTE: i32 = 4;
}

/// Map an error chain to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(scan) = err.downcast_ref::<ScanError>() {
        return match scan {
            ScanError::Configuration(_) => exit_codes::CONFIGURATION,
            ScanError::CacheBuild(_) | ScanError::Inventory(_) => exit_codes::INVENTORY,
            ScanError::Remote(_) => exit_codes::REMOTE,
        };
    }
    if err.downcast_ref::<ConfigurationError>().is_some() {
        exit_codes::CONFIGURATION
    } else if err.downcast_ref::<CacheBuildError>().is_some()
        || err.downcast_ref::<InventoryError>().is_some()
    {
        exit_codes::INVENTORY
    } else if err.downcast_ref::<RemoteServiceError>().is_some() {
        exit_codes::REMOTE
    } else {
        exit_codes::FAILURE
    }
}

/// Library entrypoint: parse arguments and run the command on a blocking worker.
pub async fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    tokio::task::spawn_blocking(move || cli::execute(cli))
        .await
        .context("command worker panicked")?
}
