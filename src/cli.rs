//! Command-line surface.
//!
//! Every command writes JSON to stdout; logs and progress go to stderr.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::config::ScanConfig;
use crate::cursor::CursorState;
use crate::inventory::SqliteInventory;
use crate::model::SubjectType;
use crate::remote::HttpTransport;
use crate::scan::{FavoriteFilters, MissingScanner, ScanRequest, SubjectRef};

#[derive(Parser, Debug)]
#[command(
    name = "catalog-gaps",
    version,
    about = "Find remote catalog entries missing from your local inventory"
)]
pub struct Cli {
    /// Config file (defaults to ~/.config/catalog-gaps/config.toml).
    #[arg(long, global = true, env = crate::config::CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Local inventory database, overriding the config.
    #[arg(long, global = true)]
    pub inventory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Next page of missing entries (or all of them with --all).
    Missing(MissingArgs),
    /// List favorited subjects of one type.
    Favorites {
        #[arg(long)]
        endpoint: String,
        #[arg(long = "type")]
        subject_type: SubjectType,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Decode a cursor token.
    Cursor { token: String },
    /// Build the local identifier cache for an endpoint and show its stats.
    Cache {
        #[arg(long)]
        endpoint: String,
    },
}

#[derive(Args, Debug)]
pub struct MissingArgs {
    /// Endpoint name or URL.
    #[arg(long)]
    pub endpoint: String,

    #[arg(long, requires = "subject_id")]
    pub subject_type: Option<SubjectType>,

    /// Local id of the subject to scope the scan to.
    #[arg(long, requires = "subject_type")]
    pub subject_id: Option<String>,

    #[arg(long, default_value_t = crate::scan::service::DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    #[arg(long)]
    pub cursor: Option<String>,

    #[arg(long, default_value = "RELEASE_DATE")]
    pub sort: String,

    #[arg(long, default_value = "DESC")]
    pub direction: String,

    #[arg(long)]
    pub favorite_persons: bool,

    #[arg(long)]
    pub favorite_organizations: bool,

    #[arg(long)]
    pub favorite_descriptors: bool,

    #[arg(long, default_value_t = crate::scan::service::DEFAULT_FAVORITE_LIMIT)]
    pub favorite_limit: usize,

    /// Descriptor id to exclude (repeatable).
    #[arg(long = "exclude-descriptor")]
    pub exclude_descriptor: Vec<String>,

    /// Follow cursors until the scan is complete.
    #[arg(long)]
    pub all: bool,

    /// Upper bound on calls made by --all.
    #[arg(long, default_value_t = 1000)]
    pub max_calls: u32,
}

impl MissingArgs {
    fn to_request(&self) -> ScanRequest {
        let favorites_requested =
            self.favorite_persons || self.favorite_organizations || self.favorite_descriptors;
        ScanRequest {
            remote_endpoint: self.endpoint.clone(),
            subject: self
                .subject_type
                .zip(self.subject_id.clone())
                .map(|(subject_type, local_id)| SubjectRef {
                    subject_type,
                    local_id,
                }),
            page_size: self.page_size,
            cursor: self.cursor.clone(),
            sort_field: self.sort.clone(),
            sort_direction: self.direction.clone(),
            favorite_filters: favorites_requested.then(|| FavoriteFilters {
                persons: self.favorite_persons,
                organizations: self.favorite_organizations,
                descriptors: self.favorite_descriptors,
                limit: self.favorite_limit,
            }),
            excluded_descriptor_ids: self.exclude_descriptor.iter().cloned().collect::<BTreeSet<_>>(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_scanner(cli: &Cli) -> Result<MissingScanner> {
    let mut config = ScanConfig::load(cli.config.as_deref())?;
    if let Some(path) = &cli.inventory {
        config.inventory_db = Some(path.clone());
    }
    let inventory_path = config.inventory_path();
    let inventory = SqliteInventory::open(&inventory_path)
        .with_context(|| format!("open inventory {}", inventory_path.display()))?;
    let transport = HttpTransport::new(
        Duration::from_secs(config.connect_timeout_secs),
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("build HTTP client")?;
    Ok(MissingScanner::new(config, Arc::new(inventory), Arc::new(transport)))
}

fn run_missing(scanner: &MissingScanner, args: &MissingArgs) -> Result<()> {
    let request = args.to_request();
    if !args.all {
        let page = scanner.scan(&request)?;
        return print_json(&page);
    }

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.enable_steady_tick(Duration::from_millis(120));

    let mut found = 0usize;
    let mut pages = 0u32;
    let summary = scanner.scan_to_end(&request, args.max_calls, |page, estimated_missing| {
        found += page.entries.len();
        pages += page.remote_pages_fetched_this_call;
        progress.set_message(format!(
            "{found} missing found (~{estimated_missing} estimated), {pages} remote pages scanned of {} entries",
            page.total_on_remote
        ));
    });
    progress.finish_and_clear();

    let summary = summary?;
    if let Some(reason) = &summary.interrupted {
        tracing::warn!(reason = %reason, "scan interrupted; rerun with --cursor from the output to continue");
    } else if !summary.is_complete {
        tracing::warn!(calls = summary.calls, "call limit reached; rerun with --cursor from the output to continue");
    }
    print_json(&summary)
}

/// Run a parsed command to completion. Blocks the calling thread.
pub fn execute(cli: Cli) -> Result<()> {
    if let Command::Cursor { token } = &cli.command {
        let state = CursorState::try_decode(token)?;
        return print_json(&state);
    }

    let scanner = build_scanner(&cli)?;
    match &cli.command {
        Command::Missing(args) => run_missing(&scanner, args),
        Command::Favorites {
            endpoint,
            subject_type,
            limit,
        } => {
            let ids = scanner.favorites(endpoint, *subject_type, *limit)?;
            print_json(&ids)
        }
        Command::Cache { endpoint } => {
            let url = scanner.endpoint(endpoint)?.url.clone();
            scanner.cache().get_or_build(&url)?;
            let stats = scanner
                .cache()
                .stats(&url)
                .ok_or_else(|| anyhow!("cache for {endpoint} vanished after build"))?;
            print_json(&stats)
        }
        Command::Cursor { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_missing_args_to_request() {
        let cli = Cli::parse_from([
            "catalog-gaps",
            "missing",
            "--endpoint",
            "primary",
            "--page-size",
            "10",
            "--favorite-organizations",
            "--favorite-limit",
            "5",
            "--exclude-descriptor",
            "t1",
            "--exclude-descriptor",
            "t2",
        ]);
        let Command::Missing(args) = cli.command else {
            panic!("expected missing command");
        };
        let request = args.to_request();
        assert_eq!(request.page_size, 10);
        assert!(request.subject.is_none());
        let favorites = request.favorite_filters.unwrap();
        assert!(favorites.organizations);
        assert!(!favorites.persons);
        assert_eq!(favorites.limit, 5);
        assert_eq!(request.excluded_descriptor_ids.len(), 2);
    }

    #[test]
    fn test_subject_flags_build_subject_ref() {
        let cli = Cli::parse_from([
            "catalog-gaps",
            "missing",
            "--endpoint",
            "primary",
            "--subject-type",
            "studio",
            "--subject-id",
            "12",
        ]);
        let Command::Missing(args) = cli.command else {
            panic!("expected missing command");
        };
        let request = args.to_request();
        assert_eq!(
            request.subject,
            Some(SubjectRef {
                subject_type: SubjectType::Organization,
                local_id: "12".into()
            })
        );
        assert!(request.favorite_filters.is_none());
    }

    #[test]
    fn test_subject_type_requires_id() {
        let result = Cli::try_parse_from([
            "catalog-gaps",
            "missing",
            "--endpoint",
            "primary",
            "--subject-type",
            "person",
        ]);
        assert!(result.is_err());
    }
}
