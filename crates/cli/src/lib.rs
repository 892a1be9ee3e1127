use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pageview_core::{ContentManager, DirectoryExtractor, EngineConfig};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "pageview")]
#[command(about = "Paged media content loader")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable container metadata.
    Info {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Navigate through pages and report each load as a JSON line.
    Read {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        /// Zero-based page indices, in navigation order (default: every page)
        #[arg(long, value_delimiter = ',')]
        pages: Option<Vec<usize>>,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct PageOutput {
    index: usize,
    size: usize,
    mime_type: &'static str,
    cache_hit: bool,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Info { dir, config } => run_info(&dir, config.as_deref()),
        Commands::Read { dir, pages, config } => run_read(&dir, pages, config.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Explicit file, else the default location if present, then `PAGEVIEW_*` overrides.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let default = EngineConfig::default_path();
            if default.is_file() {
                EngineConfig::from_file(&default)
                    .with_context(|| format!("failed to load config {}", default.display()))?
            } else {
                EngineConfig::default()
            }
        }
    };
    config.apply_env().context("invalid environment override")
}

fn open_manager(dir: &Path, config: Option<&Path>) -> Result<(ContentManager, usize)> {
    ensure_dir_exists(dir)?;

    let config = load_config(config)?;
    let manager = ContentManager::new(config, Arc::new(DirectoryExtractor::new()))
        .context("failed to start content manager")?;

    let container = dir.to_string_lossy();
    let info = manager
        .open(&container)
        .with_context(|| format!("failed to open {}", dir.display()))?;

    Ok((manager, info.total_pages))
}

fn run_info(dir: &Path, config: Option<&Path>) -> Result<()> {
    let (manager, _) = open_manager(dir, config)?;
    let session = manager.session().context("container closed unexpectedly")?;

    let payload = serde_json::json!({
        "container": session.container(),
        "total_pages": session.total_pages(),
        "pages": session.pages().iter().map(|page| &page.name).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}

fn run_read(dir: &Path, pages: Option<Vec<usize>>, config: Option<&Path>) -> Result<()> {
    let (manager, total_pages) = open_manager(dir, config)?;
    let pages = pages.unwrap_or_else(|| (0..total_pages).collect());

    for index in pages {
        let page = manager
            .goto(index)
            .with_context(|| format!("failed to load page {index}"))?;

        let line = PageOutput {
            index,
            size: page.size(),
            mime_type: page.mime_type,
            cache_hit: page.from_cache,
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    println!("{}", serde_json::to_string(&manager.stats())?);
    Ok(())
}

fn ensure_dir_exists(dir: &Path) -> Result<()> {
    if !dir.exists() {
        anyhow::bail!("directory does not exist: {}", dir.display());
    }
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }
    Ok(())
}
