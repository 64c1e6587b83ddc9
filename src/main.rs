use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use openmas_assets::{
    core::{logging::setup_logging, settings::DEFAULT_PROJECT_FILE},
    AssetManager, AssetStatus, ProjectConfig,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "openmas-assets", version, about = "Fetch and cache project assets")]
struct Cli {
    /// Project file declaring the assets (TOML or JSON).
    #[arg(long, global = true, default_value = DEFAULT_PROJECT_FILE)]
    project: PathBuf,

    /// Cache root; wins over OPENMAS_ASSETS_DIR and project settings.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show every declared asset and its cache state.
    List,
    /// Ensure an asset is cached and print its local path.
    Download {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Re-check cached assets against their declared checksums.
    Verify { name: Option<String> },
    /// Remove cached assets.
    Clear {
        name: Option<String>,
        #[arg(long, conflicts_with = "name")]
        all: bool,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let project = ProjectConfig::load(&cli.project)?;
    let manager = AssetManager::from_project(&project, cli.cache_dir.as_deref())
        .context("could not set up the asset cache")?;

    match cli.command {
        Command::List => list(&manager),
        Command::Download { name, force } => {
            let path = manager.get_asset_path(&name, force).await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Verify { name } => verify(&manager, name.as_deref()),
        Command::Clear { name, all, yes } => clear(&manager, name.as_deref(), all, yes),
    }
}

fn list(manager: &AssetManager) -> Result<()> {
    println!("cache: {}", manager.cache_root().display());
    for asset in manager.assets() {
        let state = match manager.status(&asset.name, false)? {
            AssetStatus::Missing => "missing".to_string(),
            AssetStatus::Cached(path)
            | AssetStatus::Valid(path)
            | AssetStatus::Invalid(path) => format!("cached at {}", path.display()),
        };
        println!(
            "{:<24} {:<12} {:<8} {:<48} {state}",
            asset.name,
            asset.version,
            asset.asset_type,
            asset.source.to_string()
        );
    }
    Ok(())
}

fn verify(manager: &AssetManager, name: Option<&str>) -> Result<()> {
    let names: Vec<String> = match name {
        Some(name) => vec![manager.asset(name)?.name.clone()],
        None => manager.assets().map(|asset| asset.name.clone()).collect(),
    };

    let mut invalid = 0usize;
    for name in &names {
        match manager.status(name, true)? {
            AssetStatus::Missing => println!("{name}: not cached"),
            AssetStatus::Valid(path) | AssetStatus::Cached(path) => {
                println!("{name}: ok ({})", path.display())
            }
            AssetStatus::Invalid(path) => {
                invalid += 1;
                println!("{name}: INVALID ({})", path.display());
            }
        }
    }
    if invalid > 0 {
        bail!("{invalid} cached asset(s) failed verification");
    }
    Ok(())
}

fn clear(manager: &AssetManager, name: Option<&str>, all: bool, yes: bool) -> Result<()> {
    match (name, all) {
        (Some(name), _) => {
            manager.asset(name)?;
            if !yes && !confirm(&format!("Remove cached asset '{name}'?"))? {
                info!("nothing removed");
                return Ok(());
            }
            if manager.clear_asset(name)? {
                println!("removed {name}");
            } else {
                println!("{name} was not cached");
            }
        }
        (None, true) => {
            let root = manager.cache_root().display().to_string();
            if !yes && !confirm(&format!("Remove every cached asset under {root}?"))? {
                info!("nothing removed");
                return Ok(());
            }
            let removed = manager.clear_all()?;
            println!("cleared {removed} cached asset(s) under {root}");
        }
        (None, false) => bail!("name an asset to clear, or pass --all"),
    }
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read confirmation")?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
