//! Preview binary - publishes one branch into a local directory
//!
//! Usage:
//!   cargo run --bin preview                        # Publish "main" into out/
//!   cargo run --bin preview -- feature/quests      # Publish another branch
//!   cargo run --bin preview -- main --out /tmp/gd  # Choose the output directory
//!
//! Required environment variables:
//! - RECORD_STORE (directory or http(s) URL)
//!
//! Optional: every other variable the service reads (SOURCE_LANGUAGE,
//! TARGET_LANGUAGES, OUTPUT_FORMATS, SCHEMA_FILE, ...). BLOB_STORE_DIR is
//! ignored; artifacts are written below the output directory.

use anyhow::{Context, Result};
use gamedata_publish::config::Config;
use gamedata_publish::error::PublishError;
use gamedata_publish::pipeline::Publisher;
use gamedata_publish::registry::VersionRegistry;
use gamedata_publish::storage::FsBlobStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

struct PreviewArgs {
    branch: String,
    out: PathBuf,
}

fn parse_args(args: &[String]) -> Result<PreviewArgs> {
    let mut branch = None;
    let mut out = PathBuf::from("out");
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--out" => {
                out = iter.next().map(PathBuf::from).context("--out requires a directory")?;
            }
            other if other.starts_with("--") => anyhow::bail!("Unknown option {}", other),
            other => branch = Some(other.to_string()),
        }
    }

    Ok(PreviewArgs {
        branch: branch.unwrap_or_else(|| "main".to_string()),
        out,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gamedata_publish=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;

    info!("Loading configuration...");
    let config = Config::from_env()?;

    let registry = Arc::new(VersionRegistry::new(
        Arc::new(FsBlobStore::new(&args.out)),
        config.retire_grace,
    ));
    let publisher = Publisher::from_config(&config, registry)?;

    let outcome = match publisher.publish(&args.branch).await {
        Ok(outcome) => outcome,
        Err(PublishError::Validation(report)) => {
            println!("\n{}", report);
            anyhow::bail!("Snapshot {} failed validation", args.branch);
        }
        Err(e) => return Err(e.into()),
    };

    println!("\n{}", "=".repeat(60));
    println!("Version:   {}", outcome.version_id);
    println!("Token:     {}", outcome.access_token);
    println!("Artifacts: {}", outcome.artifact_count);
    println!(
        "Output:    {}",
        args.out.join(outcome.version_id.to_string()).display()
    );
    println!("{}", "=".repeat(60));

    println!("\nCoverage:");
    for report in &outcome.coverage {
        println!(
            "  {:<8} {:>6.1}%  ({}/{} strings, {} missing)",
            report.language.as_str(),
            report.coverage_percent,
            report.translated,
            report.localizable_strings,
            report.missing.len()
        );
    }

    for failure in &outcome.failed_catalogs {
        println!("\n⚠ Catalog skipped: {}", failure);
    }

    Ok(())
}
