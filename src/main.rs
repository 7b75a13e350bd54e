use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use feedrake::config::Config;
use feedrake::feed::fetcher::{self, USER_AGENT};
use feedrake::output;

#[derive(Parser, Debug)]
#[command(
    name = "feedrake",
    about = "Fetch configured RSS/Atom feeds into a single JSON document"
)]
struct Args {
    /// Feed list and tunables (TOML)
    #[arg(long, value_name = "FILE", default_value = "feeds.toml")]
    config: PathBuf,

    /// Aggregate output document; also read back for cache state
    #[arg(long, value_name = "FILE", default_value = "feed_data.json")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Distinct from per-feed errors: with nothing configured there is no run
    if config.feeds.is_empty() {
        anyhow::bail!("No feeds configured in {}", args.config.display());
    }

    let prior_cache = output::load_prior_cache(&args.output);

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;

    println!("Fetching {} feeds in parallel...", config.feeds.len());
    let result = fetcher::run_all(&client, &config, &prior_cache).await;

    output::write(&result, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!(
        "\nWrote {} articles to {}",
        result.articles.len(),
        args.output.display()
    );
    if !result.errors.is_empty() {
        println!("Feed errors:");
        for (feed, message) in &result.errors {
            println!("  {feed}: {message}");
        }
    }

    Ok(())
}
