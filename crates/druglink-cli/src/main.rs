mod cli;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{CacheCommands, Cli, Commands, SearchArgs};
use config::CliConfig;
use druglink_core::{FormularyEngine, MarketFilter, SearchOptions, SqliteStore};
use druglink_sources::{
    AuthorizationBackend, ClinicalDataResolver, ExternalMatcher, LabelBackend,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over `--log-level`. Logs go to stderr so stdout stays JSON.
fn init_tracing(level: &str) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(dataset) = &cli.dataset {
        config.engine.dataset_path = Some(dataset.clone());
    }
    config.validate()?;

    let store = SqliteStore::open(&cli.store, None)
        .with_context(|| format!("Failed to open cache store {}", cli.store.display()))?;
    let engine = Arc::new(FormularyEngine::from_config(config.engine.clone(), Arc::new(store)));

    match cli.command {
        Commands::Search(args) => {
            let hits = engine.search(&args.query, &search_options(&args)).await;
            print_json(&hits)?;
        }
        Commands::Parse { field } => {
            print_json(&engine.parse(&field))?;
        }
        Commands::Translate { name } => {
            print_json(&engine.to_international(&name).await)?;
        }
        Commands::Atc { code } => {
            print_json(&engine.classification_name(&code).await)?;
        }
        Commands::Resolve { record_id } => {
            let resolver = clinical_resolver(engine, &config)?;
            let clinical = resolver
                .resolve(&record_id)
                .await
                .with_context(|| format!("No formulary record with id {record_id}"))?;
            print_json(&serde_json::json!({
                "clinical": clinical,
                "label_content": clinical.label_content(),
                "shortages": clinical.shortages(),
                "safety_communications": clinical.safety_communications(),
                "rate_limits": {
                    "label": resolver.label().rate_limit_status(),
                    "authorization": resolver.authorization().rate_limit_status(),
                },
            }))?;
        }
        Commands::Lookup(args) => {
            let resolver = clinical_resolver(engine, &config)?;
            let results = resolver.lookup_external(&args.term).await;
            let adopted = match (args.adopt, results.first()) {
                (true, Some(first)) => resolver.adopt(first).await,
                _ => None,
            };
            print_json(&serde_json::json!({ "results": results, "adopted": adopted }))?;
        }
        Commands::Cache { command } => {
            let cache = engine.expansion_cache();
            match command {
                CacheCommands::List => print_json(&cache.entries().await)?,
                CacheCommands::Clear => {
                    let removed = cache.len().await;
                    cache.clear().await;
                    print_json(&serde_json::json!({ "removed": removed }))?;
                }
            }
        }
    }
    Ok(())
}

fn search_options(args: &SearchArgs) -> SearchOptions {
    let market = if args.marketed {
        MarketFilter::Marketed
    } else if args.withdrawn {
        MarketFilter::NotMarketed
    } else {
        MarketFilter::Any
    };
    SearchOptions {
        route: args.route.clone(),
        prescription_only: args.rx_only.then_some(true),
        atc_prefix: args.atc.clone(),
        market,
        limit: args.limit,
    }
}

fn clinical_resolver(engine: Arc<FormularyEngine>, config: &CliConfig) -> Result<ClinicalDataResolver> {
    let label_backend = LabelBackend::new(&config.label_source).context("label source")?;
    let authorization_backend =
        AuthorizationBackend::new(config.authorization_source.clone()).context("authorization source")?;

    let label = ExternalMatcher::new(Arc::new(label_backend), engine.clone(), config.label_source.clone());
    let authorization = ExternalMatcher::new(
        Arc::new(authorization_backend),
        engine.clone(),
        config.authorization_source.clone(),
    );
    Ok(ClinicalDataResolver::new(engine, Arc::new(label), Arc::new(authorization)))
}
