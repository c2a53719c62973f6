//! tribeindex CLI — runs the ingestion pipelines and inspects indexer state.
//!
//! Usage:
//! ```bash
//! tribeindex stream                      # primary-chain ingestion loop
//! tribeindex sidechain                   # token-layer ingestion loop
//! tribeindex update-config               # refresh token configuration
//! tribeindex state                       # ingestion status of both pipelines
//! tribeindex --config custom.json stream
//! ```

mod rpc;

use std::env;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tribeindex_core::types::{TokenConfig, TokenRegistry};
use tribeindex_core::IndexerConfig;
use tribeindex_query::QueryEngine;
use tribeindex_storage::GraphStore;
use tribeindex_stream::{SidechainProcessor, StreamProcessor};

use rpc::{fetch_token_configs, NodeRpc, SidechainRpc};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config_path = take_option(&mut args, "--config").unwrap_or_else(|| "config.json".into());

    let Some(command) = args.first().cloned() else {
        print_usage();
        process::exit(1);
    };

    let result = match command.as_str() {
        "stream" => cmd_stream(&config_path).await,
        "sidechain" => cmd_sidechain(&config_path).await,
        "update-config" => cmd_update_config(&config_path).await,
        "state" => cmd_state(&config_path).await,
        "version" | "--version" | "-V" => {
            println!("tribeindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

fn take_option(args: &mut Vec<String>, name: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == name)?;
    if pos + 1 >= args.len() {
        eprintln!("{name} requires a value");
        process::exit(1);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Some(value)
}

fn print_usage() {
    println!("tribeindex {}", env!("CARGO_PKG_VERSION"));
    println!("Token-aware content graph indexer for Hive tribes\n");
    println!("USAGE:");
    println!("    tribeindex [--config <path>] <COMMAND>\n");
    println!("COMMANDS:");
    println!("    stream         Run the primary-chain ingestion loop");
    println!("    sidechain      Run the token-layer ingestion loop");
    println!("    update-config  Refresh token configuration from the feed");
    println!("    state          Show ingestion status of both pipelines");
    println!("    version        Print version");
    println!("    help           Print this help");
}

fn load_config(path: &str) -> Result<IndexerConfig> {
    if std::path::Path::new(path).exists() {
        Ok(IndexerConfig::from_file(path)?)
    } else {
        warn!(path, "config file not found, using defaults");
        Ok(IndexerConfig::default())
    }
}

/// Load the shared token lookup table from the store.
async fn load_registry(store: &GraphStore) -> Result<Arc<TokenRegistry>> {
    let configs: Vec<TokenConfig> = store
        .token_configs()
        .await?
        .into_iter()
        .map(TokenConfig::from)
        .collect();
    if configs.is_empty() {
        warn!("no token configuration loaded; run `tribeindex update-config` first");
    } else {
        info!(tokens = configs.len(), "token configuration loaded");
    }
    Ok(Arc::new(TokenRegistry::new(configs)))
}

async fn cmd_stream(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let store = GraphStore::open(&config.database_url)
        .await
        .context("opening database")?;
    let tokens = load_registry(&store).await?;
    let node = NodeRpc::new(config.node_urls.clone())?;

    let processor = StreamProcessor::new(&store, &node, Some(&node), tokens, config);
    let shutdown = processor.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received, finishing current block");
        shutdown.store(true, Ordering::Relaxed);
    });
    processor.run().await?;
    Ok(())
}

async fn cmd_sidechain(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let store = GraphStore::open(&config.database_url)
        .await
        .context("opening database")?;
    let tokens = load_registry(&store).await?;
    let source = SidechainRpc::new(&config.sidechain_api_url);

    let processor = SidechainProcessor::new(&store, &source, tokens, config);
    let shutdown = processor.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received, finishing current block");
        shutdown.store(true, Ordering::Relaxed);
    });
    processor.run().await?;
    Ok(())
}

async fn cmd_update_config(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let store = GraphStore::open(&config.database_url)
        .await
        .context("opening database")?;

    let configs = fetch_token_configs(&config.token_config_url)
        .await
        .context("fetching token configuration feed")?;
    for row in &configs {
        store.upsert_token_config(row).await?;
    }
    println!("Updated {} token configurations", configs.len());
    Ok(())
}

async fn cmd_state(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let store = GraphStore::open(&config.database_url)
        .await
        .context("opening database")?;
    let engine = QueryEngine::new(&store, None, config);
    let state = engine.state().await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
