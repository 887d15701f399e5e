use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;

mod cli;
mod commands;
mod config;
mod items;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use items::TreeFile;
use semantic::storage::SnapshotRepository;
use semantic::{EmbeddingModel, IndexSession, SystemClock};
use storage::FileStore;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_session(config: &Config, tree: Option<PathBuf>) -> anyhow::Result<IndexSession> {
    let base_path = config.base_path().to_path_buf();
    let tree = tree.unwrap_or_else(|| base_path.join("tree.json"));

    let embedder = EmbeddingModel::new(
        &config.embedding.model,
        base_path.clone(),
        Some(Duration::from_secs(config.embedding.download_timeout_secs)),
    )
    .context("failed to load embedding model")?;
    let store = FileStore::new(&base_path)
        .with_context(|| format!("failed to open {}", base_path.display()))?;

    Ok(IndexSession::new(
        config,
        Arc::new(embedder),
        Arc::new(TreeFile::new(tree, &config.collection.trash_folder)),
        Arc::new(store),
        Arc::new(SystemClock),
    ))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = Config::load().context("failed to load config")?;

    match args.command {
        // no model needed to forget the index
        cli::Command::Reset {} => {
            let store = FileStore::new(config.base_path())?;
            SnapshotRepository::new(Arc::new(store))
                .clear()
                .context("failed to clear index")?;
            log::info!("index reset");
            Ok(())
        }

        cli::Command::Daemon { addr } => {
            let session = open_session(&config, args.tree)?;
            web::start_daemon(Arc::new(session), &addr)
        }

        cli::Command::Index {} => {
            let session = open_session(&config, args.tree)?;
            print_json(&session.sync()?)
        }

        cli::Command::Search { query, top_k } => {
            let session = open_session(&config, args.tree)?;
            print_json(&session.search(&query, top_k)?)
        }

        cli::Command::Centroids {} => {
            let session = open_session(&config, args.tree)?;
            print_json(&session.build_centroids()?)
        }

        cli::Command::Suggest {} => {
            let session = open_session(&config, args.tree)?;
            print_json(&session.suggest_categories()?)
        }

        cli::Command::Dispatch { id } => {
            let session = open_session(&config, args.tree)?;
            print_json(&session.dispatch_item(&id)?)
        }

        cli::Command::Cluster {} => {
            let session = open_session(&config, args.tree)?;
            print_json(&session.cluster_subcollection()?)
        }
    }
}
