use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Item tree JSON file. Defaults to tree.json in the data directory
    #[clap(long, global = true)]
    pub tree: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring the index in line with the item tree
    Index {},

    /// Hybrid search over indexed items
    Search {
        query: String,

        /// Number of results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Print the folder centroids
    Centroids {},

    /// Suggest folders for unsorted items
    Suggest {},

    /// Suggest a folder for a single item
    Dispatch {
        /// Item id
        id: String,
    },

    /// Group captures into named clusters
    Cluster {},

    /// Delete the persisted index
    Reset {},

    /// Start semdex as a service.
    Daemon {
        /// Address to listen on
        #[clap(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}
