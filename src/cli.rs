use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Data directory holding config.yaml and the index.
    /// Defaults to $SMARTFIND_BASE_PATH, then ~/.local/share/smartfind
    #[clap(long, global = true)]
    pub base_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Keep the index up to date in the background.
    /// Lines read from stdin are run as queries;
    /// `:index <folder>...` indexes folders and `:quit` exits.
    Daemon {},

    /// Index folders once. They are kept up to date by the daemon afterwards.
    Index {
        #[clap(required = true)]
        roots: Vec<PathBuf>,
    },

    /// Search indexed documents and images
    Search {
        #[clap(required = true, num_args = 1..)]
        query: Vec<String>,
    },
}
