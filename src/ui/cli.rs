use crate::search::engine::DEFAULT_TOP_K;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// docfinder - Local document discovery and semantic search
#[derive(Parser, Debug)]
#[command(name = "docfinder")]
#[command(about = "Find local documents by filename or by meaning", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Custom base directory (default: ~/.docfinder)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    /// Directory to index; repeat for several (default: home directory)
    #[arg(long = "root", global = true)]
    pub roots: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Accept the terms and build the index if it does not exist yet
    Accept,
    /// Pick up files added, changed or removed since the last run
    Rescan,
    /// Show the job state and whether an index exists
    Status,
    /// Search by filename, falling back to meaning
    Search {
        /// Search query
        query: String,
        /// Maximum number of results to return
        #[arg(short, long, default_value_t = DEFAULT_TOP_K)]
        limit: usize,
    },
    /// Keep the index up to date as files change
    Watch,
    /// Count the files that would be indexed under each root
    Count,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_with_global_flags() {
        let cli = Cli::parse_from([
            "docfinder",
            "search",
            "quarterly budget",
            "--limit",
            "3",
            "--root",
            "/a",
            "--root",
            "/b",
        ]);
        match cli.command {
            Commands::Search { query, limit } => {
                assert_eq!(query, "quarterly budget");
                assert_eq!(limit, 3);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_search_limit_default() {
        let cli = Cli::parse_from(["docfinder", "--base-dir", "/tmp/df", "search", "x"]);
        assert!(matches!(cli.command, Commands::Search { limit: DEFAULT_TOP_K, .. }));
        assert_eq!(cli.base_dir, Some(PathBuf::from("/tmp/df")));
    }
}
