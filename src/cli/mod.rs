use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::restore::LinkPolicy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Capture a directory tree into a JSON snapshot.
    #[command(alias = "c")]
    Capture {
        /// Directory whose contents are captured.
        #[arg(required = true)]
        base: PathBuf,

        /// Directory to leave out, relative to the base (e.g. /proc/). Repeatable.
        #[arg(long, value_name = "PATH")]
        exclude: Vec<String>,

        /// Write the snapshot here instead of standard output.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Abort on the first unreadable directory instead of skipping it.
        #[arg(long)]
        strict: bool,
    },

    /// Rebuild a filesystem from a snapshot, fetching file contents from an origin URL.
    #[command(alias = "r")]
    Restore {
        /// The snapshot file produced by `capture`.
        #[arg(required = true)]
        snapshot: PathBuf,

        /// Base URL the files are downloaded from.
        #[arg(required = true)]
        origin: String,

        /// Directory to restore the filesystem into.
        #[arg(required = true)]
        dest: PathBuf,

        /// Number of concurrent download workers. [default: 3, env: FSTREE_WORKERS]
        #[arg(long)]
        workers: Option<usize>,

        /// Pause after every download, in milliseconds. [default: 2000, env: FSTREE_PAUSE_MS]
        #[arg(long)]
        pause_ms: Option<u64>,

        /// How symbolic links are materialized.
        #[arg(long, value_enum, default_value_t = LinkMode::Fetch)]
        links: LinkMode,
    },

    /// Print the totals and every entry path of a snapshot.
    #[command(alias = "l")]
    List {
        /// The snapshot file to inspect.
        #[arg(required = true)]
        snapshot: PathBuf,
    },
}

/// `--links` values.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkMode {
    /// Download the link path from the origin like a regular file.
    Fetch,
    /// Recreate the link locally with its recorded target.
    Recreate,
}

impl From<LinkMode> for LinkPolicy {
    fn from(mode: LinkMode) -> Self {
        match mode {
            LinkMode::Fetch => LinkPolicy::Fetch,
            LinkMode::Recreate => LinkPolicy::Recreate,
        }
    }
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::try_parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_accepts_repeated_excludes() {
        let args = Args::try_parse_from(["fstree", "capture", "/mnt", "--exclude", "/boot/", "--exclude", "/proc/"]).unwrap();
        match args.command {
            Commands::Capture { base, exclude, out, strict } => {
                assert_eq!(base, PathBuf::from("/mnt"));
                assert_eq!(exclude, vec!["/boot/", "/proc/"]);
                assert!(out.is_none());
                assert!(!strict);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn restore_takes_three_positionals() {
        let args = Args::try_parse_from(["fstree", "r", "fs.json", "https://example.org/arch/", "/srv/arch", "--links", "recreate"]).unwrap();
        match args.command {
            Commands::Restore { snapshot, origin, dest, workers, links, .. } => {
                assert_eq!(snapshot, PathBuf::from("fs.json"));
                assert_eq!(origin, "https://example.org/arch/");
                assert_eq!(dest, PathBuf::from("/srv/arch"));
                assert_eq!(workers, None);
                assert_eq!(LinkPolicy::from(links), LinkPolicy::Recreate);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Args::try_parse_from(["fstree", "restore", "fs.json"]).is_err());
    }
}
