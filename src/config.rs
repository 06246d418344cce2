//! Validated run configurations built from command-line arguments.
//!
//! `FSTREE_WORKERS`, `FSTREE_PAUSE_MS` and `FSTREE_FETCH_PROGRAM` fill in
//! values the command line leaves unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{exclude_segments, CaptureOptions, WalkErrorPolicy};
use crate::error::{Result, SnapshotError};
use crate::restore::{LinkPolicy, PoolOptions, RestoreTarget, DEFAULT_PAUSE, DEFAULT_WORKERS};

pub const ENV_WORKERS: &str = "FSTREE_WORKERS";
pub const ENV_PAUSE_MS: &str = "FSTREE_PAUSE_MS";
pub const ENV_FETCH_PROGRAM: &str = "FSTREE_FETCH_PROGRAM";
pub const DEFAULT_FETCH_PROGRAM: &str = "wget";

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub base: PathBuf,
    pub excludes: Vec<Vec<String>>,
    /// `None` writes to standard output.
    pub output: Option<PathBuf>,
    pub on_error: WalkErrorPolicy,
}

impl CaptureConfig {
    pub fn from_args(base: &Path, excludes: &[String], output: Option<PathBuf>, strict: bool) -> Result<Self> {
        if !base.is_dir() {
            return Err(SnapshotError::Config(format!("'{}' is not a directory", base.display())));
        }
        let excludes = excludes
            .iter()
            .map(|raw| {
                let segments = exclude_segments(raw);
                if segments.is_empty() {
                    Err(SnapshotError::Config(format!("exclude '{raw}' names the capture base itself")))
                } else {
                    Ok(segments)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            base: base.to_path_buf(),
            excludes,
            output,
            on_error: if strict { WalkErrorPolicy::Abort } else { WalkErrorPolicy::SkipAndWarn },
        })
    }

    pub fn options(&self) -> CaptureOptions {
        CaptureOptions { excludes: self.excludes.clone(), on_error: self.on_error }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub snapshot: PathBuf,
    pub origin: String,
    pub dest_root: PathBuf,
    pub workers: usize,
    pub pause: Duration,
    pub link_policy: LinkPolicy,
    pub fetch_program: String,
}

impl RestoreConfig {
    /// Builds the configuration, reading unset values from the process environment.
    pub fn from_args(
        snapshot: &Path,
        origin: &str,
        dest: &Path,
        workers: Option<usize>,
        pause_ms: Option<u64>,
        link_policy: LinkPolicy,
    ) -> Result<Self> {
        Self::from_args_with_env(snapshot, origin, dest, workers, pause_ms, link_policy, |key| std::env::var(key).ok())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_args_with_env<E>(
        snapshot: &Path,
        origin: &str,
        dest: &Path,
        workers: Option<usize>,
        pause_ms: Option<u64>,
        link_policy: LinkPolicy,
        env: E,
    ) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let workers = match workers {
            Some(n) => n,
            None => env_number(&env, ENV_WORKERS)?.map_or(DEFAULT_WORKERS, |n| n as usize),
        };
        if workers == 0 {
            return Err(SnapshotError::Config("at least one worker is required".into()));
        }

        let pause = match pause_ms {
            Some(ms) => Duration::from_millis(ms),
            None => env_number(&env, ENV_PAUSE_MS)?.map_or(DEFAULT_PAUSE, Duration::from_millis),
        };

        if origin.trim().is_empty() {
            return Err(SnapshotError::Config("origin URL must not be empty".into()));
        }

        let fetch_program = env(ENV_FETCH_PROGRAM)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FETCH_PROGRAM.to_string());

        Ok(Self {
            snapshot: snapshot.to_path_buf(),
            origin: origin.to_string(),
            dest_root: dest.to_path_buf(),
            workers,
            pause,
            link_policy,
            fetch_program,
        })
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions { workers: self.workers, pause: self.pause, link_policy: self.link_policy }
    }

    pub fn target(&self) -> RestoreTarget {
        RestoreTarget { dest_root: self.dest_root.clone(), origin: self.origin.clone() }
    }
}

fn env_number<E: Fn(&str) -> Option<String>>(env: &E, key: &str) -> Result<Option<u64>> {
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| SnapshotError::Config(format!("{key}='{raw}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn restore_with(
        workers: Option<usize>,
        pause_ms: Option<u64>,
        vars: &[(&str, &str)],
    ) -> Result<RestoreConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RestoreConfig::from_args_with_env(
            Path::new("fs.json"),
            "http://mirror/arch/",
            Path::new("/srv/arch"),
            workers,
            pause_ms,
            LinkPolicy::Fetch,
            |key| vars.get(key).cloned(),
        )
    }

    #[test]
    fn restore_defaults() {
        let cfg = restore_with(None, None, &[]).unwrap();
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.pause, Duration::from_secs(2));
        assert_eq!(cfg.fetch_program, "wget");
        assert_eq!(cfg.link_policy, LinkPolicy::Fetch);
        assert_eq!(cfg.target().origin, "http://mirror/arch/");
    }

    #[test]
    fn environment_fills_unset_values_and_flags_win() {
        let vars = [(ENV_WORKERS, "8"), (ENV_PAUSE_MS, "0"), (ENV_FETCH_PROGRAM, "/usr/bin/wget2")];
        let cfg = restore_with(None, None, &vars).unwrap();
        assert_eq!((cfg.workers, cfg.pause), (8, Duration::ZERO));
        assert_eq!(cfg.fetch_program, "/usr/bin/wget2");

        let cfg = restore_with(Some(2), Some(150), &vars).unwrap();
        assert_eq!(cfg.pool_options().workers, 2);
        assert_eq!(cfg.pool_options().pause, Duration::from_millis(150));
    }

    #[test]
    fn rejects_zero_workers_and_garbage_env() {
        assert!(matches!(restore_with(Some(0), None, &[]), Err(SnapshotError::Config(_))));
        assert!(matches!(restore_with(None, None, &[(ENV_WORKERS, "0")]), Err(SnapshotError::Config(_))));
        assert!(matches!(restore_with(None, None, &[(ENV_PAUSE_MS, "soon")]), Err(SnapshotError::Config(_))));
    }

    #[test]
    fn rejects_empty_origin() {
        let err = RestoreConfig::from_args_with_env(
            Path::new("fs.json"),
            "  ",
            Path::new("/srv"),
            None,
            None,
            LinkPolicy::Fetch,
            |_| None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("origin"));
    }

    #[test]
    fn capture_normalizes_excludes() {
        let base = tempfile::tempdir().unwrap();
        let cfg = CaptureConfig::from_args(base.path(), &["/var/".into(), "./proc".into()], None, true).unwrap();
        assert_eq!(cfg.excludes, vec![vec!["var".to_string()], vec!["proc".to_string()]]);
        assert_eq!(cfg.options().on_error, WalkErrorPolicy::Abort);
    }

    #[test]
    fn capture_requires_directory_base() {
        let base = tempfile::tempdir().unwrap();
        let file = base.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(CaptureConfig::from_args(&file, &[], None, false).is_err());
        assert!(CaptureConfig::from_args(base.path(), &["/".into()], None, false).is_err());
    }
}
