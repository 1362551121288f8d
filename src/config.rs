use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};

const MIB: usize = 1024 * 1024;

/// Runtime settings resolved from the environment once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub thumb_dir: PathBuf,
    pub database_path: PathBuf,
    pub max_upload_bytes: usize,
    pub base_url: String,
    pub sweep_orphans: bool,
    /// Orphaned renditions younger than this survive the sweep.
    pub sweep_grace: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reads from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |name: &str, default: u64| -> u64 {
            match lookup(name) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    warn!("invalid {name}={raw:?}, using default {default}");
                    default
                }),
                None => default,
            }
        };
        let flag = |name: &str, default: bool| -> bool {
            lookup(name)
                .map(|v| {
                    let v = v.trim().to_ascii_lowercase();
                    matches!(v.as_str(), "1" | "true" | "yes" | "on")
                })
                .unwrap_or(default)
        };

        let port = u16::try_from(parsed("PORT", 3000)).unwrap_or_else(|_| {
            warn!("PORT out of range, using default 3000");
            3000
        });
        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let upload_dir = lookup("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("uploads"));
        let thumb_dir = lookup("THUMB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("thumbs"));
        let database_path = lookup("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("panels.db"));
        let max_upload_mb = match parsed("MAX_UPLOAD_MB", 5) {
            0 => {
                warn!("MAX_UPLOAD_MB=0 would reject every upload, using default 5");
                5
            }
            mb => mb,
        };
        let base_url = lookup("BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let cfg = Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            upload_dir,
            thumb_dir,
            database_path,
            max_upload_bytes: (max_upload_mb as usize).saturating_mul(MIB),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            sweep_orphans: flag("SWEEP_ORPHANS", false),
            sweep_grace: Duration::from_secs(parsed("SWEEP_GRACE_SECS", 3600)),
        };
        info!(
            "config: port={} upload_dir={} thumb_dir={} db={} max_upload_mb={} base_url={}",
            cfg.port,
            cfg.upload_dir.display(),
            cfg.thumb_dir.display(),
            cfg.database_path.display(),
            max_upload_mb,
            cfg.base_url
        );
        cfg
    }
}
