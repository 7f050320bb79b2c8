use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Cola
    pub track_limit: usize, // tracks pendientes máximos por guild

    // Control de admisión
    pub auto_blacklist: bool,
    pub blacklist_threshold: u32, // denegaciones antes de blacklistear
    pub admin_user_ids: Vec<u64>, // exentos de límites y blacklist

    // Rendimiento
    pub worker_threads: usize,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            track_limit: std::env::var("TRACK_LIMIT")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,

            auto_blacklist: std::env::var("AUTO_BLACKLIST")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            blacklist_threshold: std::env::var("BLACKLIST_THRESHOLD")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            admin_user_ids: std::env::var("ADMIN_USER_IDS")
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse())
                .collect::<Result<_, _>>()?,

            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => num_cpus::get(),
            },

            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "/app/data".to_string())
                .into(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Sanity checks de los valores cargados
    pub fn validate(&self) -> Result<()> {
        if self.track_limit == 0 {
            anyhow::bail!("Track limit must be greater than 0");
        }

        if self.blacklist_threshold == 0 {
            anyhow::bail!("Blacklist threshold must be greater than 0");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker threads must be greater than 0");
        }

        Ok(())
    }

    /// Resumen para el log de arranque
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Queue: {} track limit\n  \
            Admission: blacklist={} (threshold {}), {} admins exempt\n  \
            Workers: {} threads",
            self.track_limit,
            self.auto_blacklist,
            self.blacklist_threshold,
            self.admin_user_ids.len(),
            self.worker_threads,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            track_limit: 10_000,
            auto_blacklist: true,
            blacklist_threshold: 10,
            admin_user_ids: Vec::new(),
            worker_threads: num_cpus::get(),
            data_dir: "/app/data".into(),
        }
    }
}
