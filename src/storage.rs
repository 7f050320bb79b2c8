use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::engine::GuildSettings;

/// Configuración de servidor almacenada en JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: u64,
    /// Anunciar cada track cuando empieza a sonar
    pub track_announce: bool,
    pub dj_role_id: Option<u64>,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            track_announce: false,
            dj_role_id: None,
        }
    }
}

/// Manager de almacenamiento basado en archivos JSON, uno por guild
pub struct JsonStorage {
    guilds_dir: PathBuf,
    cache: RwLock<HashMap<u64, GuildConfig>>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let guilds_dir = data_dir.join("guilds");
        fs::create_dir_all(&guilds_dir).await?;

        info!("📁 Storage inicializado en: {}", guilds_dir.display());

        Ok(Self {
            guilds_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Obtiene la configuración de un servidor, creándola si no existe
    pub async fn guild_config(&self, guild_id: GuildId) -> GuildConfig {
        let id = guild_id.get();

        if let Some(config) = self.cache.read().get(&id) {
            return config.clone();
        }

        let config = match self.load_from_disk(id).await {
            Ok(config) => config,
            Err(_) => {
                let mut config = GuildConfig::default();
                config.guild_id = id;
                config
            }
        };

        self.cache.write().insert(id, config.clone());
        config
    }

    /// Persiste la configuración de un servidor
    pub async fn save_guild_config(&self, config: &GuildConfig) -> Result<()> {
        let path = self.config_path(config.guild_id);
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&path, json).await?;

        self.cache.write().insert(config.guild_id, config.clone());
        Ok(())
    }

    pub async fn set_track_announce(&self, guild_id: GuildId, enabled: bool) -> Result<()> {
        let mut config = self.guild_config(guild_id).await;
        config.track_announce = enabled;
        self.save_guild_config(&config).await
    }

    async fn load_from_disk(&self, guild_id: u64) -> Result<GuildConfig> {
        let path = self.config_path(guild_id);
        let content = fs::read_to_string(&path).await?;

        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("⚠️ Config corrupta para guild {}: {}", guild_id, e);
                Err(e.into())
            }
        }
    }

    fn config_path(&self, guild_id: u64) -> PathBuf {
        self.guilds_dir.join(format!("{}.json", guild_id))
    }
}

#[async_trait]
impl GuildSettings for JsonStorage {
    async fn is_auto_announce_enabled(&self, guild_id: GuildId) -> bool {
        self.guild_config(guild_id).await.track_announce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_for_unknown_guild() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        let config = storage.guild_config(GuildId::new(5)).await;
        assert_eq!(config.guild_id, 5);
        assert!(!config.track_announce);
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        storage.set_track_announce(GuildId::new(5), true).await.unwrap();

        // una instancia nueva debe leerlo del disco, no de la caché
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        assert!(storage.is_auto_announce_enabled(GuildId::new(5)).await);
    }
}
