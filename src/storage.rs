use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, RoleId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AudioError, AudioResult};

pub const MAX_VOLUME: u16 = 200;
pub const DEFAULT_VOLUME: u16 = 100;

/// Configuración persistida por servidor, independiente de la sesión de audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub volume_percent: u16,
    pub dj_role_id: Option<u64>,
}

impl GuildSettings {
    fn new(guild_id: GuildId, volume_percent: u16) -> Self {
        Self {
            guild_id: guild_id.get(),
            volume_percent,
            dj_role_id: None,
        }
    }
}

/// Durable per-guild volume and DJ role settings.
///
/// Every write reaches disk (write to a temp file, fsync, rename) before the
/// in-memory copy is updated, so a failed write leaves the previous value in
/// place and a successful one is immediately visible to readers.
pub struct SettingsStore {
    data_dir: PathBuf,
    default_volume: u16,
    cache: RwLock<HashMap<GuildId, GuildSettings>>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub async fn new(data_dir: PathBuf, default_volume: u16) -> AudioResult<Self> {
        if default_volume > MAX_VOLUME {
            return Err(AudioError::validation(format!(
                "el volumen por defecto debe estar entre 0 y {}",
                MAX_VOLUME
            )));
        }

        let guilds_dir = data_dir.join("guilds");
        fs::create_dir_all(&guilds_dir).await?;

        info!("📁 Settings inicializados en: {}", data_dir.display());

        let store = Self {
            data_dir,
            default_volume,
            cache: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        };

        store.load_all().await?;

        Ok(store)
    }

    /// Obtiene la configuración de un servidor (valores por defecto si no existe)
    pub fn settings(&self, guild_id: GuildId) -> GuildSettings {
        self.cache
            .read()
            .get(&guild_id)
            .cloned()
            .unwrap_or_else(|| GuildSettings::new(guild_id, self.default_volume))
    }

    pub fn volume(&self, guild_id: GuildId) -> u16 {
        self.settings(guild_id).volume_percent
    }

    pub fn dj_role(&self, guild_id: GuildId) -> Option<RoleId> {
        self.settings(guild_id)
            .dj_role_id
            .filter(|id| *id != 0)
            .map(RoleId::new)
    }

    /// Actualiza el volumen persistido. Fuera de [0, 200] no modifica nada.
    pub async fn set_volume(&self, guild_id: GuildId, percent: i64) -> AudioResult<u16> {
        let volume = u16::try_from(percent)
            .ok()
            .filter(|v| *v <= MAX_VOLUME)
            .ok_or_else(|| {
                AudioError::validation(format!(
                    "el volumen debe estar entre 0 y {} (recibido {})",
                    MAX_VOLUME, percent
                ))
            })?;

        let _guard = self.write_lock.lock().await;
        let mut settings = self.settings(guild_id);
        settings.volume_percent = volume;
        self.persist(settings).await?;

        info!("🔊 Volumen de guild {} guardado en {}%", guild_id, volume);
        Ok(volume)
    }

    /// Actualiza (o limpia con `None`) el rol de DJ de un servidor
    pub async fn set_dj_role(&self, guild_id: GuildId, role_id: Option<RoleId>) -> AudioResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.settings(guild_id);
        settings.dj_role_id = role_id.map(|r| r.get());
        self.persist(settings).await?;

        match role_id {
            Some(role) => info!("🎧 Rol DJ de guild {} establecido: {}", guild_id, role),
            None => info!("🎧 Rol DJ de guild {} eliminado", guild_id),
        }
        Ok(())
    }

    // Métodos privados

    async fn persist(&self, settings: GuildSettings) -> AudioResult<()> {
        let guild_id = GuildId::new(settings.guild_id);
        let path = self.guild_file_path(guild_id);
        let content = serde_json::to_string_pretty(&settings)
            .map_err(|e| AudioError::Storage(e.to_string()))?;

        write_durable(&path, content.as_bytes()).await?;
        self.cache.write().insert(guild_id, settings);

        debug!("💾 Configuración persistida para guild {}", guild_id);
        Ok(())
    }

    async fn load_all(&self) -> AudioResult<()> {
        let guilds_dir = self.data_dir.join("guilds");
        let mut files = fs::read_dir(&guilds_dir).await?;
        let mut loaded = HashMap::new();

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();

            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            match load_settings_file(&path).await {
                Ok(settings) if settings.guild_id == 0 => {
                    warn!("Guild id 0 en {}, se ignora el archivo", path.display());
                }
                Ok(settings) if settings.volume_percent <= MAX_VOLUME => {
                    loaded.insert(GuildId::new(settings.guild_id), settings);
                }
                Ok(settings) => {
                    warn!(
                        "Volumen inválido ({}) en {}, se ignora el archivo",
                        settings.volume_percent,
                        path.display()
                    );
                }
                Err(e) => {
                    warn!("Error cargando {}: {}", path.display(), e);
                }
            }
        }

        if !loaded.is_empty() {
            info!("📂 Cargadas {} configuraciones de servidor", loaded.len());
        }

        *self.cache.write() = loaded;
        Ok(())
    }

    fn guild_file_path(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir
            .join("guilds")
            .join(format!("guild_{}.json", guild_id))
    }
}

async fn load_settings_file(path: &Path) -> AudioResult<GuildSettings> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| AudioError::Storage(e.to_string()))
}

/// Escribe a un archivo temporal, sincroniza y renombra sobre el destino
pub(crate) async fn write_durable(path: &Path, content: &[u8]) -> AudioResult<()> {
    let tmp = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}
