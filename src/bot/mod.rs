//! # Bot Module
//!
//! Thin serenity layer on top of the audio core.
//!
//! [`QuasarMusicBot`] implements serenity's [`EventHandler`]: it registers
//! the slash commands on `ready`, routes every command interaction to
//! [`handlers::handle_command`], and watches the bot's own voice state so a
//! kick or a deleted channel tears the guild's session down.
//!
//! All playback decisions live in [`MusicController`]; this module only
//! parses options and renders the outcome.

use serenity::{
    all::{Context, EventHandler, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod commands;
pub mod handlers;

use crate::{audio::controller::MusicController, config::Config};

pub struct QuasarMusicBot {
    config: Arc<Config>,
    controller: Arc<MusicController>,
}

impl QuasarMusicBot {
    pub fn new(config: Arc<Config>, controller: Arc<MusicController>) -> Self {
        Self { config, controller }
    }

    /// Registra los comandos slash.
    ///
    /// Con `GUILD_ID` configurado se registran solo en ese servidor, lo que
    /// aplica los cambios al instante durante el desarrollo. Sin él se
    /// registran globalmente.
    async fn register_commands(&self, ctx: &Context) -> anyhow::Result<()> {
        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = serenity::model::id::GuildId::new(guild_id);
                let count = commands::register_guild_commands(ctx, guild_id).await?;
                info!("📝 {} comandos registrados en guild {}", count, guild_id);
            }
            None => {
                let count = commands::register_global_commands(ctx).await?;
                info!("📝 {} comandos registrados globalmente", count);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for QuasarMusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, &self.controller).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Detecta cuando el bot es expulsado o su canal desaparece
    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            if self.controller.handle_voice_lost(guild_id).await {
                info!("🔌 Bot desconectado en guild {}, sesión cerrada", guild_id);
            }
        }
    }
}
