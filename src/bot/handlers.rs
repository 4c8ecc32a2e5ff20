use anyhow::Result;
use serenity::{
    all::{Permissions, ResolvedOption, ResolvedValue},
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, RoleId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        controller::{MusicController, PlayOutcome},
        dispatcher::AdvanceOutcome,
        voice::JoinOutcome,
    },
    auth::Actor,
    error::{AudioError, AudioResult},
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    controller: &MusicController,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Este comando solo funciona dentro de un servidor")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Defer la respuesta: búsquedas y llamadas al nodo pueden tardar
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let embed = match run_command(ctx, &command, guild_id, controller).await {
        Ok(embed) => embed,
        Err(e) => {
            if e.is_transient() {
                warn!("⚠️ /{} falló en guild {}: {}", command.data.name, guild_id, e);
            } else {
                debug!("/{} rechazado en guild {}: {}", command.data.name, guild_id, e);
            }
            embeds::create_audio_error_embed(&e)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn run_command(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    controller: &MusicController,
) -> AudioResult<CreateEmbed> {
    let actor = actor_from(command);
    let options = command.data.options();

    match command.data.name.as_str() {
        "join" => {
            let channel_id = user_voice_channel(ctx, guild_id, command.user.id)?;
            let message = match controller.join(&actor, guild_id, channel_id).await? {
                JoinOutcome::Connected => format!("Conectado a <#{}>", channel_id),
                JoinOutcome::Moved { from } => format!("Movido de <#{}> a <#{}>", from, channel_id),
                JoinOutcome::AlreadyConnected => format!("Ya estoy en <#{}>", channel_id),
            };
            Ok(embeds::create_success_embed("Canal de voz", &message))
        }
        "play" => {
            let query = string_option(&options, "query")
                .ok_or_else(|| AudioError::validation("falta la búsqueda"))?;
            let channel_id = user_voice_channel(ctx, guild_id, command.user.id)?;
            handle_play(controller, &actor, guild_id, channel_id, query).await
        }
        "skip" => {
            let outcome = controller.skip(&actor, guild_id).await?;
            let next = match outcome.next {
                AdvanceOutcome::Playing(track) => format!("Siguiente: **{}**", track.title()),
                AdvanceOutcome::Autoplay(track) => format!("📻 Autoplay: **{}**", track.title()),
                AdvanceOutcome::Idle => "No hay más canciones en la cola".to_string(),
            };
            Ok(embeds::create_success_embed(
                "Canción Saltada",
                &format!("⏭️ **{}**\n{}", outcome.skipped.title(), next),
            ))
        }
        "stop" => {
            let cleared = controller.stop(&actor, guild_id).await?;
            Ok(embeds::create_success_embed(
                "Reproducción Detenida",
                &format!("⏹️ Se quitaron {} canciones de la cola", cleared),
            ))
        }
        "pause" => {
            controller.pause(&actor, guild_id).await?;
            Ok(embeds::create_success_embed("Pausado", "⏸️ Reproducción pausada"))
        }
        "resume" => {
            controller.resume(&actor, guild_id).await?;
            Ok(embeds::create_success_embed("Reanudado", "▶️ Reproducción reanudada"))
        }
        "queue" => {
            let page = integer_option(&options, "page").unwrap_or(1).max(1);
            let snapshot = controller.queue(guild_id);
            Ok(embeds::create_queue_embed(
                &snapshot,
                usize::try_from(page).unwrap_or(1),
            ))
        }
        "volume" => {
            let level = integer_option(&options, "level");
            let volume = controller.volume(&actor, guild_id, level).await?;
            Ok(embeds::create_volume_embed(volume, level.is_some()))
        }
        "loop" => {
            let enabled = controller.toggle_loop(&actor, guild_id).await?;
            Ok(embeds::create_success_embed(
                "Repetición",
                if enabled {
                    "🔂 Repetición activada"
                } else {
                    "➡️ Repetición desactivada"
                },
            ))
        }
        "autoplay" => {
            let enabled = controller.toggle_autoplay(&actor, guild_id).await?;
            Ok(embeds::create_success_embed(
                "Autoplay",
                if enabled {
                    "📻 Autoplay activado"
                } else {
                    "⏹️ Autoplay desactivado"
                },
            ))
        }
        "shuffle" => {
            let count = controller.shuffle(&actor, guild_id).await?;
            Ok(embeds::create_success_embed(
                "Cola Mezclada",
                &format!("🔀 Se mezclaron {} canciones", count),
            ))
        }
        "clear" => {
            let count = controller.clear(&actor, guild_id).await?;
            Ok(embeds::create_success_embed(
                "Cola Limpiada",
                &format!("🗑️ Se quitaron {} canciones", count),
            ))
        }
        "move" => {
            let from = required_integer(&options, "from")?;
            let to = required_integer(&options, "to")?;
            let track = controller.move_track(&actor, guild_id, from, to).await?;
            Ok(embeds::create_success_embed(
                "Canción Movida",
                &format!("**{}** ahora está en la posición {}", track.title(), to),
            ))
        }
        "remove" => {
            let position = required_integer(&options, "position")?;
            let track = controller.remove_track(&actor, guild_id, position).await?;
            Ok(embeds::create_success_embed(
                "Canción Quitada",
                &format!("Se quitó **{}** de la cola", track.title()),
            ))
        }
        "seek" => {
            let seconds = required_integer(&options, "seconds")?;
            let target = controller.seek(&actor, guild_id, seconds).await?;
            Ok(embeds::create_success_embed(
                "Posición Cambiada",
                &format!("⏩ Saltando a {}", embeds::format_duration(target)),
            ))
        }
        "replay" => {
            controller.replay(&actor, guild_id).await?;
            Ok(embeds::create_success_embed("Desde el Principio", "⏮️ Reiniciando la canción"))
        }
        "setdj" => {
            let role_id = role_option(&options, "role")
                .ok_or_else(|| AudioError::validation("falta el rol"))?;
            controller.set_dj(&actor, guild_id, role_id).await?;
            Ok(embeds::create_success_embed(
                "Rol DJ",
                &format!("Solo <@&{}> y los administradores pueden controlar la música", role_id),
            ))
        }
        "cleardj" => {
            controller.clear_dj(&actor, guild_id).await?;
            Ok(embeds::create_success_embed(
                "Rol DJ",
                "Cualquier miembro puede controlar la música",
            ))
        }
        "history" => Ok(embeds::create_history_embed(&controller.history(guild_id))),
        "nowplaying" => match controller.now_playing(guild_id) {
            Some(now) => Ok(embeds::create_now_playing_embed(&now)),
            None => Ok(embeds::create_info_embed(
                "🎵 Reproduciendo Ahora",
                "No hay nada reproduciéndose",
            )),
        },
        "leave" => {
            let message = if controller.leave(&actor, guild_id).await? {
                "👋 Desconectado del canal de voz"
            } else {
                "No estaba conectado a ningún canal de voz"
            };
            Ok(embeds::create_success_embed("Desconectado", message))
        }
        "resetmusic" => {
            let closed = controller.reset_node(&actor).await?;
            Ok(embeds::create_success_embed(
                "🔁 Sistema de música reiniciado",
                &format!(
                    "Se cerraron {} sesiones y se está reconectando con el nodo de audio",
                    closed
                ),
            ))
        }
        other => Err(AudioError::validation(format!("comando desconocido: {}", other))),
    }
}

async fn handle_play(
    controller: &MusicController,
    actor: &Actor,
    guild_id: GuildId,
    channel_id: ChannelId,
    query: &str,
) -> AudioResult<CreateEmbed> {
    let embed = match controller.play(actor, guild_id, channel_id, query).await? {
        PlayOutcome::Started(track) => embeds::create_started_embed(&track),
        PlayOutcome::Queued { track, position } => embeds::create_track_added_embed(&track, position),
        PlayOutcome::PlaylistQueued {
            name,
            count,
            started,
        } => embeds::create_playlist_added_embed(&name, count, started.as_ref()),
        PlayOutcome::NoResults => embeds::create_info_embed(
            "🔍 Sin Resultados",
            &format!("No se encontró nada para **{}**", query.trim()),
        ),
    };
    Ok(embed)
}

fn actor_from(command: &CommandInteraction) -> Actor {
    match &command.member {
        Some(member) => actor_for(command.user.id, member.permissions, member.roles.clone()),
        None => actor_for(command.user.id, None, Vec::new()),
    }
}

fn actor_for(user_id: UserId, permissions: Option<Permissions>, roles: Vec<RoleId>) -> Actor {
    let is_admin = permissions.is_some_and(|p| p.administrator());
    Actor::new(user_id, is_admin, roles)
}

/// Canal de voz en el que está el usuario, según la caché
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> AudioResult<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| AudioError::Voice("servidor no encontrado en caché".to_string()))?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| AudioError::validation("debes estar en un canal de voz"))
}

fn string_option<'a>(options: &[ResolvedOption<'a>], name: &str) -> Option<&'a str> {
    options.iter().find(|opt| opt.name == name).and_then(|opt| match opt.value {
        ResolvedValue::String(value) => Some(value),
        _ => None,
    })
}

fn integer_option(options: &[ResolvedOption<'_>], name: &str) -> Option<i64> {
    options.iter().find(|opt| opt.name == name).and_then(|opt| match opt.value {
        ResolvedValue::Integer(value) => Some(value),
        _ => None,
    })
}

fn required_integer(options: &[ResolvedOption<'_>], name: &str) -> AudioResult<i64> {
    integer_option(options, name)
        .ok_or_else(|| AudioError::validation(format!("falta el valor de '{}'", name)))
}

fn role_option(options: &[ResolvedOption<'_>], name: &str) -> Option<RoleId> {
    options.iter().find(|opt| opt.name == name).and_then(|opt| match opt.value {
        ResolvedValue::Role(role) => Some(role.id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_permission_makes_admin_actor() {
        let actor = actor_for(UserId::new(1), Some(Permissions::ADMINISTRATOR), Vec::new());
        assert!(actor.is_admin);

        let actor = actor_for(
            UserId::new(1),
            Some(Permissions::MANAGE_GUILD),
            vec![RoleId::new(5)],
        );
        assert!(!actor.is_admin);
        assert_eq!(actor.roles, vec![RoleId::new(5)]);
    }

    #[test]
    fn missing_permissions_are_not_admin() {
        assert!(!actor_for(UserId::new(1), None, Vec::new()).is_admin);
    }
}
