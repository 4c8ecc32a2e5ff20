use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{
        application::Command, application::CommandOptionType, id::GuildId,
        permissions::Permissions,
    },
    prelude::Context,
};

use crate::storage::MAX_VOLUME;

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<usize> {
    let commands = Command::set_global_commands(&ctx.http, all_commands()).await?;
    Ok(commands.len())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<usize> {
    let commands = guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(commands.len())
}

pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        play_command(),
        skip_command(),
        stop_command(),
        pause_command(),
        resume_command(),
        queue_command(),
        volume_command(),
        loop_command(),
        shuffle_command(),
        clear_command(),
        move_command(),
        remove_command(),
        seek_command(),
        replay_command(),
        autoplay_command(),
        setdj_command(),
        cleardj_command(),
        history_command(),
        nowplaying_command(),
        leave_command(),
        resetmusic_command(),
    ]
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o playlist")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y limpia la cola")
}

fn seek_command() -> CreateCommand {
    CreateCommand::new("seek")
        .description("Salta a un segundo de la canción actual")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "seconds", "Posición en segundos")
                .min_int_value(0)
                .required(true),
        )
}

fn replay_command() -> CreateCommand {
    CreateCommand::new("replay").description("Vuelve a empezar la canción actual")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra información de la canción actual")
}

// Comandos de cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Número de página")
                .min_int_value(1),
        )
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Mezcla la cola de reproducción")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop").description("Activa/desactiva la repetición de la canción actual")
}

fn autoplay_command() -> CreateCommand {
    CreateCommand::new("autoplay")
        .description("Activa/desactiva canciones relacionadas al terminar la cola")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Limpia la cola de reproducción")
}

fn move_command() -> CreateCommand {
    CreateCommand::new("move")
        .description("Mueve una canción dentro de la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "from", "Posición actual")
                .min_int_value(1)
                .required(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "to", "Nueva posición")
                .min_int_value(1)
                .required(true),
        )
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Quita una canción de la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "position", "Posición en la cola")
                .min_int_value(1)
                .required(true),
        )
}

fn history_command() -> CreateCommand {
    CreateCommand::new("history").description("Muestra las últimas canciones reproducidas")
}

// Comandos de audio

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Muestra o ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "level",
                "Nivel de volumen (0-200)",
            )
            .min_int_value(0)
            .max_int_value(u64::from(MAX_VOLUME)),
        )
}

// Comandos de administración

fn setdj_command() -> CreateCommand {
    CreateCommand::new("setdj")
        .description("Define el rol que puede controlar la música")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Role, "role", "Rol de DJ").required(true),
        )
}

fn cleardj_command() -> CreateCommand {
    CreateCommand::new("cleardj").description("Quita la restricción de rol DJ")
}

// Comandos de conexión

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Conecta el bot a tu canal de voz")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}

fn resetmusic_command() -> CreateCommand {
    CreateCommand::new("resetmusic")
        .description("Reinicia el sistema de música en todos los servidores (solo administradores)")
        .default_member_permissions(Permissions::ADMINISTRATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_one_command_per_operation() {
        assert_eq!(all_commands().len(), 22);
    }
}
