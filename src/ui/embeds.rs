use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    controller::NowPlaying,
    queue::QueuePage,
    session::{PlaybackState, SessionSnapshot},
    track::Track,
};
use crate::error::AudioError;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Quasar Music";

pub const QUEUE_PAGE_SIZE: usize = 10;
pub const HISTORY_DISPLAY: usize = 10;

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Traduce un error del núcleo de audio a un mensaje para el usuario
pub fn create_audio_error_embed(error: &AudioError) -> CreateEmbed {
    let (title, description) = describe_error(error);
    let embed = create_error_embed(title, &description);
    if error.is_transient() {
        embed.color(colors::WARNING_ORANGE)
    } else {
        embed
    }
}

fn describe_error(error: &AudioError) -> (&'static str, String) {
    match error {
        AudioError::Validation(msg) => ("Solicitud inválida", capitalize(msg)),
        AudioError::Unauthorized(msg) => ("Sin permiso", capitalize(msg)),
        AudioError::SessionGone => (
            "Sin sesión activa",
            "No hay ninguna sesión de música activa en este servidor".to_string(),
        ),
        AudioError::NodeUnavailable => (
            "Servidor de audio no disponible",
            "El servidor de audio está reconectando, inténtalo en unos segundos".to_string(),
        ),
        AudioError::NodeTimeout => (
            "Servidor de audio lento",
            "El servidor de audio no respondió a tiempo, inténtalo de nuevo".to_string(),
        ),
        AudioError::Node(_) => (
            "Error de reproducción",
            "El servidor de audio rechazó la operación".to_string(),
        ),
        AudioError::Voice(_) => (
            "Error de voz",
            "No se pudo conectar al canal de voz. Revisa los permisos del bot".to_string(),
        ),
        AudioError::Storage(_) => (
            "Error interno",
            "No se pudo guardar la configuración del servidor".to_string(),
        ),
    }
}

pub fn create_track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{}**", track.title()))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artista", track.author(), true)
        .field("⏱️ Duración", track_length(track), true)
        .field("📍 Posición", position.to_string(), true);

    embed = with_track_links(embed, track);
    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_playlist_added_embed(name: &str, count: usize, started: Option<&Track>) -> CreateEmbed {
    let description = if count == 1 {
        format!("Se agregó **1 canción** de **{}**", name)
    } else {
        format!("Se agregaron **{} canciones** de **{}**", count, name)
    };

    let mut embed = CreateEmbed::default()
        .title("📋 Playlist Agregada")
        .description(description)
        .color(colors::SUCCESS_GREEN);

    if let Some(track) = started {
        embed = embed.field("▶️ Reproduciendo", format!("**{}**", track.title()), false);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_started_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title()))
        .color(colors::MUSIC_PURPLE)
        .field("🎤 Artista", track.author(), true)
        .field("⏱️ Duración", track_length(track), true);

    if let Some(requester) = track.requester() {
        embed = embed.field("👤 Solicitado por", format!("<@{}>", requester), true);
    }

    embed = with_track_links(embed, track);
    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_now_playing_embed(now: &NowPlaying) -> CreateEmbed {
    let status = match now.state {
        PlaybackState::Paused => "⏸️ Pausado",
        _ => "▶️ Reproduciendo",
    };

    let progress = if now.track.is_stream() {
        format!("🔴 En vivo · {}", format_duration(now.position))
    } else {
        format!(
            "{} {} / {}",
            progress_bar(now.position, now.track.duration()),
            format_duration(now.position),
            format_duration(now.track.duration())
        )
    };

    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**\n{}", now.track.title(), progress))
        .color(colors::MUSIC_PURPLE)
        .field("🎤 Artista", now.track.author(), true)
        .field("📡 Estado", status, true)
        .field("🔂 Repetición", on_off(now.loop_mode), true)
        .field("📻 Autoplay", on_off(now.autoplay), true);

    if let Some(requester) = now.track.requester() {
        embed = embed.field("👤 Solicitado por", format!("<@{}>", requester), true);
    }

    embed = with_track_links(embed, &now.track);
    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_queue_embed(snapshot: &SessionSnapshot, page: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if snapshot.current.is_none() && snapshot.queue.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &snapshot.current {
        let status = if snapshot.loop_mode { "🔂" } else { "▶️" };
        embed = embed.field(
            format!("{} Reproduciendo", status),
            format!("**{}** - {}", current.title(), current.author()),
            false,
        );
    }

    let queue_page = QueuePage::from_tracks(&snapshot.queue, page, QUEUE_PAGE_SIZE);
    if !queue_page.items.is_empty() {
        let lines: Vec<String> = queue_page
            .items
            .iter()
            .enumerate()
            .map(|(i, track)| {
                format!(
                    "**{}**. {} - {} `[{}]`",
                    queue_page.first_position + i,
                    track.title(),
                    track.author(),
                    track_length(track)
                )
            })
            .collect();
        embed = embed.field("⏭️ Próximas", lines.join("\n"), false);
    }

    let total = humantime::format_duration(Duration::from_secs(
        snapshot.total_duration().as_secs(),
    ));
    embed
        .footer(CreateEmbedFooter::new(format!(
            "Página {}/{} • {} canciones • {} en total",
            queue_page.current_page, queue_page.total_pages, queue_page.total_items, total
        )))
        .timestamp(Timestamp::now())
}

pub fn create_history_embed(snapshot: &SessionSnapshot) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("🕘 Historial")
        .color(colors::INFO_BLUE);

    if snapshot.history.is_empty() {
        return embed
            .description("Todavía no se ha reproducido nada")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    let lines: Vec<String> = snapshot
        .history
        .iter()
        .take(HISTORY_DISPLAY)
        .enumerate()
        .map(|(i, entry)| {
            format!(
                "**{}**. {} - {} <t:{}:R>",
                i + 1,
                entry.track.title(),
                entry.track.author(),
                entry.played_at.timestamp()
            )
        })
        .collect();

    embed
        .description(lines.join("\n"))
        .footer(CreateEmbedFooter::new(format!(
            "Mostrando {} de {}",
            lines.len(),
            snapshot.history.len()
        )))
        .timestamp(Timestamp::now())
}

pub fn create_volume_embed(volume: u16, changed: bool) -> CreateEmbed {
    let title = if changed { "🔊 Volumen Actualizado" } else { "🔊 Volumen" };
    CreateEmbed::default()
        .title(title)
        .description(format!("{} **{}%**", volume_bar(volume), volume))
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn with_track_links(mut embed: CreateEmbed, track: &Track) -> CreateEmbed {
    if let Some(uri) = track.uri() {
        embed = embed.url(uri);
    }
    if let Some(artwork) = track.artwork_url() {
        embed = embed.thumbnail(artwork);
    }
    embed
}

fn track_length(track: &Track) -> String {
    if track.is_stream() {
        "🔴 En vivo".to_string()
    } else {
        format_duration(track.duration())
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "Activado"
    } else {
        "Desactivado"
    }
}

fn capitalize(msg: &str) -> String {
    let mut chars = msg.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn progress_bar(position: Duration, total: Duration) -> String {
    const WIDTH: usize = 15;
    let filled = if total.is_zero() {
        0
    } else {
        ((position.as_secs_f64() / total.as_secs_f64()) * WIDTH as f64).round() as usize
    };
    let filled = filled.min(WIDTH);
    format!("{}🔘{}", "▬".repeat(filled), "▬".repeat(WIDTH - filled))
}

fn volume_bar(volume: u16) -> String {
    let filled = (usize::from(volume) / 20).min(10);
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn formats_short_and_long_durations() {
        assert_eq!(format_duration(Duration::from_secs(65)), "1:05");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 7)), "3:00:07");
    }

    #[test]
    fn session_gone_reads_as_no_active_session() {
        let (title, _) = describe_error(&AudioError::SessionGone);
        assert_eq!(title, "Sin sesión activa");
    }

    #[test]
    fn validation_message_is_capitalized() {
        let (_, description) = describe_error(&AudioError::validation("la cola está llena"));
        assert_eq!(description, "La cola está llena");
    }

    #[test]
    fn bars_stay_within_width() {
        assert_eq!(volume_bar(200), "██████████");
        assert_eq!(volume_bar(0), "░░░░░░░░░░");
        let bar = progress_bar(Duration::from_secs(500), Duration::from_secs(100));
        assert!(bar.ends_with("🔘"));
    }
}
