use anyhow::Result;
use serenity::{
    http::Http,
    model::{gateway::GatewayIntents, id::ApplicationId},
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod auth;
mod bot;
mod config;
mod error;
mod storage;
mod ui;

use crate::audio::controller::MusicController;
use crate::audio::dispatcher::TrackEndDispatcher;
use crate::audio::node::{AudioNodeClient, NodeApi, NodeIdentity, NodeState};
use crate::audio::registry::SessionRegistry;
use crate::audio::voice::{SongbirdGateway, VoiceConnectionManager};
use crate::bot::QuasarMusicBot;
use crate::config::Config;
use crate::storage::SettingsStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quasar_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Quasar Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("⚙️ {}", config.summary());

    let settings = Arc::new(
        SettingsStore::new(config.data_dir.clone(), config.default_volume).await?,
    );

    // El nodo necesita el id del bot antes de abrir el WebSocket
    let user_id = Http::new(&config.discord_token)
        .get_current_user()
        .await?
        .id;

    info!("🎼 Inicializando nodo de audio...");
    let shutdown = CancellationToken::new();
    let identity = NodeIdentity::load_or_create(&config.data_dir).await?;
    let (node, node_events) = AudioNodeClient::new(&config, user_id, identity, shutdown.clone())?;
    info!("🆔 Identificador del cliente: {}", node.identifier());
    node.connect();
    tokio::spawn(log_node_state(node.subscribe_state()));

    let node_api: Arc<dyn NodeApi> = node.clone();
    let registry = Arc::new(SessionRegistry::new(
        config.max_queue_size,
        config.history_capacity,
    ));

    let songbird = Songbird::serenity();
    let voice = Arc::new(VoiceConnectionManager::new(
        Arc::new(SongbirdGateway::new(songbird.clone())),
        node_api.clone(),
        registry.clone(),
    ));

    let dispatcher = Arc::new(TrackEndDispatcher::new(
        registry.clone(),
        node_api.clone(),
        voice.clone(),
        settings.clone(),
        config.search_prefix.clone(),
    ));
    tokio::spawn(dispatcher.clone().run(node_events));

    let controller = Arc::new(MusicController::new(
        registry,
        node_api,
        voice,
        settings,
        dispatcher,
        config.search_prefix.clone(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = QuasarMusicBot::new(config.clone(), controller);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .application_id(ApplicationId::new(config.application_id))
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn log_node_state(mut state: watch::Receiver<NodeState>) {
    while state.changed().await.is_ok() {
        match *state.borrow_and_update() {
            NodeState::Ready => info!("✅ Nodo de audio listo"),
            NodeState::Connecting => info!("🔄 Conectando al nodo de audio..."),
            NodeState::Disconnected => warn!("❌ Nodo de audio desconectado"),
        }
    }
}
