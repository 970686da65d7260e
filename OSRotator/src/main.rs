//! 24/7 stream rotation controller.
//!
//! Drives an OBS instance over obs-websocket to loop curated playlist
//! rotations around the clock: downloads fresh content with yt-dlp,
//! swaps content folders between rotations, pauses when the upstream
//! streamer goes live, keeps titles/categories in sync on Twitch and
//! Kick, and survives crashes mid-video.

mod commands;
mod dashboard;
mod logs;
mod orchestrator;

use std::sync::{Arc, RwLock};

use osrconfig::env::EnvSettings;
use osrconfig::ConfigProvider;
use osrobs::{Compositor, ObsManager};
use osrplatforms::kick::KickUpdater;
use osrplatforms::live::{KickLiveChecker, TwitchLiveChecker};
use osrplatforms::twitch::TwitchUpdater;
use osrplatforms::PlatformManager;
use osrplayback::PlaybackMonitor;
use osrrotation::{Components, SceneNames};
use osrstore::Store;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::dashboard::DashboardClient;
use crate::logs::LogHub;
use crate::orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    // ========== Phase 1: environment, logging, configuration ==========
    let env = EnvSettings::load();

    let log_hub = LogHub::new(1000);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(log_hub.layer())
        .init();

    let config = match ConfigProvider::new("config/playlists.json", "config/manual_override.json") {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to open configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.load() {
        error!("Configuration is invalid: {}", e);
        std::process::exit(1);
    }

    let store = match Store::open(std::path::Path::new("stream_data.db")) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    // ========== Phase 2: compositor connection ==========
    let obs = Arc::new(ObsManager::new(
        &env.obs_host,
        env.obs_port,
        &env.obs_password,
        &env.vlc_source_name,
    ));
    if let Err(e) = obs.connect().await {
        error!("Cannot start without a compositor connection: {}", e);
        std::process::exit(1);
    }

    let required_scenes = vec![
        env.scene_pause.clone(),
        env.scene_stream.clone(),
        env.scene_rotation_screen.clone(),
    ];
    match obs.verify_scenes(&required_scenes).await {
        Ok(missing) if missing.is_empty() => info!("All required scenes verified"),
        Ok(missing) => {
            error!("Missing required scenes: {}", missing.join(", "));
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to verify scenes: {}", e);
            std::process::exit(1);
        }
    }

    // ========== Phase 3: platforms ==========
    let mut platforms = PlatformManager::new();

    if env.enable_twitch && !env.twitch_client_id.is_empty() && !env.twitch_client_secret.is_empty()
    {
        let mut broadcaster_id = env.twitch_broadcaster_id.clone();
        if broadcaster_id.is_empty() && !env.twitch_user_login.is_empty() {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client builds");
            match TwitchUpdater::resolve_broadcaster_id(
                &client,
                &env.twitch_client_id,
                &env.twitch_client_secret,
                &env.twitch_user_login,
            )
            .await
            {
                Ok(Some(id)) => broadcaster_id = id,
                Ok(None) => warn!("Twitch broadcaster id not found for {}", env.twitch_user_login),
                Err(e) => warn!("Could not resolve Twitch broadcaster id: {}", e),
            }
        }
        if broadcaster_id.is_empty() {
            warn!("Twitch broadcaster id not configured, Twitch title updates disabled");
        } else {
            platforms.register(Arc::new(TwitchUpdater::new(
                &env.twitch_client_id,
                &env.twitch_client_secret,
                &broadcaster_id,
            )));
        }
    }

    if env.enable_kick && !env.kick_client_id.is_empty() && !env.kick_client_secret.is_empty() {
        platforms.register(Arc::new(KickUpdater::new(
            &env.kick_client_id,
            &env.kick_client_secret,
            &env.kick_channel_id,
            env.kick_token_cache.clone(),
        )));
    }

    if platforms.is_empty() {
        warn!("No streaming platforms enabled. Titles will not be updated.");
    } else {
        info!("Enabled platforms: {}", platforms.enabled_platforms().join(", "));
    }

    // Liveness checking works even when title updates are disabled.
    let twitch_live = (!env.twitch_client_id.is_empty()
        && !env.twitch_client_secret.is_empty()
        && !env.target_twitch_streamer.is_empty())
    .then(|| TwitchLiveChecker::new(&env.twitch_client_id, &env.twitch_client_secret));
    let kick_live = (env.target_kick_streamer.is_some()
        && !env.kick_client_id.is_empty()
        && !env.kick_client_secret.is_empty())
    .then(|| KickLiveChecker::new(&env.kick_client_id, &env.kick_client_secret));

    // ========== Phase 4: component wiring ==========
    let scenes = SceneNames {
        stream: env.scene_stream.clone(),
        pause: env.scene_pause.clone(),
        rotation_screen: env.scene_rotation_screen.clone(),
        media_source: env.vlc_source_name.clone(),
        alert_source: env.alert_source_name.clone(),
    };

    let monitor = PlaybackMonitor::new(obs.events(), &env.vlc_source_name, &env.scene_stream);

    let components = Arc::new(Components {
        store,
        config,
        compositor: obs.clone() as Arc<dyn Compositor>,
        platforms: Arc::new(platforms),
        notifier: osrnotify::Notifier::new(env.discord_webhook_url.clone()),
        downloads: Arc::new(osrdownload::DownloadManager::new()),
        scenes,
    });

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received. Setting shutdown flag...");
            shutdown.cancel();
        });
    }

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let dashboard_state = Arc::new(RwLock::new(serde_json::json!({})));

    if let (Some(url), Some(api_key)) = (env.dashboard_url.clone(), env.dashboard_api_key.clone()) {
        let client = DashboardClient::new(
            url,
            api_key,
            dashboard_state.clone(),
            log_hub.clone(),
            command_tx.clone(),
            shutdown.clone(),
        );
        tokio::spawn(client.run());
    }

    // ========== Phase 5: run ==========
    let mut orchestrator = Orchestrator::new(
        components,
        env,
        obs,
        monitor,
        twitch_live,
        kick_live,
        shutdown.clone(),
        command_rx,
        dashboard_state,
    );

    if let Err(e) = orchestrator.startup().await {
        error!("Startup failed: {}", e);
        std::process::exit(1);
    }

    orchestrator.run().await;
    info!("Rotation controller stopped");
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("signal handler installs");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
