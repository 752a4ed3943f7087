use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dancesync_core::{
    bpm_inbox, BpmFileWatcher, BpmListener, BpmSample, BpmSource, ConfigManager,
    DanceSyncController, DEFAULT_BPM_PORT,
};
use tokio::net::UdpSocket;

mod avatar;

use avatar::LoggingAvatar;

/// Syncs avatar dance playback speed to a live BPM feed.
#[derive(Parser, Debug)]
#[command(name = "dancesync")]
#[command(about = "BPM-driven dance speed sync")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for BPM updates and drive the dance playback rate
    Listen {
        /// Configuration file (created with defaults if missing)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the UDP port from the configuration
        #[arg(long)]
        port: Option<u16>,

        /// Also read BPM from this JSON file ({"currentBPM": 128})
        #[arg(long)]
        bpm_file: Option<PathBuf>,

        /// Start dancing this clip right away
        #[arg(long)]
        dance_clip: Option<u32>,

        /// Seconds between source status reports
        #[arg(long, default_value = "10")]
        status_secs: u64,
    },

    /// Send BPM datagrams to a listener
    Send {
        /// Tempo to send
        #[arg(long)]
        bpm: f32,

        /// Listener address
        #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_BPM_PORT)))]
        target: SocketAddr,

        /// Number of datagrams to send
        #[arg(long, default_value = "1")]
        repeat: u32,

        /// Delay between datagrams in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match args.command {
        Command::Listen {
            config,
            port,
            bpm_file,
            dance_clip,
            status_secs,
        } => listen(config, port, bpm_file, dance_clip, status_secs).await,
        Command::Send {
            bpm,
            target,
            repeat,
            interval_ms,
        } => send(bpm, target, repeat, interval_ms).await,
    }
}

async fn listen(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    bpm_file: Option<PathBuf>,
    dance_clip: Option<u32>,
    status_secs: u64,
) -> Result<(), anyhow::Error> {
    let mut config_manager = ConfigManager::new(config_path);
    let mut settings = config_manager
        .load()
        .with_context(|| format!("loading {:?}", config_manager.config_path()))?;

    if let Some(port) = port {
        settings.listen_port = port;
    }
    if bpm_file.is_some() {
        settings.bpm_file = bpm_file;
    }
    if let Err(errors) = ConfigManager::validate_settings(&settings) {
        anyhow::bail!("Invalid configuration: {}", errors.join(", "));
    }

    log::info!("Configuring dance sync:");
    log::info!("UDP: {}", settings.listener_config().socket_addr());
    log::info!("Clips with reference BPM: {}", settings.clip_references.len());
    if let Some(path) = &settings.bpm_file {
        log::info!("BPM file: {:?}", path);
    }

    let (publisher, inbox) = bpm_inbox();
    let mut sources: Vec<Box<dyn BpmSource>> = vec![Box::new(BpmListener::new(
        settings.listener_config(),
        publisher.clone(),
    ))];
    if let Some(file_config) = settings.bpm_file_config() {
        sources.push(Box::new(BpmFileWatcher::new(file_config, publisher)));
    }

    for source in sources.iter_mut() {
        source
            .start()
            .await
            .with_context(|| format!("starting {} source", source.name()))?;
    }

    let mut controller = DanceSyncController::new(
        settings.clip_table(),
        inbox,
        settings.rate_calculator(),
        settings.initial_bpm,
    );
    controller.set_animator_target(Some(Arc::new(LoggingAvatar::new("avatar"))));
    if let Some(clip) = dance_clip {
        controller.set_dance_state(true, clip);
    }

    let mut ticker = tokio::time::interval(settings.tick_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut status_ticker = tokio::time::interval(Duration::from_secs(status_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = controller.tick() {
                    log::warn!("Tempo update not applied: {}", e);
                }
            }
            _ = status_ticker.tick() => {
                for source in &sources {
                    log::info!("{} source: {:?}", source.name(), source.status());
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    log::error!("Failed to wait for Ctrl-C: {}", e);
                }
                log::info!("Shutting down");
                break;
            }
        }
    }

    for source in sources.iter_mut() {
        source.stop().await;
    }
    controller.set_dance_state(false, 0);

    Ok(())
}

async fn send(
    bpm: f32,
    target: SocketAddr,
    repeat: u32,
    interval_ms: u64,
) -> Result<(), anyhow::Error> {
    let sample = BpmSample::new(bpm).context("BPM must be a positive number")?;

    let bind_addr: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    let payload = sample.bpm().to_string();

    let count = repeat.max(1);
    for i in 0..count {
        socket
            .send_to(payload.as_bytes(), target)
            .await
            .with_context(|| format!("sending to {}", target))?;
        log::info!("Sent {} to {}", sample, target);

        if i + 1 < count {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }

    Ok(())
}
