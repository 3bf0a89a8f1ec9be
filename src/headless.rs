use crate::config::ClientSettings;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use voxlink_client::{
    BlockBreak, ChatSink, Client, ClientEvent, Collaborators, ParticleSink, PeerRegistry,
};
use voxlink_core::ChunkCoord;
use voxlink_net::{ChatMessage, MessageType, PeerInfo};

pub struct HeadlessConfig {
    pub settings: ClientSettings,
    pub duration: Duration,
}

/// What a headless run observed, printed as JSON on exit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub client_id: String,
    pub assigned_id: Option<String>,
    pub ready: bool,
    pub connections: u32,
    pub disconnects: u32,
    pub chunks_requested: usize,
    pub chunks_loaded: usize,
    pub peers_online: usize,
    pub chat_lines: usize,
    pub blocks_broken: usize,
    pub server_errors: usize,
    pub frames: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Tally {
    peers: usize,
    chat_lines: usize,
    blocks_broken: usize,
}

/// Collaborators that log what they see and keep counts for the summary.
#[derive(Debug, Clone, Default)]
struct Console(Arc<Mutex<Tally>>);

impl Console {
    fn tally(&self) -> MutexGuard<'_, Tally> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PeerRegistry for Console {
    fn add_peer(&mut self, peer: &PeerInfo) {
        info!(id = %peer.id, username = %peer.username, "Peer joined");
        self.tally().peers += 1;
    }

    fn remove_peer(&mut self, id: &str) {
        info!(%id, "Peer left");
        let mut tally = self.tally();
        tally.peers = tally.peers.saturating_sub(1);
    }

    fn update_peer(&mut self, peer: &PeerInfo) {
        debug!(id = %peer.id, "Peer updated");
    }

    fn reset(&mut self) {
        self.tally().peers = 0;
    }
}

impl ChatSink for Console {
    fn add(&mut self, message: &ChatMessage) {
        info!(kind = %message.kind, sender = %message.sender, "{}", message.body);
        self.tally().chat_lines += 1;
    }
}

impl ParticleSink for Console {
    fn add_break_particles(&mut self, breaks: &[BlockBreak], _count: u32) {
        self.tally().blocks_broken += breaks.len();
    }
}

fn chunk_square(radius: i32) -> Vec<ChunkCoord> {
    let radius = radius.max(0);
    (-radius..=radius)
        .flat_map(|x| (-radius..=radius).map(move |z| ChunkCoord::new(x, z)))
        .collect()
}

pub async fn run(cfg: HeadlessConfig) -> Result<RunSummary> {
    let started = Instant::now();
    let frame_interval = cfg.settings.frame_interval();
    let square = chunk_square(cfg.settings.view_radius);

    let console = Console::default();
    let collab = Collaborators {
        peers: Box::new(console.clone()),
        chat: Box::new(console.clone()),
        particles: Box::new(console.clone()),
        ..Collaborators::default()
    };
    let mut client = Client::new(cfg.settings.into_client_config(), collab);
    let mut events = client.subscribe();
    let mut summary = RunSummary {
        client_id: client.client_id().to_string(),
        ..RunSummary::default()
    };

    info!(client_id = %summary.client_id, "Connecting");
    tokio::time::timeout(cfg.duration, client.connect())
        .await
        .context("no connection before the run ended")?
        .context("failed to connect")?;

    let deadline = started + cfg.duration;
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while Instant::now() < deadline {
        ticker.tick().await;
        client.frame().context("frame failed")?;
        summary.frames += 1;

        loop {
            match events.try_recv() {
                Ok(ClientEvent::Connected) => {
                    summary.connections += 1;
                    let requested = square
                        .iter()
                        .filter(|coord| client.request_chunk(**coord))
                        .count();
                    summary.chunks_requested += requested;
                    debug!(requested, "Requested chunks around origin");
                }
                Ok(ClientEvent::Disconnected { reason }) => {
                    summary.disconnects += 1;
                    warn!(%reason, "Connection lost");
                }
                Ok(ClientEvent::Ready) => info!("World ready"),
                Ok(ClientEvent::Network(message)) if message.kind == MessageType::Error => {
                    summary.server_errors += 1;
                }
                Ok(ClientEvent::Network(_)) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    client.disconnect().context("disconnect failed")?;

    let tally = console.tally();
    summary.assigned_id = client.id().map(str::to_string);
    summary.ready = client.is_ready();
    summary.chunks_loaded = square
        .iter()
        .filter(|coord| client.chunks().contains(**coord))
        .count();
    summary.peers_online = tally.peers;
    summary.chat_lines = tally.chat_lines;
    summary.blocks_broken = tally.blocks_broken;
    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(summary)
}
