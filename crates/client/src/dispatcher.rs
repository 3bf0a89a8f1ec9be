//! Routing of decoded server messages into the collaborators.

use crate::chunk_queue::{ChunkMode, ChunkQueue};
use crate::collaborators::Collaborators;
use crate::error::IdentityConflictError;
use crate::reconciler;
use serde_json::Value;
use tracing::{debug, info, warn};
use voxlink_core::WorldParams;
use voxlink_net::{Message, MessageType, PeerInfo};

/// Block registry data held back until assets finish loading.
#[derive(Debug, Clone)]
struct PendingInit {
    blocks: Value,
    ranges: Value,
}

/// Stateful message router.
///
/// Tracks the client identity and readiness; everything else lives in the
/// collaborators.
#[derive(Debug, Default)]
pub struct Dispatcher {
    id: Option<String>,
    pending_init: Option<PendingInit>,
    ready: bool,
}

impl Dispatcher {
    /// Router with no established identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Router that already owns an identity; a different one from the
    /// server is a conflict.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Established client identifier.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether the ready signal has fired.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Route one message.
    ///
    /// Entity deltas are applied first regardless of type. Only `INIT` can
    /// fail, and only on an identity conflict.
    pub fn dispatch(
        &mut self,
        message: Message,
        collab: &mut Collaborators,
        queue: &mut ChunkQueue,
    ) -> Result<(), IdentityConflictError> {
        for delta in &message.entities {
            collab.entities.apply(delta);
        }

        let kind = message.kind;
        match kind {
            MessageType::Init => self.on_init(message, collab)?,
            MessageType::Join => {
                let Some(peer_id) = message.text.as_deref() else {
                    return Ok(());
                };
                if self.is_self_or_unknown(peer_id) {
                    return Ok(());
                }
                let peer = message
                    .peers
                    .iter()
                    .find(|peer| peer.id == peer_id)
                    .cloned()
                    .unwrap_or_else(|| PeerInfo {
                        id: peer_id.to_string(),
                        username: String::new(),
                        metadata: Value::Null,
                    });
                info!(peer = %peer.id, "Peer joined");
                collab.peers.add_peer(&peer);
            }
            MessageType::Leave => {
                if let Some(peer_id) = message.text.as_deref() {
                    info!(peer = %peer_id, "Peer left");
                    collab.peers.remove_peer(peer_id);
                }
            }
            MessageType::Peer => {
                for peer in &message.peers {
                    if self.id.as_deref() != Some(peer.id.as_str()) {
                        collab.peers.update_peer(peer);
                    }
                }
            }
            MessageType::Load => {
                debug!(chunks = message.chunks.len(), "Chunks delivered");
                for chunk in message.chunks {
                    queue.on_payload_received(chunk, ChunkMode::Fresh);
                }
            }
            MessageType::Chat => {
                if let Some(chat) = &message.chat {
                    collab.chat.add(chat);
                }
            }
            MessageType::Update => {
                reconciler::reconcile(
                    &message.updates,
                    collab.block_cache.as_mut(),
                    collab.chunks.as_mut(),
                    collab.particles.as_mut(),
                );
                for chunk in message.chunks {
                    queue.on_payload_received(chunk, ChunkMode::Update);
                }
            }
            MessageType::Error => {
                warn!(
                    text = message.text.as_deref().unwrap_or(""),
                    json = ?message.json,
                    "Server reported an error"
                );
            }
            MessageType::Entity => {}
            other => debug!(kind = %other, "Message ignored"),
        }

        Ok(())
    }

    /// Fire the ready signal once `INIT` has arrived and assets are loaded.
    ///
    /// Returns `true` exactly once.
    pub fn poll_ready(&mut self, collab: &mut Collaborators) -> bool {
        if self.ready || !collab.assets.is_loaded() {
            return false;
        }
        let Some(init) = self.pending_init.take() else {
            return false;
        };
        collab.registry.load(&init.blocks, &init.ranges);
        self.ready = true;
        info!("Client ready");
        true
    }

    fn on_init(
        &mut self,
        message: Message,
        collab: &mut Collaborators,
    ) -> Result<(), IdentityConflictError> {
        let json = message.json.unwrap_or(Value::Null);

        if let Some(assigned) = json.get("id").and_then(Value::as_str) {
            match &self.id {
                Some(local) if local != assigned => {
                    return Err(IdentityConflictError {
                        local: local.clone(),
                        assigned: assigned.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    info!(id = %assigned, "Client id assigned");
                    self.id = Some(assigned.to_string());
                }
            }
        }

        if let Some(raw) = json.get("params") {
            match WorldParams::from_json(raw) {
                Ok(params) => collab.chunks.configure(params),
                Err(err) => warn!(error = %err, "Ignoring malformed world parameters"),
            }
        }

        for peer in &message.peers {
            if self.id.as_deref() != Some(peer.id.as_str()) {
                collab.peers.add_peer(peer);
            }
        }

        if !self.ready {
            self.pending_init = Some(PendingInit {
                blocks: json.get("blocks").cloned().unwrap_or(Value::Null),
                ranges: json.get("ranges").cloned().unwrap_or(Value::Null),
            });
        }
        Ok(())
    }

    fn is_self_or_unknown(&self, peer_id: &str) -> bool {
        match &self.id {
            None => true,
            Some(own) => own == peer_id,
        }
    }
}
