//! Protocol message definitions for client-server communication.
//!
//! The message set is closed: every envelope carries one [`MessageType`] and
//! only the fields relevant to that type. Decoders tolerate absent optional
//! fields, so every collection defaults to empty.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use voxlink_core::{ChunkCoord, ChunkData, VoxelUpdate};

/// Discriminant of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Server handshake: identifier, world parameters, block registry, peers.
    Init,
    /// A peer joined.
    Join,
    /// A peer left.
    Leave,
    /// Server-side error report.
    Error,
    /// Peer state snapshots.
    Peer,
    /// Entity-only delta batch.
    Entity,
    /// Chunk delivery (server) or chunk request (client).
    Load,
    /// Chunk release notification (client).
    Unload,
    /// Voxel edits and patched chunks.
    Update,
    /// Remote method call.
    Method,
    /// Chat line.
    Chat,
    /// Opaque transport-level payload for external observers.
    Transport,
    /// Game event.
    Event,
    /// Client action.
    Action,
    /// Server statistics.
    Stats,
    /// Tag outside the known set; preserved so observers can still see it.
    Unknown(u8),
}

impl MessageType {
    /// Wire tag for this type.
    pub fn tag(self) -> u8 {
        match self {
            MessageType::Init => 0,
            MessageType::Join => 1,
            MessageType::Leave => 2,
            MessageType::Error => 3,
            MessageType::Peer => 4,
            MessageType::Entity => 5,
            MessageType::Load => 6,
            MessageType::Unload => 7,
            MessageType::Update => 8,
            MessageType::Method => 9,
            MessageType::Chat => 10,
            MessageType::Transport => 11,
            MessageType::Event => 12,
            MessageType::Action => 13,
            MessageType::Stats => 14,
            MessageType::Unknown(tag) => tag,
        }
    }

    /// Map a wire tag to its symbolic type.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => MessageType::Init,
            1 => MessageType::Join,
            2 => MessageType::Leave,
            3 => MessageType::Error,
            4 => MessageType::Peer,
            5 => MessageType::Entity,
            6 => MessageType::Load,
            7 => MessageType::Unload,
            8 => MessageType::Update,
            9 => MessageType::Method,
            10 => MessageType::Chat,
            11 => MessageType::Transport,
            12 => MessageType::Event,
            13 => MessageType::Action,
            14 => MessageType::Stats,
            other => MessageType::Unknown(other),
        }
    }

    /// Symbolic name as used by the server.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Init => "INIT",
            MessageType::Join => "JOIN",
            MessageType::Leave => "LEAVE",
            MessageType::Error => "ERROR",
            MessageType::Peer => "PEER",
            MessageType::Entity => "ENTITY",
            MessageType::Load => "LOAD",
            MessageType::Unload => "UNLOAD",
            MessageType::Update => "UPDATE",
            MessageType::Method => "METHOD",
            MessageType::Chat => "CHAT",
            MessageType::Transport => "TRANSPORT",
            MessageType::Event => "EVENT",
            MessageType::Action => "ACTION",
            MessageType::Stats => "STATS",
            MessageType::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Unknown(tag) => write!(f, "UNKNOWN({tag})"),
            known => f.write_str(known.name()),
        }
    }
}

/// Presence snapshot of another connected client.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    /// Peer client identifier.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Free-form peer state (position, direction, ...).
    pub metadata: Value,
}

/// Lifecycle operation carried by an entity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityOperation {
    /// Entity appeared.
    Create = 0,
    /// Entity state changed.
    Update = 1,
    /// Entity disappeared.
    Delete = 2,
}

impl EntityOperation {
    /// Map a wire code to an operation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EntityOperation::Create),
            1 => Some(EntityOperation::Update),
            2 => Some(EntityOperation::Delete),
            _ => None,
        }
    }
}

/// A single entity delta.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDelta {
    /// Operation to apply.
    pub operation: EntityOperation,
    /// Entity identifier.
    pub id: String,
    /// Entity type name.
    pub kind: String,
    /// Entity state; absent for deletions.
    pub metadata: Option<Value>,
}

/// A chat line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Channel or category ("chat", "system", ...).
    pub kind: String,
    /// Sender display name.
    pub sender: String,
    /// Message text.
    pub body: String,
}

/// Decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Discriminant.
    pub kind: MessageType,
    /// Structured free-form payload.
    pub json: Option<Value>,
    /// Short text payload (peer id for JOIN/LEAVE, error text for ERROR).
    pub text: Option<String>,
    /// Peer snapshots.
    pub peers: Vec<PeerInfo>,
    /// Entity deltas, processed before any type-specific handling.
    pub entities: Vec<EntityDelta>,
    /// Chunk payloads.
    pub chunks: Vec<ChunkData>,
    /// Voxel edits.
    pub updates: Vec<VoxelUpdate>,
    /// Chat line.
    pub chat: Option<ChatMessage>,
}

impl Message {
    /// Empty message of the given type.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            json: None,
            text: None,
            peers: Vec::new(),
            entities: Vec::new(),
            chunks: Vec::new(),
            updates: Vec::new(),
            chat: None,
        }
    }

    /// Attach a JSON payload.
    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Attach a text payload.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attach peer snapshots.
    pub fn with_peers(mut self, peers: Vec<PeerInfo>) -> Self {
        self.peers = peers;
        self
    }

    /// Attach entity deltas.
    pub fn with_entities(mut self, entities: Vec<EntityDelta>) -> Self {
        self.entities = entities;
        self
    }

    /// Attach chunk payloads.
    pub fn with_chunks(mut self, chunks: Vec<ChunkData>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Attach voxel updates.
    pub fn with_updates(mut self, updates: Vec<VoxelUpdate>) -> Self {
        self.updates = updates;
        self
    }

    /// Outgoing chat line.
    pub fn chat(kind: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        let mut message = Self::new(MessageType::Chat);
        message.chat = Some(ChatMessage {
            kind: kind.into(),
            sender: sender.into(),
            body: body.into(),
        });
        message
    }

    /// Chunk request for the given coordinates.
    pub fn load_request(coords: &[ChunkCoord]) -> Self {
        Self::new(MessageType::Load).with_json(chunk_list(coords))
    }

    /// Chunk release for the given coordinates.
    pub fn unload_request(coords: &[ChunkCoord]) -> Self {
        Self::new(MessageType::Unload).with_json(chunk_list(coords))
    }

    /// Voxel edit batch.
    pub fn update(updates: Vec<VoxelUpdate>) -> Self {
        Self::new(MessageType::Update).with_updates(updates)
    }

    /// Chunk coordinates listed in a LOAD/UNLOAD request payload.
    pub fn requested_chunks(&self) -> Vec<ChunkCoord> {
        self.json
            .as_ref()
            .and_then(|json| json.get("chunks"))
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|pair| {
                        let x = pair.get(0)?.as_i64()?;
                        let z = pair.get(1)?.as_i64()?;
                        Some(ChunkCoord::new(x as i32, z as i32))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn chunk_list(coords: &[ChunkCoord]) -> Value {
    let pairs: Vec<[i32; 2]> = coords.iter().map(|c| [c.x, c.z]).collect();
    json!({ "chunks": pairs })
}
