//! Message encoding and decoding.
//!
//! Frame format: `[message_type: u8][postcard body]`, one frame per websocket
//! binary message. Inbound frames may instead be a zlib stream, recognised by
//! its two-byte header. [`encode`] refuses tags from `0x78` up, so the two
//! never collide. JSON sub-fields travel as strings and are parsed here.

use crate::error::ProtocolError;
use crate::protocol::{ChatMessage, EntityDelta, EntityOperation, Message, MessageType, PeerInfo};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use voxlink_core::{ChunkData, VoxelUpdate};

/// First byte of every zlib stream (deflate, 32K window).
pub const ZLIB_CMF: u8 = 0x78;

/// Second header byte for the four standard compression levels.
const ZLIB_FLG: [u8; 4] = [0x01, 0x5E, 0x9C, 0xDA];

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireBody {
    json: Option<String>,
    text: Option<String>,
    peers: Vec<WirePeer>,
    entities: Vec<WireEntity>,
    chunks: Vec<ChunkData>,
    updates: Vec<VoxelUpdate>,
    chat: Option<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePeer {
    id: String,
    username: String,
    metadata: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEntity {
    operation: u8,
    id: String,
    kind: String,
    metadata: Option<String>,
}

/// Whether a frame starts with a zlib header.
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == ZLIB_CMF && ZLIB_FLG.contains(&data[1])
}

/// Decode one inbound frame, inflating it first when compressed.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }

    if is_compressed(data) {
        let mut inflated = Vec::with_capacity(data.len() * 4);
        ZlibDecoder::new(data)
            .read_to_end(&mut inflated)
            .map_err(ProtocolError::Decompress)?;
        return decode_frame(&inflated);
    }

    decode_frame(data)
}

/// Encode a message into an uncompressed frame.
///
/// Fails with [`ProtocolError::ReservedTag`] for tags at or above
/// [`ZLIB_CMF`].
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let tag = message.kind.tag();
    if tag >= ZLIB_CMF {
        return Err(ProtocolError::ReservedTag(tag));
    }

    let body = WireBody {
        json: message.json.as_ref().map(to_json_string).transpose()?,
        text: message.text.clone(),
        peers: message
            .peers
            .iter()
            .map(|peer| {
                Ok(WirePeer {
                    id: peer.id.clone(),
                    username: peer.username.clone(),
                    metadata: Some(to_json_string(&peer.metadata)?),
                })
            })
            .collect::<Result<_, ProtocolError>>()?,
        entities: message
            .entities
            .iter()
            .map(|entity| {
                Ok(WireEntity {
                    operation: entity.operation as u8,
                    id: entity.id.clone(),
                    kind: entity.kind.clone(),
                    metadata: entity.metadata.as_ref().map(to_json_string).transpose()?,
                })
            })
            .collect::<Result<_, ProtocolError>>()?,
        chunks: message.chunks.clone(),
        updates: message.updates.clone(),
        chat: message.chat.clone(),
    };

    let payload = postcard::to_allocvec(&body)?;

    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(tag);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Zlib-compress an encoded frame the way the server does for large payloads.
pub fn compress(frame: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(frame.len() / 2), Compression::default());
    encoder
        .write_all(frame)
        .map_err(ProtocolError::Decompress)?;
    encoder.finish().map_err(ProtocolError::Decompress)
}

fn decode_frame(data: &[u8]) -> Result<Message, ProtocolError> {
    let (&tag, payload) = data.split_first().ok_or(ProtocolError::Empty)?;
    let body: WireBody = postcard::from_bytes(payload)?;

    let peers = body
        .peers
        .into_iter()
        .map(|peer| {
            Ok(PeerInfo {
                id: peer.id,
                username: peer.username,
                metadata: parse_json("peers.metadata", peer.metadata)?.unwrap_or(Value::Null),
            })
        })
        .collect::<Result<_, ProtocolError>>()?;

    let entities = body
        .entities
        .into_iter()
        .map(|entity| {
            let operation = EntityOperation::from_u8(entity.operation)
                .ok_or(ProtocolError::UnknownEntityOperation(entity.operation))?;
            Ok(EntityDelta {
                operation,
                id: entity.id,
                kind: entity.kind,
                metadata: parse_json("entities.metadata", entity.metadata)?,
            })
        })
        .collect::<Result<_, ProtocolError>>()?;

    Ok(Message {
        kind: MessageType::from_tag(tag),
        json: parse_json("json", body.json)?,
        text: body.text,
        peers,
        entities,
        chunks: body.chunks,
        updates: body.updates,
        chat: body.chat,
    })
}

/// Empty strings are how the server spells "absent".
fn parse_json(field: &'static str, raw: Option<String>) -> Result<Option<Value>, ProtocolError> {
    match raw {
        Some(text) if !text.is_empty() => serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| ProtocolError::Json { field, source }),
        _ => Ok(None),
    }
}

fn to_json_string(value: &Value) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(|source| ProtocolError::Json {
        field: "json",
        source,
    })
}
