//! Datagram framing
//!
//! ```text
//! Command:            [0x00][JSON {"cmd", "args"}]
//! Audio (to server):  [0x01]["SPK!"][0x00][compressed frame]
//! Audio (relayed):    [0x01]["SPK!"][len:u8][name bytes][compressed frame]
//! ```
//!
//! Both audio directions share one layout; the client simply sends an empty
//! speaker name and the server fills it in before relaying.

use bytes::{BufMut, Bytes, BytesMut};

use super::command::Command;
use crate::error::PacketError;

/// Packet kind byte for commands
pub const KIND_COMMAND: u8 = 0;
/// Packet kind byte for audio
pub const KIND_AUDIO: u8 = 1;
/// Marker that opens every audio body
pub const AUDIO_MARKER: &[u8; 4] = b"SPK!";
/// Longest speaker name the one-byte length prefix can carry
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Audio frame plus the identity it is attributed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Speaker name; empty on the client-to-server leg
    pub speaker: String,
    /// Compressed frame bytes, never empty
    pub payload: Bytes,
}

impl AudioPacket {
    /// Client-to-server form, name slot left for the server
    pub fn outbound(payload: Bytes) -> Self {
        Self {
            speaker: String::new(),
            payload,
        }
    }

    /// Server-to-client form with the speaker name injected
    pub fn relayed(speaker: impl Into<String>, payload: Bytes) -> Self {
        Self {
            speaker: speaker.into(),
            payload,
        }
    }
}

/// A decoded datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Command(Command),
    Audio(AudioPacket),
}

impl Packet {
    pub fn encode(&self) -> Result<Bytes, PacketError> {
        match self {
            Packet::Command(cmd) => {
                let body = cmd.to_body()?;
                let mut buf = BytesMut::with_capacity(1 + body.len());
                buf.put_u8(KIND_COMMAND);
                buf.put_slice(&body);
                Ok(buf.freeze())
            }
            Packet::Audio(audio) => encode_audio(&audio.speaker, &audio.payload),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let (&kind, body) = data.split_first().ok_or(PacketError::Empty)?;
        match kind {
            KIND_COMMAND => Command::from_body(body).map(Packet::Command),
            KIND_AUDIO => decode_audio(body).map(Packet::Audio),
            other => Err(PacketError::UnknownKind(other)),
        }
    }
}

impl From<Command> for Packet {
    fn from(cmd: Command) -> Self {
        Packet::Command(cmd)
    }
}

impl From<AudioPacket> for Packet {
    fn from(audio: AudioPacket) -> Self {
        Packet::Audio(audio)
    }
}

/// Encode an audio datagram without building an `AudioPacket` first.
/// The relay hot path uses this to avoid copying the payload.
pub fn encode_audio(speaker: &str, payload: &[u8]) -> Result<Bytes, PacketError> {
    let name = speaker.as_bytes();
    if name.len() > MAX_NAME_LEN {
        return Err(PacketError::NameTooLong(name.len()));
    }
    if payload.is_empty() {
        return Err(PacketError::EmptyPayload);
    }

    let mut buf = BytesMut::with_capacity(1 + AUDIO_MARKER.len() + 1 + name.len() + payload.len());
    buf.put_u8(KIND_AUDIO);
    buf.put_slice(AUDIO_MARKER);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn decode_audio(body: &[u8]) -> Result<AudioPacket, PacketError> {
    let rest = body
        .strip_prefix(AUDIO_MARKER.as_slice())
        .ok_or(PacketError::BadMarker)?;
    let (&name_len, rest) = rest.split_first().ok_or(PacketError::BadMarker)?;
    let name_len = name_len as usize;

    if name_len > rest.len() {
        return Err(PacketError::NameOverflow {
            declared: name_len,
            remaining: rest.len(),
        });
    }

    let (name, payload) = rest.split_at(name_len);
    if payload.is_empty() {
        return Err(PacketError::EmptyPayload);
    }

    let speaker = std::str::from_utf8(name)
        .map_err(|_| PacketError::InvalidName)?
        .to_string();

    Ok(AudioPacket {
        speaker,
        payload: Bytes::copy_from_slice(payload),
    })
}
