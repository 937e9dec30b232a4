//! Wire protocol: packet framing and session commands

pub mod command;
pub mod packet;

pub use command::Command;
pub use packet::{encode_audio, AudioPacket, Packet, AUDIO_MARKER, KIND_AUDIO, KIND_COMMAND};
