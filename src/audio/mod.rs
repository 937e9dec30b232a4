//! Audio subsystem module

pub mod buffer;
pub mod device;
pub mod mixer;
pub mod pipeline;
pub mod stream;
pub mod vad;

pub use buffer::{outbound_queue, OutboundQueue, OutboundReceiver, PeerQueues};
pub use device::{list_devices, AudioDeviceInfo};
pub use mixer::{reconcile, Mixer};
pub use pipeline::{AudioPipeline, PipelineStats};
pub use stream::AudioStreams;
pub use vad::{rms, SpeakingTracker};
