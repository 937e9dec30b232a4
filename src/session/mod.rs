//! Session membership: the server registry and the client-side event interfaces

pub mod observer;
pub mod registry;

pub use observer::{AudioSink, NullObserver, SessionObserver};
pub use registry::{ClientRecord, SessionRegistry};
