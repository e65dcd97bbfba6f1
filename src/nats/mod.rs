pub mod client;
pub mod messages;

pub use client::{spawn_event_forwarder, CatalogPublisher};
pub use messages::{ChunkFailedMessage, ChunkUploadedMessage, SessionStoppedMessage};
