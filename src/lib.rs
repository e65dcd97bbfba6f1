pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod manifest;
pub mod nats;
pub mod pipeline;
pub mod store;
pub mod upload;

pub use capture::{
    CaptureConfig, CaptureSession, CaptureSource, MediaFrame, SessionState, SourceFactory,
    SyntheticConfig, SyntheticSource, SyntheticSourceFactory,
};
pub use config::Config;
pub use error::{CourierError, FailureClass, RemoteStoreError};
pub use events::{EventBus, PipelineEvent};
pub use http::{create_router, AppState};
pub use manifest::{ChunkStatus, ManifestEntry, UploadManifest};
pub use nats::{CatalogPublisher, ChunkFailedMessage, ChunkUploadedMessage, SessionStoppedMessage};
pub use pipeline::{PipelineConfig, PipelineStats, RecordingPipeline};
pub use store::{ChunkChecksum, ChunkStore, ChunkStoreConfig, SealedChunk};
pub use upload::{
    CredentialsProvider, FsRemoteStore, MultipartConfig, MultipartUploader, QueueConfig,
    RemoteStore, RetryPolicy, StaticCredentials, UploadQueue,
};
