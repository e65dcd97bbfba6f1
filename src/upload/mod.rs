pub mod fs_remote;
pub mod multipart;
pub mod queue;
pub mod remote;
pub mod retry;

pub use fs_remote::FsRemoteStore;
pub use multipart::{MultipartConfig, MultipartUploader, DEFAULT_PART_SIZE};
pub use queue::{QueueConfig, UploadQueue};
pub use remote::{
    object_key, CredentialsProvider, EncryptionMode, ObjectMetadata, PartReceipt, RemoteStore,
    RemoteUploadId, StaticCredentials,
};
pub use retry::RetryPolicy;
