pub mod checksum;
pub mod chunk;
pub mod disk;

pub use checksum::ChunkChecksum;
pub use chunk::{chunk_file_name, parse_chunk_index, ChunkStore, ChunkStoreConfig, ChunkWriter, SealedChunk};
