pub mod memory;
pub mod opensearch;
pub mod qdrant;

pub use memory::{MemoryKeywordIndex, MemoryVectorIndex};
pub use opensearch::OpenSearchStore;
pub use qdrant::QdrantStore;
