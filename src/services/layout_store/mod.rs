mod backend;
mod codec;
mod store;

pub use backend::{JsonFileStore, KeyValueStore, MemoryStore};
pub use store::LayoutStore;
