pub mod capture_engine;
pub mod exclusion;
pub mod layout_service;
pub mod layout_store;
pub mod restore_engine;
pub mod shortcut_registry;
pub mod window_matcher;
pub mod window_system;

pub use capture_engine::CaptureEngine;
pub use layout_service::{LayoutService, LayoutServiceHandle};
pub use layout_store::{JsonFileStore, KeyValueStore, LayoutStore, MemoryStore};
pub use restore_engine::{DescriptorOutcome, RestoreEngine, RestoreReport, SkipReason};
pub use shortcut_registry::ShortcutRegistry;
pub use window_matcher::MatchKind;
pub use window_system::create_platform;
