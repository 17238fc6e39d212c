pub mod keyboard;
pub mod layout;
pub mod window;

pub use keyboard::{KeyCode, Modifiers, Shortcut};
pub use layout::{ChangeCause, LayoutRecord, LayoutsChanged};
pub use window::{AxWindow, AxWindowRef, OnScreenWindow, RunningApp, WindowBounds, WindowDescriptor};
