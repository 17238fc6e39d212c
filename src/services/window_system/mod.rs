//! WindowSystem: responsibility and boundaries
//!
//! This module and its submodules are responsible ONLY for talking to the platform:
//! enumerating on-screen windows, the running-application registry and the
//! accessibility surface. They MUST NOT contain matching heuristics or layout
//! bookkeeping. Those belong to the capture/restore engines and the layout store.

mod dry_run;
mod osascript;
mod r#trait;

pub use self::dry_run::DryRunDesktop;
pub use self::osascript::OsascriptBackend;
pub use self::r#trait::{create_platform, Accessibility, AppRegistry, Platform, WindowServer};
