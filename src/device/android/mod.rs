//! Android devices reached through adb

pub mod files;
pub mod foreground;
pub mod handle;
pub mod info;
pub mod listing;
pub mod mirror;
pub mod ui_dump;

pub use foreground::ForegroundApp;
pub use handle::AndroidDevice;
pub use listing::{EntryKind, RemoteEntry};
pub use ui_dump::ClickableElement;
