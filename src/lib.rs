pub mod config;
pub mod feed;
pub mod format;
pub mod notify;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod watcher;
