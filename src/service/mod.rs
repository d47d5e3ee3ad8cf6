pub mod file_watcher;
pub mod server;
pub mod signal;
pub mod stdin;
