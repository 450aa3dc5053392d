//! Gamelog Watcher - incremental game log tailer and event classifier.

pub mod config;
pub mod display;
pub mod store;
pub mod watcher;
