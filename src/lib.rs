pub mod app;
pub mod bookmarks;
pub mod cli;
pub mod config;
pub mod filter;
pub mod highlight;
pub mod history;
pub mod model;
pub mod offline;
pub mod search;
pub mod session;
pub mod source;
pub mod storage;
pub mod ui;
pub mod window;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
