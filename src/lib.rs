pub mod app;
pub mod archive;
pub mod browser;
pub mod chrome;
pub mod clock;
pub mod compress;
pub mod config;
pub mod daily;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod indexer;
pub mod jobs;
pub mod logging;
pub mod notify;
pub mod output;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod sweeper;
pub mod tools;
pub mod tui;
pub mod web;
