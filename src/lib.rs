#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod config;
pub mod controller;
pub mod data;
pub mod logging;
pub mod render;
pub mod session;
pub mod storage;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
