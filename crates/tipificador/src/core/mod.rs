//! Core configuration.

pub mod config;

pub use config::{ServiceConfig, THUMB_WIDTH, VIEW_WIDTH};
