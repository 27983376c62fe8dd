#![forbid(unsafe_code)]

pub mod cleanup;
pub mod config;
pub mod download;
pub mod error;
pub mod format;
pub mod info;
pub mod jobs;
pub mod platform;
pub mod progress;
pub mod tool;
