pub mod activation;
pub mod archive;
pub mod catalog;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod flags;
pub mod http;
pub mod installer;
pub mod package;
pub mod partition;
pub mod progress;
pub mod runtime;
pub mod store;
pub mod sysimage;
pub mod updater;
pub mod verify;
