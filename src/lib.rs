pub mod checksum;
pub mod config;
pub mod context;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod export;
pub mod fs_util;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod receipt;
pub mod reconcile;
pub mod template;
pub mod transport;
pub mod tui;
