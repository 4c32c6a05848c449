pub mod app;
pub mod bootstrap;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod export;
pub mod fs_util;
pub mod gitlab;
pub mod ingest;
pub mod linker;
pub mod metadata;
pub mod output;
pub mod privilege;
pub mod provision;
pub mod resolve;
pub mod workdir;
