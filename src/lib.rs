pub mod cleanup;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod ledger;
pub mod link;
pub mod manifest;
pub mod runtime;
pub mod source;
