//! gifttest-core — GIFT parsing, test sessions, scoring, history and explanations.
//!
//! This crate holds the whole practice workflow. Provider adapters and the
//! command-line front end live in `gifttest-providers` and `gifttest-cli`.

pub mod bank;
pub mod cache;
pub mod context;
pub mod error;
pub mod explain;
pub mod history;
pub mod model;
pub mod parser;
pub mod scoring;
pub mod session;
pub mod traits;
