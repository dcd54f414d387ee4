//! Pure Rust async client for the Teeworlds/DDNet server info query protocol,
//! covering the vanilla, 64-player legacy and extended response dialects.
pub mod error;
pub mod info;
pub mod packet;
pub mod query;
mod parse;
