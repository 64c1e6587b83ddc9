//! Asset acquisition: declared assets are fetched once, verified, unpacked
//! when asked to, and published into a shared on-disk cache.

pub mod auth;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod download;
mod error;
pub mod lock;
pub mod manager;
pub mod progress;
pub mod unpack;

pub use error::{AssetError, AssetResult};
