pub mod assets;
pub mod core;

pub use assets::{
    cache::{AssetInfo, CacheStore},
    config::{AssetConfig, AssetSource, AuthConfig, SourceKind, UnpackFormat},
    download::{Downloader, FetchError},
    manager::{AssetManager, AssetManagerBuilder, AssetStatus},
    AssetError, AssetResult,
};
pub use self::core::settings::ProjectConfig;
