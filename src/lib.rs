pub mod api;
pub mod assets;
pub mod config;
pub mod decode;
pub mod error;
pub mod locator;
pub mod normalize;
pub mod phash;
pub mod ranking;
pub mod reference;
pub mod state;
