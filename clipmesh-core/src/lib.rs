//! Protocol, codec, and chunked-transfer engine shared by `clipmesh-hub`
//! and `clipmesh-spoke`.

pub mod chunking;
pub mod codec;
pub mod config;
pub mod error;
pub mod item;
pub mod protocol;
pub mod transfer;

pub use error::{Error, Result};
