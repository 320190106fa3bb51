pub mod audio;
pub mod chat;
pub mod config;

pub use audio::*;
pub use chat::*;
pub use config::*;
