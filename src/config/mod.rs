pub mod env;
mod loader;

pub use env::{AppConfig, DirectoryConfig, GeminiConfig, ModerationConfig};
pub use loader::load_config;
