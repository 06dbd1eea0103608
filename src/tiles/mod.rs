pub mod base;
pub mod cache;
pub mod decorator;
pub mod download;
pub mod image;
pub mod loader;
pub mod stacked;
pub mod stacked_loader;
pub mod sun;
pub mod texture;

// Re-exports for convenience
pub use loader::TileLoader;
pub use stacked::{CompletionState, StackedTile};
pub use stacked_loader::{StackedTileLoader, TileUpdate};
