pub mod canvas;
pub mod context;
pub mod gnomonic;
pub mod mapper;
pub mod spherical;
pub mod view;

// Re-export main types
pub use canvas::{CanvasImage, Rect};
pub use context::ScanlineTextureMapperContext;
pub use gnomonic::GnomonicScanlineTextureMapper;
pub use mapper::{MapperState, ScanlineTextureMapper, TextureColorizer};
pub use spherical::SphericalScanlineTextureMapper;
pub use view::{Projection, ViewParams};

use crate::core::config::RenderConfig;
use crate::tiles::stacked_loader::StackedTileLoader;
use crate::Result;
use std::sync::Arc;

/// Builds the texture mapper for `projection`
pub fn create_mapper(
    projection: Projection,
    loader: Arc<StackedTileLoader>,
    config: &RenderConfig,
) -> Result<Box<dyn ScanlineTextureMapper + Send>> {
    Ok(match projection {
        Projection::Spherical => Box::new(SphericalScanlineTextureMapper::new(loader, config)?),
        Projection::Gnomonic => Box::new(GnomonicScanlineTextureMapper::new(loader, config)?),
    })
}
