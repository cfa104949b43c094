use anyhow::Result;
use async_trait::async_trait;

use crate::model::RenderedImage;

/// Raster-to-vector tracer.
#[async_trait]
pub trait Vectorizer: Send + Sync {
    /// Returns raw SVG markup. `progress` receives 0–100.
    async fn trace(
        &self,
        image: &RenderedImage,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<String>;
}
