use std::path::Path;

use anyhow::{Context, Result, anyhow};
use image::{ImageBuffer, Rgba};

use crate::types::BgraImage;

pub fn save_png(image: &BgraImage, path: &Path) -> Result<()> {
    let mut rgba = image.pixels.clone();
    for px in rgba.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(image.width, image.height, rgba)
        .ok_or_else(|| {
            anyhow!(
                "{}x{} image has {} bytes",
                image.width,
                image.height,
                image.pixels.len()
            )
        })?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
