use rayon::prelude::*;

use crate::{
    config::DisplayConfig,
    error::{FusionError, Result},
    types::{BGRA_BYTES, BgraImage, DepthImagePoint, DepthPixel, gray_bgra},
};

/// Map a depth sample onto the display ramp: near is bright, far is dark,
/// unknown depth is black.
pub fn depth_to_gray(depth: u16, display: &DisplayConfig) -> u8 {
    if depth == 0 {
        return 0;
    }
    let min = display.min_depth_mm as f32;
    let max = display.max_depth_mm.max(display.min_depth_mm.saturating_add(1)) as f32;
    let d = (depth as f32).clamp(min, max);
    (255.0 - 255.0 * (d - min) / (max - min)).round() as u8
}

/// Render mirrored grayscale depth into `depth_out`, and the same samples
/// restricted to `active_player`'s pixels into `mask_out`.
pub fn colorize_depth(
    depth: &[DepthPixel],
    width: u32,
    height: u32,
    display: &DisplayConfig,
    active_player: Option<u8>,
    depth_out: &mut BgraImage,
    mask_out: &mut BgraImage,
) -> Result<()> {
    let w = width as usize;
    FusionError::check_len("depth", depth.len(), w * height as usize)?;
    depth_out.resize(width, height);
    mask_out.resize(width, height);
    if w == 0 {
        return Ok(());
    }

    let row_bytes = w * BGRA_BYTES;
    depth_out
        .pixels
        .par_chunks_mut(row_bytes)
        .zip(mask_out.pixels.par_chunks_mut(row_bytes))
        .zip(depth.par_chunks(w))
        .for_each(|((dst_row, mask_row), src_row)| {
            let pixels = dst_row
                .chunks_exact_mut(BGRA_BYTES)
                .zip(mask_row.chunks_exact_mut(BGRA_BYTES));
            for (x, (dst, mask)) in pixels.enumerate() {
                let Some(pixel) = src_row.get(w - 1 - x) else {
                    continue;
                };
                let value = depth_to_gray(pixel.depth, display);
                dst.copy_from_slice(&gray_bgra(value));

                let on_body = matches!(active_player, Some(player)
                    if player != 0 && pixel.player_index == player && pixel.is_known_depth());
                mask.copy_from_slice(&gray_bgra(if on_body { value } else { 0 }));
            }
        });

    Ok(())
}

/// Scatter each color pixel to the mirrored depth-space position its
/// registration points at. `out` is cleared first; pixels that register
/// outside the depth image are skipped. Returns the number written.
pub fn remap_color_to_depth(
    color: &[u8],
    color_to_depth: &[DepthImagePoint],
    color_size: (u32, u32),
    depth_size: (u32, u32),
    out: &mut BgraImage,
) -> Result<usize> {
    let color_len = color_size.0 as usize * color_size.1 as usize;
    FusionError::check_len("color", color.len(), color_len * BGRA_BYTES)?;
    FusionError::check_len("registration", color_to_depth.len(), color_len)?;

    let (dw, dh) = depth_size;
    out.resize(dw, dh);
    out.clear();

    let mut written = 0;
    for (src, point) in color.chunks_exact(BGRA_BYTES).zip(color_to_depth) {
        if point.index_in(dw, dh).is_none() {
            continue;
        }
        let target = (dw as usize - 1 - point.x as usize) + point.y as usize * dw as usize;
        let start = target * BGRA_BYTES;
        if let Some(dst) = out.pixels.get_mut(start..start + BGRA_BYTES) {
            dst.copy_from_slice(src);
            written += 1;
        }
    }
    Ok(written)
}
