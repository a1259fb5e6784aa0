use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use nalgebra::Vector3;

use super::pool::{PoolItem, Pooled};
use crate::types::{
    BGRA_BYTES, BgraImage, DepthImageFormat, DepthImagePoint, DepthPixel, FrameFormat, Skeleton,
};

#[derive(Debug)]
pub struct CapturedFrame {
    format: FrameFormat,
    pub frame_number: u64,
    pub color: Vec<u8>,
    pub depth: Vec<DepthPixel>,
    pub skeletons: Vec<Skeleton>,
    pub color_to_depth: Vec<DepthImagePoint>,
}

impl CapturedFrame {
    pub fn allocate(format: &FrameFormat) -> Self {
        let color_len = format.color.pixel_count();
        Self {
            format: *format,
            frame_number: 0,
            color: vec![0u8; color_len * BGRA_BYTES],
            depth: vec![DepthPixel::UNKNOWN; format.depth.pixel_count()],
            skeletons: vec![Skeleton::default(); format.skeleton_capacity],
            color_to_depth: vec![DepthImagePoint::default(); color_len],
        }
    }
}

impl PoolItem for CapturedFrame {
    type Format = FrameFormat;

    fn format(&self) -> &FrameFormat {
        &self.format
    }
}

#[derive(Debug)]
pub struct FusionFrame {
    format: DepthImageFormat,
    pub frame_number: u64,
    pub depth: Vec<DepthPixel>,
    /// Latest head/neck anchor of the active body, sensor space. Stored by the
    /// volume loop and applied at its next reset.
    pub anchor: Option<Vector3<f32>>,
}

impl FusionFrame {
    pub fn allocate(format: &DepthImageFormat) -> Self {
        Self {
            format: *format,
            frame_number: 0,
            depth: vec![DepthPixel::UNKNOWN; format.pixel_count()],
            anchor: None,
        }
    }
}

impl PoolItem for FusionFrame {
    type Format = DepthImageFormat;

    fn format(&self) -> &DepthImageFormat {
        &self.format
    }
}

/// A display buffer lent to the UI thread. It goes back to its pool when the
/// last [`SharedImage`] handle is dropped. Buffers resize in place, so the pool
/// never reallocates them on a format change.
#[derive(Debug, Default)]
pub struct DisplayImage(BgraImage);

pub type SharedImage = Arc<Pooled<DisplayImage>>;

impl DisplayImage {
    pub fn allocate(_: &()) -> Self {
        Self::default()
    }
}

impl PoolItem for DisplayImage {
    type Format = ();

    fn format(&self) -> &() {
        &()
    }
}

impl Deref for DisplayImage {
    type Target = BgraImage;

    fn deref(&self) -> &BgraImage {
        &self.0
    }
}

impl DerefMut for DisplayImage {
    fn deref_mut(&mut self) -> &mut BgraImage {
        &mut self.0
    }
}
