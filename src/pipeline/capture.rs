use std::sync::Arc;

use anyhow::Result;
use nalgebra::Vector3;

use super::{
    frames::{CapturedFrame, FusionFrame},
    pool::{Pool, Pooled},
    stats::FrameCounters,
    work_queue::{Enqueued, WorkQueue},
};
use crate::types::{
    ColorImageFormat, DepthImageFormat, DepthImagePoint, DepthPixel, FrameFormat, Skeleton,
};

#[derive(Clone, Copy, Debug)]
pub struct ColorImageFrame<'a> {
    pub format: ColorImageFormat,
    pub pixels: &'a [u8],
}

#[derive(Clone, Copy, Debug)]
pub struct DepthImageFrame<'a> {
    pub format: DepthImageFormat,
    pub pixels: &'a [DepthPixel],
}

#[derive(Clone, Copy, Debug)]
pub struct SkeletonFrame<'a> {
    pub skeletons: &'a [Skeleton],
}

/// One "all frames ready" notification from the sensor runtime.
pub trait AllFramesReady {
    fn open_color_frame(&self) -> Option<ColorImageFrame<'_>>;
    fn open_depth_frame(&self) -> Option<DepthImageFrame<'_>>;
    fn open_skeleton_frame(&self) -> Option<SkeletonFrame<'_>>;
}

pub trait CoordinateMapper: Send + Sync {
    fn map_color_frame_to_depth_frame(
        &self,
        color_format: ColorImageFormat,
        depth_format: DepthImageFormat,
        depth_pixels: &[DepthPixel],
        out: &mut [DepthImagePoint],
    ) -> Result<()>;

    /// Project a skeleton-space point into (unmirrored) depth-image pixels.
    fn map_skeleton_point_to_depth(
        &self,
        point: &Vector3<f32>,
        depth_format: DepthImageFormat,
    ) -> DepthImagePoint;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Enqueued { evicted: bool },
    Incomplete,
    PoolExhausted,
    Malformed,
    RegistrationFailed,
    Stopped,
}

pub struct CaptureDispatcher {
    format: Option<FrameFormat>,
    frame_pool: Pool<CapturedFrame>,
    fusion_pool: Pool<FusionFrame>,
    frame_queue: Arc<WorkQueue<Pooled<CapturedFrame>>>,
    mapper: Arc<dyn CoordinateMapper>,
    counters: Arc<FrameCounters>,
    frame_number: u64,
}

impl CaptureDispatcher {
    pub fn new(
        frame_pool: Pool<CapturedFrame>,
        fusion_pool: Pool<FusionFrame>,
        frame_queue: Arc<WorkQueue<Pooled<CapturedFrame>>>,
        mapper: Arc<dyn CoordinateMapper>,
        counters: Arc<FrameCounters>,
    ) -> Self {
        Self {
            format: None,
            frame_pool,
            fusion_pool,
            frame_queue,
            mapper,
            counters,
            frame_number: 0,
        }
    }

    pub fn format(&self) -> Option<FrameFormat> {
        self.format
    }

    pub fn on_all_frames_ready(&mut self, frames: &dyn AllFramesReady) -> CaptureOutcome {
        let color = frames.open_color_frame();
        let depth = frames.open_depth_frame();
        let skeletons = frames.open_skeleton_frame();
        let (Some(color), Some(depth), Some(skeletons)) = (color, depth, skeletons) else {
            log::trace!("incomplete frame set, skipping tick");
            return CaptureOutcome::Incomplete;
        };

        self.counters.record_raw();
        self.apply_format(FrameFormat {
            color: color.format,
            depth: depth.format,
            skeleton_capacity: skeletons.skeletons.len(),
        });

        let Some(mut frame) = self.frame_pool.acquire() else {
            log::trace!("frame pool exhausted, dropping tick");
            return CaptureOutcome::PoolExhausted;
        };

        if frame.color.len() != color.pixels.len()
            || frame.depth.len() != depth.pixels.len()
            || frame.skeletons.len() != skeletons.skeletons.len()
        {
            log::warn!(
                "frame payload does not match {:?}: color {} depth {}",
                self.format,
                color.pixels.len(),
                depth.pixels.len()
            );
            return CaptureOutcome::Malformed;
        }

        frame.color.copy_from_slice(color.pixels);
        frame.depth.copy_from_slice(depth.pixels);
        frame.skeletons.copy_from_slice(skeletons.skeletons);

        let CapturedFrame {
            depth: frame_depth,
            color_to_depth,
            ..
        } = &mut *frame;
        if let Err(err) = self.mapper.map_color_frame_to_depth_frame(
            color.format,
            depth.format,
            frame_depth,
            color_to_depth,
        ) {
            log::warn!("color to depth registration failed: {err:#}");
            return CaptureOutcome::RegistrationFailed;
        }

        self.frame_number += 1;
        frame.frame_number = self.frame_number;

        match self.frame_queue.enqueue(frame) {
            Enqueued::Admitted => CaptureOutcome::Enqueued { evicted: false },
            Enqueued::Evicted => CaptureOutcome::Enqueued { evicted: true },
            Enqueued::Rejected => CaptureOutcome::Stopped,
        }
    }

    fn apply_format(&mut self, format: FrameFormat) {
        if self.format == Some(format) {
            return;
        }
        log::info!(
            "sensor format now {:?} / {:?} with {} skeleton slots",
            format.color,
            format.depth,
            format.skeleton_capacity
        );
        self.frame_pool.set_format(format);
        self.fusion_pool.set_format(format.depth);
        self.format = Some(format);
    }
}
