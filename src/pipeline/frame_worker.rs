use std::sync::Arc;

use crossbeam_channel::Sender;
use nalgebra::Vector3;

use super::{
    body::{BodySelection, BodySelector},
    capture::CoordinateMapper,
    depth_view::{colorize_depth, remap_color_to_depth},
    frames::{CapturedFrame, DisplayImage, FusionFrame},
    fusion::FusionCommand,
    pool::{Pool, PoolItem, Pooled},
    work_queue::{Enqueued, WorkQueue},
};
use crate::{
    config::{BodySelectionConfig, DisplayConfig},
    error::Result,
    types::{DepthImageFormat, JointTrackingState, Skeleton},
    ui::{
        overlay::SkeletonOverlay,
        post::{FrameViews, UiPoster, UiUpdate},
    },
};

pub struct FrameProcessor {
    display: DisplayConfig,
    selector: BodySelector,
    mapper: Arc<dyn CoordinateMapper>,
    display_pool: Pool<DisplayImage>,
    fusion_pool: Pool<FusionFrame>,
    fusion_queue: Arc<WorkQueue<Pooled<FusionFrame>>>,
    commands: Sender<FusionCommand>,
    ui: UiPoster,
}

impl FrameProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        display: DisplayConfig,
        body: BodySelectionConfig,
        mapper: Arc<dyn CoordinateMapper>,
        display_pool: Pool<DisplayImage>,
        fusion_pool: Pool<FusionFrame>,
        fusion_queue: Arc<WorkQueue<Pooled<FusionFrame>>>,
        commands: Sender<FusionCommand>,
        ui: UiPoster,
    ) -> Self {
        Self {
            display,
            selector: BodySelector::new(body),
            mapper,
            display_pool,
            fusion_pool,
            fusion_queue,
            commands,
            ui,
        }
    }

    pub fn selector(&self) -> &BodySelector {
        &self.selector
    }

    /// Frame queue callback. The frame goes back to its pool before the views
    /// are posted.
    pub fn process(&mut self, frame: Pooled<CapturedFrame>) {
        let result = self.process_frame(&frame);
        drop(frame);

        match result {
            Ok(Some(views)) => {
                self.ui.post(UiUpdate::Frame(views));
            }
            Ok(None) => {}
            Err(err) => {
                log::warn!("frame processing failed: {err}");
                self.ui.status(format!("Frame error: {err}"));
            }
        }
    }

    fn process_frame(&mut self, frame: &CapturedFrame) -> Result<Option<FrameViews>> {
        let selection = self.selector.update(&frame.skeletons);
        if selection.body_changed {
            self.request_reset(&selection);
        }

        let (Some(mut depth), Some(mut color), Some(mut mask)) = (
            self.display_pool.acquire(),
            self.display_pool.acquire(),
            self.display_pool.acquire(),
        ) else {
            log::trace!("display buffers all held by the ui, skipping views");
            self.forward_to_fusion(frame, selection.anchor);
            return Ok(None);
        };

        let format = *frame.format();
        let (width, height) = format.depth.size();
        colorize_depth(
            &frame.depth,
            width,
            height,
            &self.display,
            selection.player_index,
            &mut depth,
            &mut mask,
        )?;
        remap_color_to_depth(
            &frame.color,
            &frame.color_to_depth,
            format.color.size(),
            (width, height),
            &mut color,
        )?;

        self.forward_to_fusion(frame, selection.anchor);

        let overlay = selection
            .skeleton_index
            .and_then(|idx| frame.skeletons.get(idx))
            .map(|skeleton| self.overlay_for(skeleton, format.depth));

        Ok(Some(FrameViews {
            frame_number: frame.frame_number,
            depth: Arc::new(depth),
            color: Arc::new(color),
            body_mask: Arc::new(mask),
            overlay,
            active_body: selection.tracking_id,
        }))
    }

    fn request_reset(&self, selection: &BodySelection) {
        let command = FusionCommand::Reset {
            anchor: selection.anchor,
        };
        if self.commands.send(command).is_err() {
            log::debug!("fusion loop gone, dropping reset request");
        }
    }

    fn forward_to_fusion(&self, frame: &CapturedFrame, anchor: Option<Vector3<f32>>) {
        let Some(mut item) = self.fusion_pool.acquire() else {
            log::trace!("fusion pool exhausted, skipping frame {}", frame.frame_number);
            return;
        };
        if item.depth.len() != frame.depth.len() {
            log::debug!("fusion pool format lags the capture format, skipping");
            return;
        }

        item.depth.copy_from_slice(&frame.depth);
        item.frame_number = frame.frame_number;
        item.anchor = anchor;
        if self.fusion_queue.enqueue(item) == Enqueued::Evicted {
            log::trace!("fusion queue full, oldest depth frame dropped");
        }
    }

    fn overlay_for(&self, skeleton: &Skeleton, depth_format: DepthImageFormat) -> SkeletonOverlay {
        let (width, height) = depth_format.size();
        let mut overlay = SkeletonOverlay::new(skeleton.tracking_id);
        for (slot, joint) in overlay.joints.iter_mut().zip(&skeleton.joints) {
            if joint.state == JointTrackingState::NotTracked {
                continue;
            }
            let point = self
                .mapper
                .map_skeleton_point_to_depth(&joint.position, depth_format);
            // Joints the calibration places off the image stay undrawn.
            if point.index_in(width, height).is_some() {
                let mirrored_x = width - 1 - point.x as u32;
                *slot = Some((mirrored_x as f32, point.y as f32));
            }
        }
        overlay
    }
}
