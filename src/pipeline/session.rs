use std::sync::Arc;

use crossbeam_channel::{Sender, unbounded};

use super::{
    capture::{AllFramesReady, CaptureDispatcher, CaptureOutcome, CoordinateMapper},
    frame_worker::FrameProcessor,
    frames::{CapturedFrame, DisplayImage, FusionFrame},
    fusion::{DepthFloatConverter, FusionCommand, ReconstructionVolume, VolumeControlLoop},
    pool::{Pool, Pooled},
    stats::FrameCounters,
    work_queue::{QueueStats, WorkQueue},
};
use crate::{
    config::PipelineConfig,
    error::{FusionError, Result},
    types::{DepthImageFormat, FrameFormat},
    ui::post::UiPoster,
};

/// Cloneable handle for steering the volume loop from the UI thread. Commands
/// take effect before the next fusion frame is processed.
#[derive(Clone, Debug)]
pub struct FusionControls {
    tx: Sender<FusionCommand>,
}

impl FusionControls {
    pub fn send(&self, command: FusionCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| FusionError::Stopped)
    }

    pub fn reset(&self) -> Result<()> {
        self.send(FusionCommand::Reset { anchor: None })
    }

    pub fn set_rotation_rate(&self, degrees_per_tick: f32) -> Result<()> {
        self.send(FusionCommand::SetRotationRate(degrees_per_tick))
    }

    pub fn set_integration_paused(&self, paused: bool) -> Result<()> {
        self.send(FusionCommand::SetIntegrationPaused(paused))
    }

    pub fn set_track_live_camera(&self, live: bool) -> Result<()> {
        self.send(FusionCommand::SetTrackLiveCamera(live))
    }

    pub fn set_z_offset(&self, metres: f32) -> Result<()> {
        self.send(FusionCommand::SetZOffset(metres))
    }
}

pub struct FusionSession {
    dispatcher: CaptureDispatcher,
    frame_queue: Arc<WorkQueue<Pooled<CapturedFrame>>>,
    fusion_queue: Arc<WorkQueue<Pooled<FusionFrame>>>,
    frame_pool: Pool<CapturedFrame>,
    fusion_pool: Pool<FusionFrame>,
    controls: FusionControls,
    counters: Arc<FrameCounters>,
    running: bool,
}

impl FusionSession {
    /// Build the pipeline. The volume is placed before any worker starts, so an
    /// unavailable engine leaves nothing running.
    pub fn start(
        config: PipelineConfig,
        mapper: Arc<dyn CoordinateMapper>,
        volume: Box<dyn ReconstructionVolume>,
        converter: Box<dyn DepthFloatConverter>,
        ui: UiPoster,
    ) -> Result<Self> {
        let counters = Arc::new(FrameCounters::default());
        let (commands_tx, commands_rx) = unbounded();

        let mut fusion = VolumeControlLoop::new(
            config.fusion,
            volume,
            converter,
            commands_rx,
            ui.clone(),
            Arc::clone(&counters),
        )
        .inspect_err(|err| log::error!("{err}"))?;

        let frame_pool = Pool::new(
            config.frame_pool_size,
            FrameFormat::default(),
            CapturedFrame::allocate,
        );
        let fusion_pool = Pool::new(
            config.fusion_pool_size,
            DepthImageFormat::default(),
            FusionFrame::allocate,
        );

        let display_pool = Pool::new(config.display_pool_size, (), DisplayImage::allocate);

        let fusion_ui = ui.clone();
        let fusion_queue = Arc::new(WorkQueue::spawn_with_panic_hook(
            "fusion-worker",
            config.fusion_queue_depth,
            move |frame| fusion.process(frame),
            drop,
            move |msg| {
                fusion_ui.status(format!("Fusion error: {msg}"));
            },
        )?);

        let frame_ui = ui.clone();
        let mut processor = FrameProcessor::new(
            config.display,
            config.body,
            Arc::clone(&mapper),
            display_pool,
            fusion_pool.clone(),
            Arc::clone(&fusion_queue),
            commands_tx.clone(),
            ui,
        );
        let frame_queue = Arc::new(WorkQueue::spawn_with_panic_hook(
            "frame-worker",
            config.frame_queue_depth,
            move |frame| processor.process(frame),
            drop,
            move |msg| {
                frame_ui.status(format!("Frame error: {msg}"));
            },
        )?);

        let dispatcher = CaptureDispatcher::new(
            frame_pool.clone(),
            fusion_pool.clone(),
            Arc::clone(&frame_queue),
            mapper,
            Arc::clone(&counters),
        );

        log::info!(
            "fusion session started: {} frame / {} fusion buffers",
            config.frame_pool_size,
            config.fusion_pool_size
        );
        Ok(Self {
            dispatcher,
            frame_queue,
            fusion_queue,
            frame_pool,
            fusion_pool,
            controls: FusionControls { tx: commands_tx },
            counters,
            running: true,
        })
    }

    pub fn on_all_frames_ready(&mut self, frames: &dyn AllFramesReady) -> CaptureOutcome {
        if !self.running {
            return CaptureOutcome::Stopped;
        }
        self.dispatcher.on_all_frames_ready(frames)
    }

    pub fn controls(&self) -> FusionControls {
        self.controls.clone()
    }

    pub fn counters(&self) -> Arc<FrameCounters> {
        Arc::clone(&self.counters)
    }

    pub fn format(&self) -> Option<FrameFormat> {
        self.dispatcher.format()
    }

    pub fn frame_pool(&self) -> &Pool<CapturedFrame> {
        &self.frame_pool
    }

    pub fn fusion_pool(&self) -> &Pool<FusionFrame> {
        &self.fusion_pool
    }

    pub fn frame_queue_stats(&self) -> QueueStats {
        self.frame_queue.stats()
    }

    pub fn fusion_queue_stats(&self) -> QueueStats {
        self.fusion_queue.stats()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop the frame worker, then the fusion worker. Both queues drain back
    /// into their pools. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.frame_queue.shutdown();
        self.fusion_queue.shutdown();
        log::info!(
            "fusion session stopped: frames {:?}, fusion {:?}",
            self.frame_queue.stats(),
            self.fusion_queue.stats()
        );
    }
}

impl Drop for FusionSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
