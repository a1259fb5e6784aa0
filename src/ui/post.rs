use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::overlay::SkeletonOverlay;
use crate::pipeline::{frames::SharedImage, fusion::TrackingStatus};

pub const UI_CHANNEL_CAPACITY: usize = 32;

/// Display buffers produced by the frame worker for one tick. Holding a
/// `FrameViews` keeps its three buffers out of the display pool.
#[derive(Clone, Debug)]
pub struct FrameViews {
    pub frame_number: u64,
    pub depth: SharedImage,
    pub color: SharedImage,
    pub body_mask: SharedImage,
    pub overlay: Option<SkeletonOverlay>,
    pub active_body: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct FusionUpdate {
    pub tracking_succeeded: bool,
    pub status: TrackingStatus,
    /// Present on render ticks only.
    pub shaded: Option<SharedImage>,
    pub alignment_energy: f32,
}

#[derive(Clone, Debug)]
pub enum UiUpdate {
    Frame(FrameViews),
    Fusion(FusionUpdate),
    Status(String),
}

#[derive(Clone, Debug)]
pub struct UiPoster {
    tx: Sender<UiUpdate>,
}

pub fn channel() -> (UiPoster, Receiver<UiUpdate>) {
    let (tx, rx) = bounded(UI_CHANNEL_CAPACITY);
    (UiPoster { tx }, rx)
}

impl UiPoster {
    /// Never blocks. Returns false when the update was dropped.
    pub fn post(&self, update: UiUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("ui queue full, dropping update");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn status(&self, message: impl Into<String>) -> bool {
        self.post(UiUpdate::Status(message.into()))
    }
}

#[derive(Debug, Default)]
pub struct UiState {
    frame: Option<FrameViews>,
    shaded: Option<SharedImage>,
    tracking_succeeded: Option<bool>,
    tracking_status: TrackingStatus,
    alignment_energy: Option<f32>,
    status: String,
    frame_updates: u64,
    fusion_updates: u64,
}

impl UiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, update: UiUpdate) {
        match update {
            UiUpdate::Frame(views) => {
                self.frame_updates += 1;
                self.frame = Some(views);
            }
            UiUpdate::Fusion(fusion) => {
                self.fusion_updates += 1;
                self.tracking_succeeded = Some(fusion.tracking_succeeded);
                self.tracking_status = fusion.status;
                self.alignment_energy = Some(fusion.alignment_energy);
                if let Some(shaded) = fusion.shaded {
                    self.shaded = Some(shaded);
                }
            }
            UiUpdate::Status(message) => self.status = message,
        }
    }

    pub fn drain(&mut self, rx: &Receiver<UiUpdate>) -> usize {
        let mut applied = 0;
        while let Ok(update) = rx.try_recv() {
            self.apply(update);
            applied += 1;
        }
        applied
    }

    pub fn frame(&self) -> Option<&FrameViews> {
        self.frame.as_ref()
    }

    pub fn shaded(&self) -> Option<&SharedImage> {
        self.shaded.as_ref()
    }

    pub fn tracking_succeeded(&self) -> Option<bool> {
        self.tracking_succeeded
    }

    pub fn tracking_status(&self) -> TrackingStatus {
        self.tracking_status
    }

    pub fn alignment_energy(&self) -> Option<f32> {
        self.alignment_energy
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    pub fn frame_updates(&self) -> u64 {
        self.frame_updates
    }

    pub fn fusion_updates(&self) -> u64 {
        self.fusion_updates
    }
}
