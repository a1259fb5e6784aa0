pub mod body;
pub mod capture;
pub mod depth_view;
pub mod frame_worker;
pub mod frames;
pub mod fusion;
pub mod pool;
pub mod session;
pub mod stats;
pub mod work_queue;

// Re-exports for convenience
pub use capture::{AllFramesReady, CaptureOutcome, CoordinateMapper};
pub use frames::{DisplayImage, SharedImage};
pub use fusion::{
    DepthFloatConverter, FusionCommand, LinearDepthConverter, ReconstructionVolume,
    TrackingStatus,
};
pub use session::{FusionControls, FusionSession};
pub use stats::{FrameCounters, FrameRateSampler, FrameRates};
