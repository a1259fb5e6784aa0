pub mod overlay;
pub mod post;
pub mod snapshot;

pub use overlay::{SkeletonOverlay, draw_skeleton};
pub use post::{FrameViews, FusionUpdate, UiPoster, UiState, UiUpdate, channel};
