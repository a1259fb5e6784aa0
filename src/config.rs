#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub frame_pool_size: usize,
    pub fusion_pool_size: usize,
    pub display_pool_size: usize,
    pub frame_queue_depth: usize,
    pub fusion_queue_depth: usize,
    pub display: DisplayConfig,
    pub body: BodySelectionConfig,
    pub fusion: FusionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_pool_size: 5,
            fusion_pool_size: 5,
            display_pool_size: 18,
            frame_queue_depth: 2,
            fusion_queue_depth: 2,
            display: DisplayConfig::default(),
            body: BodySelectionConfig::default(),
            fusion: FusionConfig::default(),
        }
    }
}

/// Depth window mapped onto the grayscale display ramp, in millimetres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayConfig {
    pub min_depth_mm: u16,
    pub max_depth_mm: u16,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            min_depth_mm: 400,
            max_depth_mm: 4000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodySelectionConfig {
    /// Consecutive ticks without a tracked body before the active body is dropped.
    pub miss_limit: u32,
    /// Weight of the head joint in the volume anchor; the neck gets the remainder.
    pub head_weight: f32,
    /// A newly tracked id whose anchor lands within this many metres of the last
    /// anchor, while the previous id is gone, is treated as the same person and
    /// does not reset the volume. Zero disables re-identification.
    pub reidentify_radius: f32,
}

impl Default for BodySelectionConfig {
    fn default() -> Self {
        Self {
            miss_limit: 60,
            head_weight: 0.85,
            reidentify_radius: 0.25,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FusionConfig {
    pub voxels_per_meter: f32,
    pub voxel_resolution: [u32; 3],
    pub integration_weight: u16,
    pub align_iterations: u32,
    /// Consecutive alignment failures that trigger an automatic reset.
    pub max_tracking_errors: u32,
    pub auto_reset_when_lost: bool,
    /// Depth clip handed to the float conversion, metres.
    pub min_depth_clip: f32,
    pub max_depth_clip: f32,
    /// Orbit speed of the synthetic render camera, degrees per processed tick.
    pub rotation_rate_degrees: f32,
    pub track_live_camera: bool,
    /// Distance of the orbit camera from the volume centre, metres.
    pub orbit_distance: f32,
    /// Volume anchor depth used until a body has been seen, metres.
    pub default_z_offset: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            voxels_per_meter: 512.0,
            voxel_resolution: [128, 256, 128],
            integration_weight: 30,
            align_iterations: 7,
            max_tracking_errors: 100,
            auto_reset_when_lost: false,
            min_depth_clip: 0.35,
            max_depth_clip: 8.0,
            rotation_rate_degrees: 0.0,
            track_live_camera: false,
            orbit_distance: 0.7,
            default_z_offset: 0.7,
        }
    }
}
