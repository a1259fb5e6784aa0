use std::sync::Arc;

use anyhow::{Context, anyhow};
use crossbeam_channel::Receiver;
use nalgebra::{Matrix4, Vector3};
use ndarray::Array2;
use rayon::prelude::*;

use super::{
    frames::{DisplayImage, FusionFrame, SharedImage},
    pool::{Pool, PoolItem, Pooled},
    stats::FrameCounters,
};
use crate::{
    config::FusionConfig,
    error::{FusionError, Result},
    types::{BgraImage, DepthPixel},
    ui::post::{FusionUpdate, UiPoster, UiUpdate},
};

/// Renders in flight toward the UI before a tick skips its render.
pub const SHADED_BUFFERS: usize = 4;

/// Depth in metres, `(height, width)`. Zero marks a clipped or unknown sample.
pub type DepthFloatFrame = Array2<f32>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Alignment {
    pub succeeded: bool,
    pub world_to_camera: Matrix4<f32>,
    pub energy: f32,
}

#[derive(Clone, Debug, Default)]
pub struct PointCloud {
    pub width: u32,
    pub height: u32,
    pub points: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
}

impl PointCloud {
    pub fn resize(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.points.resize(len, Vector3::zeros());
        self.normals.resize(len, Vector3::zeros());
    }
}

/// The volumetric engine. Calls are never concurrent: the fusion queue keeps a
/// single item in flight.
pub trait ReconstructionVolume: Send {
    fn align_to_reconstruction(
        &mut self,
        depth: &DepthFloatFrame,
        iterations: u32,
        seed_world_to_camera: &Matrix4<f32>,
    ) -> anyhow::Result<Alignment>;

    fn integrate(
        &mut self,
        depth: &DepthFloatFrame,
        weight: u16,
        world_to_camera: &Matrix4<f32>,
    ) -> anyhow::Result<()>;

    fn calculate_point_cloud(
        &mut self,
        view: &Matrix4<f32>,
        cloud: &mut PointCloud,
    ) -> anyhow::Result<()>;

    fn shade(
        &mut self,
        cloud: &PointCloud,
        view: &Matrix4<f32>,
        out: &mut BgraImage,
    ) -> anyhow::Result<()>;

    fn reset(
        &mut self,
        world_to_camera: &Matrix4<f32>,
        world_to_volume: &Matrix4<f32>,
    ) -> anyhow::Result<()>;

    fn default_world_to_volume(&self) -> Matrix4<f32>;
}

pub trait DepthFloatConverter: Send {
    fn convert(
        &mut self,
        depth: &[DepthPixel],
        width: u32,
        height: u32,
        min_depth: f32,
        max_depth: f32,
        out: &mut DepthFloatFrame,
    ) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LinearDepthConverter;

impl DepthFloatConverter for LinearDepthConverter {
    fn convert(
        &mut self,
        depth: &[DepthPixel],
        width: u32,
        height: u32,
        min_depth: f32,
        max_depth: f32,
        out: &mut DepthFloatFrame,
    ) -> anyhow::Result<()> {
        let shape = (height as usize, width as usize);
        FusionError::check_len("depth", depth.len(), shape.0 * shape.1)?;
        if out.dim() != shape {
            *out = Array2::zeros(shape);
        }
        let dst = out
            .as_slice_mut()
            .ok_or_else(|| anyhow!("depth float frame is not contiguous"))?;

        dst.par_iter_mut().zip(depth.par_iter()).for_each(|(dst, px)| {
            let metres = px.depth as f32 / 1000.0;
            *dst = if px.is_known_depth() && (min_depth..=max_depth).contains(&metres) {
                metres
            } else {
                0.0
            };
        });
        Ok(())
    }
}

/// Volume placement with the world origin at the centre of the front face,
/// `voxels_per_meter` voxels to the metre.
pub fn default_world_to_volume(config: &FusionConfig) -> Matrix4<f32> {
    let [rx, ry, _] = config.voxel_resolution;
    let mut m = Matrix4::new_scaling(config.voxels_per_meter);
    m[(0, 3)] = rx as f32 / 2.0;
    m[(1, 3)] = ry as f32 / 2.0;
    m
}

pub fn world_to_volume_centered_on(
    default: &Matrix4<f32>,
    anchor: &Vector3<f32>,
    config: &FusionConfig,
) -> Matrix4<f32> {
    let vpm = config.voxels_per_meter;
    let half_depth = config.voxel_resolution[2] as f32 / 2.0;
    let mut m = *default;
    m[(0, 3)] -= anchor.x * vpm;
    m[(1, 3)] -= anchor.y * vpm;
    m[(2, 3)] += half_depth - anchor.z * vpm;
    m
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FusionCommand {
    /// Recenter and clear the volume. `anchor` replaces the stored one.
    Reset { anchor: Option<Vector3<f32>> },
    SetRotationRate(f32),
    SetIntegrationPaused(bool),
    SetTrackLiveCamera(bool),
    /// Re-anchor on the sensor axis at this depth and reset.
    SetZOffset(f32),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrackingStatus {
    #[default]
    Idle,
    Tracking,
    Lost,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeTransformState {
    pub world_to_camera: Matrix4<f32>,
    pub volume_center: Vector3<f32>,
    pub rotation_angle: f32,
}

pub struct VolumeControlLoop {
    config: FusionConfig,
    volume: Box<dyn ReconstructionVolume>,
    converter: Box<dyn DepthFloatConverter>,
    commands: Receiver<FusionCommand>,
    ui: UiPoster,
    counters: Arc<FrameCounters>,
    transform: VolumeTransformState,
    anchor: Vector3<f32>,
    status: TrackingStatus,
    tracking_errors: u32,
    processed: u64,
    integration_paused: bool,
    depth_float: DepthFloatFrame,
    cloud: PointCloud,
    shaded_pool: Pool<DisplayImage>,
}

impl VolumeControlLoop {
    pub fn new(
        config: FusionConfig,
        volume: Box<dyn ReconstructionVolume>,
        converter: Box<dyn DepthFloatConverter>,
        commands: Receiver<FusionCommand>,
        ui: UiPoster,
        counters: Arc<FrameCounters>,
    ) -> Result<Self> {
        let anchor = Vector3::new(0.0, 0.0, config.default_z_offset);
        let mut this = Self {
            config,
            volume,
            converter,
            commands,
            ui,
            counters,
            transform: VolumeTransformState {
                world_to_camera: Matrix4::identity(),
                volume_center: anchor,
                rotation_angle: 0.0,
            },
            anchor,
            status: TrackingStatus::Idle,
            tracking_errors: 0,
            processed: 0,
            integration_paused: false,
            depth_float: DepthFloatFrame::zeros((0, 0)),
            cloud: PointCloud::default(),
            shaded_pool: Pool::new(SHADED_BUFFERS, (), DisplayImage::allocate),
        };
        this.reset().map_err(FusionError::Initialization)?;
        Ok(this)
    }

    pub fn status(&self) -> TrackingStatus {
        self.status
    }

    pub fn tracking_errors(&self) -> u32 {
        self.tracking_errors
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn shaded_pool(&self) -> &Pool<DisplayImage> {
        &self.shaded_pool
    }

    pub fn transform(&self) -> &VolumeTransformState {
        &self.transform
    }

    pub fn anchor(&self) -> Vector3<f32> {
        self.anchor
    }

    pub fn integration_paused(&self) -> bool {
        self.integration_paused
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fusion queue callback. Errors never escape: they become a status line.
    pub fn process(&mut self, frame: Pooled<FusionFrame>) {
        if let Some(anchor) = frame.anchor {
            self.anchor = anchor;
        }

        let result = self.process_frame(&frame);
        drop(frame);

        match result {
            Ok(update) => {
                self.ui.post(UiUpdate::Fusion(update));
            }
            Err(err) => {
                log::warn!("fusion frame failed: {err:#}");
                self.ui.status(format!("Fusion error: {err:#}"));
            }
        }
    }

    /// Recenter the volume on the stored anchor and clear everything that
    /// depends on the old placement.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        let default = self.volume.default_world_to_volume();
        let world_to_volume = world_to_volume_centered_on(&default, &self.anchor, &self.config);
        let world_to_camera = Matrix4::identity();
        self.volume
            .reset(&world_to_camera, &world_to_volume)
            .context("volume reset")?;

        self.transform = VolumeTransformState {
            world_to_camera,
            volume_center: self.anchor,
            rotation_angle: 0.0,
        };
        self.tracking_errors = 0;
        self.processed = 0;
        self.status = TrackingStatus::Idle;
        self.counters.reset();
        log::debug!(
            "volume reset, centred on ({:.3}, {:.3}, {:.3})",
            self.anchor.x,
            self.anchor.y,
            self.anchor.z
        );
        Ok(())
    }

    pub fn view_transform(&self) -> Matrix4<f32> {
        if self.config.track_live_camera {
            return self.transform.world_to_camera;
        }
        let angle = self.transform.rotation_angle.to_radians();
        Matrix4::new_translation(&Vector3::new(0.0, 0.0, self.config.orbit_distance))
            * Matrix4::from_axis_angle(&Vector3::y_axis(), angle)
            * Matrix4::new_translation(&-self.transform.volume_center)
    }

    fn apply_commands(&mut self) -> anyhow::Result<()> {
        while let Ok(command) = self.commands.try_recv() {
            log::debug!("fusion command: {command:?}");
            match command {
                FusionCommand::Reset { anchor } => {
                    if let Some(anchor) = anchor {
                        self.anchor = anchor;
                    }
                    self.reset()?;
                }
                FusionCommand::SetRotationRate(rate) => self.config.rotation_rate_degrees = rate,
                FusionCommand::SetIntegrationPaused(paused) => self.integration_paused = paused,
                FusionCommand::SetTrackLiveCamera(live) => self.config.track_live_camera = live,
                FusionCommand::SetZOffset(z) => {
                    self.config.default_z_offset = z;
                    self.anchor = Vector3::new(0.0, 0.0, z);
                    self.reset()?;
                }
            }
        }
        Ok(())
    }

    fn process_frame(&mut self, frame: &FusionFrame) -> anyhow::Result<FusionUpdate> {
        self.apply_commands()?;

        let (width, height) = frame.format().size();
        self.converter
            .convert(
                &frame.depth,
                width,
                height,
                self.config.min_depth_clip,
                self.config.max_depth_clip,
                &mut self.depth_float,
            )
            .context("depth float conversion")?;

        let alignment = self
            .volume
            .align_to_reconstruction(
                &self.depth_float,
                self.config.align_iterations,
                &self.transform.world_to_camera,
            )
            .context("camera tracking")?;

        self.processed += 1;
        self.counters.record_fused();

        if alignment.succeeded {
            self.transform.world_to_camera = alignment.world_to_camera;
            self.tracking_errors = 0;
            self.status = TrackingStatus::Tracking;
            if !self.integration_paused {
                self.volume
                    .integrate(
                        &self.depth_float,
                        self.config.integration_weight,
                        &self.transform.world_to_camera,
                    )
                    .context("depth integration")?;
            }
        } else {
            self.tracking_errors += 1;
            self.status = TrackingStatus::Lost;
            log::debug!(
                "camera tracking failed ({} in a row), energy {}",
                self.tracking_errors,
                alignment.energy
            );
            self.ui.status("Camera tracking failed");

            if self.config.auto_reset_when_lost
                && self.tracking_errors >= self.config.max_tracking_errors
            {
                log::warn!(
                    "{} consecutive tracking failures, resetting volume",
                    self.tracking_errors
                );
                self.reset()?;
                return Ok(FusionUpdate {
                    tracking_succeeded: false,
                    status: self.status,
                    shaded: None,
                    alignment_energy: alignment.energy,
                });
            }
        }

        if !self.config.track_live_camera {
            self.transform.rotation_angle =
                (self.transform.rotation_angle + self.config.rotation_rate_degrees) % 360.0;
        }

        let shaded = if self.processed % 2 == 0 {
            self.render()?
        } else {
            None
        };

        Ok(FusionUpdate {
            tracking_succeeded: alignment.succeeded,
            status: self.status,
            shaded,
            alignment_energy: alignment.energy,
        })
    }

    fn render(&mut self) -> anyhow::Result<Option<SharedImage>> {
        let Some(mut out) = self.shaded_pool.acquire() else {
            log::trace!("every shaded buffer is still held by the ui, skipping render");
            return Ok(None);
        };
        let view = self.view_transform();
        self.volume
            .calculate_point_cloud(&view, &mut self.cloud)
            .context("point cloud")?;
        self.volume
            .shade(&self.cloud, &view, &mut out)
            .context("shading")?;
        Ok(Some(Arc::new(out)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use crossbeam_channel::{Sender, unbounded};
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        pipeline::pool::Pool,
        types::DepthImageFormat,
        ui::post::{self, UiUpdate},
    };

    #[derive(Debug, Default)]
    struct Calls {
        aligned: u32,
        integrated: Vec<Matrix4<f32>>,
        rendered: u32,
        resets: Vec<Matrix4<f32>>,
    }

    struct MockVolume {
        calls: Arc<Mutex<Calls>>,
        succeed: Arc<AtomicBool>,
        fail_reset: bool,
    }

    fn refined_pose() -> Matrix4<f32> {
        Matrix4::new_translation(&Vector3::new(0.01, 0.0, 0.0))
    }

    impl ReconstructionVolume for MockVolume {
        fn align_to_reconstruction(
            &mut self,
            _depth: &DepthFloatFrame,
            _iterations: u32,
            _seed: &Matrix4<f32>,
        ) -> anyhow::Result<Alignment> {
            self.calls.lock().aligned += 1;
            let succeeded = self.succeed.load(Ordering::SeqCst);
            Ok(Alignment {
                succeeded,
                world_to_camera: refined_pose(),
                energy: if succeeded { 0.1 } else { 0.9 },
            })
        }

        fn integrate(
            &mut self,
            _depth: &DepthFloatFrame,
            _weight: u16,
            world_to_camera: &Matrix4<f32>,
        ) -> anyhow::Result<()> {
            self.calls.lock().integrated.push(*world_to_camera);
            Ok(())
        }

        fn calculate_point_cloud(
            &mut self,
            _view: &Matrix4<f32>,
            cloud: &mut PointCloud,
        ) -> anyhow::Result<()> {
            cloud.resize(2, 2);
            Ok(())
        }

        fn shade(
            &mut self,
            _cloud: &PointCloud,
            _view: &Matrix4<f32>,
            out: &mut BgraImage,
        ) -> anyhow::Result<()> {
            self.calls.lock().rendered += 1;
            out.resize(2, 2);
            Ok(())
        }

        fn reset(
            &mut self,
            _world_to_camera: &Matrix4<f32>,
            world_to_volume: &Matrix4<f32>,
        ) -> anyhow::Result<()> {
            if self.fail_reset {
                anyhow::bail!("no device");
            }
            self.calls.lock().resets.push(*world_to_volume);
            Ok(())
        }

        fn default_world_to_volume(&self) -> Matrix4<f32> {
            default_world_to_volume(&FusionConfig::default())
        }
    }

    struct Rig {
        fusion: VolumeControlLoop,
        calls: Arc<Mutex<Calls>>,
        succeed: Arc<AtomicBool>,
        commands: Sender<FusionCommand>,
        ui: Receiver<UiUpdate>,
        counters: Arc<FrameCounters>,
        pool: Pool<FusionFrame>,
    }

    impl Rig {
        fn frame(&self) -> Pooled<FusionFrame> {
            self.pool.acquire().expect("fusion pool item")
        }

        fn fusion_updates(&self) -> Vec<FusionUpdate> {
            self.ui
                .try_iter()
                .filter_map(|u| match u {
                    UiUpdate::Fusion(f) => Some(f),
                    _ => None,
                })
                .collect()
        }
    }

    fn rig(config: FusionConfig) -> Rig {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let succeed = Arc::new(AtomicBool::new(true));
        let (commands, commands_rx) = unbounded();
        let (poster, ui) = post::channel();
        let counters = Arc::new(FrameCounters::default());
        let volume = MockVolume {
            calls: Arc::clone(&calls),
            succeed: Arc::clone(&succeed),
            fail_reset: false,
        };
        let fusion = VolumeControlLoop::new(
            config,
            Box::new(volume),
            Box::new(LinearDepthConverter),
            commands_rx,
            poster,
            Arc::clone(&counters),
        )
        .unwrap();
        Rig {
            fusion,
            calls,
            succeed,
            commands,
            ui,
            counters,
            pool: Pool::new(
                2,
                DepthImageFormat::Resolution80x60Fps30,
                FusionFrame::allocate,
            ),
        }
    }

    #[test]
    fn tracked_frames_integrate_and_render_every_other_tick() {
        let mut rig = rig(FusionConfig::default());
        for _ in 0..4 {
            let frame = rig.frame();
            rig.fusion.process(frame);
        }

        let calls = rig.calls.lock();
        assert_eq!(calls.aligned, 4);
        assert_eq!(calls.integrated.len(), 4);
        assert_eq!(calls.integrated[0], refined_pose());
        assert_eq!(calls.rendered, 2);
        drop(calls);

        let updates = rig.fusion_updates();
        assert_eq!(updates.len(), 4);
        assert!(updates.iter().all(|u| u.tracking_succeeded));
        assert_eq!(
            updates.iter().map(|u| u.shaded.is_some()).collect::<Vec<_>>(),
            vec![false, true, false, true]
        );
        assert_eq!(rig.fusion.status(), TrackingStatus::Tracking);
        assert_eq!(rig.counters.fused(), 4);
        assert_eq!(rig.pool.available(), 2);
    }

    #[test]
    fn renders_reuse_buffers_and_skip_when_ui_holds_them_all() {
        let mut rig = rig(FusionConfig::default());
        let mut held = Vec::new();
        for _ in 0..2 * SHADED_BUFFERS {
            let frame = rig.frame();
            rig.fusion.process(frame);
            held.extend(rig.fusion_updates().into_iter().filter_map(|u| u.shaded));
        }
        assert_eq!(held.len(), SHADED_BUFFERS);
        assert_eq!(rig.fusion.shaded_pool().available(), 0);

        // Two more ticks: one render tick with no free buffer.
        for _ in 0..2 {
            let frame = rig.frame();
            rig.fusion.process(frame);
        }
        let updates = rig.fusion_updates();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.shaded.is_none()));
        assert_eq!(rig.calls.lock().rendered as usize, SHADED_BUFFERS);

        let mut state = post::UiState::new();
        let last = held.pop().unwrap();
        let (slot, pixels) = (last.slot(), last.pixels.as_ptr());
        state.apply(UiUpdate::Fusion(FusionUpdate {
            tracking_succeeded: true,
            status: TrackingStatus::Tracking,
            shaded: Some(last),
            alignment_energy: 0.0,
        }));
        drop(held);

        for _ in 0..2 {
            let frame = rig.frame();
            rig.fusion.process(frame);
        }
        let rendered: Vec<_> = rig
            .fusion_updates()
            .into_iter()
            .filter_map(|u| u.shaded)
            .collect();
        assert_eq!(rendered.len(), 1);
        assert_ne!(rendered[0].slot(), slot);
        assert_eq!(state.shaded().map(|s| s.pixels.as_ptr()), Some(pixels));
        assert_eq!(rig.fusion.shaded_pool().available(), SHADED_BUFFERS - 2);
    }

    #[test]
    fn paused_integration_still_tracks() {
        let mut rig = rig(FusionConfig::default());
        rig.commands
            .send(FusionCommand::SetIntegrationPaused(true))
            .unwrap();
        let frame = rig.frame();
        rig.fusion.process(frame);

        assert!(rig.fusion.integration_paused());
        let calls = rig.calls.lock();
        assert_eq!(calls.aligned, 1);
        assert!(calls.integrated.is_empty());
    }

    #[test]
    fn failures_accumulate_and_auto_reset_at_threshold() {
        let mut rig = rig(FusionConfig {
            auto_reset_when_lost: true,
            max_tracking_errors: 3,
            rotation_rate_degrees: 5.0,
            ..FusionConfig::default()
        });
        rig.succeed.store(false, Ordering::SeqCst);

        for expected in 1..3 {
            let frame = rig.frame();
            rig.fusion.process(frame);
            assert_eq!(rig.fusion.tracking_errors(), expected);
            assert_eq!(rig.fusion.status(), TrackingStatus::Lost);
        }
        assert!(rig.calls.lock().integrated.is_empty());
        assert_eq!(rig.fusion.transform().rotation_angle, 10.0);

        let frame = rig.frame();
        rig.fusion.process(frame);
        assert_eq!(rig.fusion.tracking_errors(), 0);
        assert_eq!(rig.fusion.processed(), 0);
        assert_eq!(rig.fusion.transform().rotation_angle, 0.0);
        assert_eq!(rig.counters.fused(), 0);
        // Initial placement plus the automatic reset.
        assert_eq!(rig.calls.lock().resets.len(), 2);
    }

    #[test]
    fn failures_without_auto_reset_keep_counting() {
        let mut rig = rig(FusionConfig {
            max_tracking_errors: 2,
            ..FusionConfig::default()
        });
        rig.succeed.store(false, Ordering::SeqCst);
        for _ in 0..5 {
            let frame = rig.frame();
            rig.fusion.process(frame);
        }
        assert_eq!(rig.fusion.tracking_errors(), 5);
        assert_eq!(rig.calls.lock().resets.len(), 1);

        rig.succeed.store(true, Ordering::SeqCst);
        let frame = rig.frame();
        rig.fusion.process(frame);
        assert_eq!(rig.fusion.tracking_errors(), 0);
    }

    #[test]
    fn reset_zeroes_counters_and_rotation() {
        let mut rig = rig(FusionConfig {
            rotation_rate_degrees: 2.0,
            ..FusionConfig::default()
        });
        rig.succeed.store(false, Ordering::SeqCst);
        for _ in 0..3 {
            let frame = rig.frame();
            rig.fusion.process(frame);
        }
        rig.counters.record_raw();

        rig.fusion.reset().unwrap();
        assert_eq!(rig.fusion.tracking_errors(), 0);
        assert_eq!(rig.fusion.transform().rotation_angle, 0.0);
        assert_eq!(rig.fusion.transform().world_to_camera, Matrix4::identity());
        assert_eq!(rig.counters.raw(), 0);
        assert_eq!(rig.counters.fused(), 0);
        assert_eq!(rig.fusion.status(), TrackingStatus::Idle);
    }

    #[test]
    fn body_reset_centres_volume_on_anchor() {
        let config = FusionConfig::default();
        let mut rig = rig(config);
        let anchor = Vector3::new(0.1, 0.2, 1.5);
        rig.commands
            .send(FusionCommand::Reset {
                anchor: Some(anchor),
            })
            .unwrap();
        let frame = rig.frame();
        rig.fusion.process(frame);

        let world_to_volume = *rig.calls.lock().resets.last().unwrap();
        let mapped = world_to_volume.transform_point(&anchor.into());
        let [rx, ry, rz] = config.voxel_resolution;
        assert!((mapped.x - rx as f32 / 2.0).abs() < 1e-2);
        assert!((mapped.y - ry as f32 / 2.0).abs() < 1e-2);
        assert!((mapped.z - rz as f32 / 2.0).abs() < 1e-2);
        assert_eq!(rig.fusion.transform().volume_center, anchor);
    }

    #[test]
    fn frame_anchor_is_applied_lazily_at_next_reset() {
        let mut rig = rig(FusionConfig::default());
        let anchor = Vector3::new(0.0, 0.1, 1.2);
        let mut frame = rig.frame();
        frame.anchor = Some(anchor);
        rig.fusion.process(frame);

        assert_eq!(rig.fusion.anchor(), anchor);
        assert_eq!(rig.calls.lock().resets.len(), 1);
        assert_ne!(rig.fusion.transform().volume_center, anchor);

        rig.commands
            .send(FusionCommand::Reset { anchor: None })
            .unwrap();
        let frame = rig.frame();
        rig.fusion.process(frame);
        assert_eq!(rig.fusion.transform().volume_center, anchor);
    }

    #[test]
    fn z_offset_reanchors_on_axis() {
        let mut rig = rig(FusionConfig::default());
        rig.commands.send(FusionCommand::SetZOffset(1.1)).unwrap();
        let frame = rig.frame();
        rig.fusion.process(frame);
        assert_eq!(
            rig.fusion.transform().volume_center,
            Vector3::new(0.0, 0.0, 1.1)
        );
    }

    #[test]
    fn live_camera_view_is_tracked_pose() {
        let mut rig = rig(FusionConfig::default());
        rig.commands
            .send(FusionCommand::SetTrackLiveCamera(true))
            .unwrap();
        let frame = rig.frame();
        rig.fusion.process(frame);
        assert_eq!(rig.fusion.view_transform(), refined_pose());
    }

    #[test]
    fn orbit_view_puts_volume_centre_in_front_of_camera() {
        let rig = rig(FusionConfig::default());
        let centre = rig.fusion.transform().volume_center;
        let in_view = rig.fusion.view_transform().transform_point(&centre.into());
        assert!(in_view.coords.xy().norm() < 1e-5);
        assert!((in_view.z - rig.fusion.config().orbit_distance).abs() < 1e-5);
    }

    #[test]
    fn failed_initial_reset_is_an_initialization_error() {
        let (_commands, commands_rx) = unbounded();
        let (poster, _ui) = post::channel();
        let volume = MockVolume {
            calls: Arc::default(),
            succeed: Arc::new(AtomicBool::new(true)),
            fail_reset: true,
        };
        let result = VolumeControlLoop::new(
            FusionConfig::default(),
            Box::new(volume),
            Box::new(LinearDepthConverter),
            commands_rx,
            poster,
            Arc::default(),
        );
        assert!(matches!(result, Err(FusionError::Initialization(_))));
    }

    #[test]
    fn linear_converter_clips_to_window() {
        let depth = [
            DepthPixel::new(0, 0),
            DepthPixel::new(300, 0),
            DepthPixel::new(1500, 1),
            DepthPixel::new(9000, 0),
        ];
        let mut out = DepthFloatFrame::zeros((0, 0));
        LinearDepthConverter
            .convert(&depth, 2, 2, 0.35, 8.0, &mut out)
            .unwrap();
        assert_eq!(out.dim(), (2, 2));
        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out[[0, 1]], 0.0);
        assert!((out[[1, 0]] - 1.5).abs() < 1e-6);
        assert_eq!(out[[1, 1]], 0.0);
    }
}
