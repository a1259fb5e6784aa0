use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use anyhow::{bail, ensure};
use nalgebra::{Matrix4, Point3, Vector3};
use ndarray::{Array2, Zip};
use rayon::prelude::*;

use crate::{
    config::FusionConfig,
    pipeline::{
        capture::{
            AllFramesReady, ColorImageFrame, CoordinateMapper, DepthImageFrame, SkeletonFrame,
        },
        fusion::{self, Alignment, DepthFloatFrame, PointCloud, ReconstructionVolume},
    },
    types::{
        BGRA_BYTES, BgraImage, ColorImageFormat, DepthImageFormat, DepthImagePoint, DepthPixel,
        JointTrackingState, JointType, Skeleton, SkeletonTrackingState, gray_bgra,
    },
};

// Kinect depth camera intrinsics at 640x480.
pub const FX: f32 = 594.21;
pub const FY: f32 = 591.04;
pub const CX: f32 = 339.5;
pub const CY: f32 = 242.7;
pub const BASE_WIDTH: f32 = 640.0;

/// Pinhole model scaled to an image width. Sensor space is metres with +y up
/// and +z away from the sensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub fn for_width(width: u32) -> Self {
        let scale = width as f32 / BASE_WIDTH;
        Self {
            fx: FX * scale,
            fy: FY * scale,
            cx: CX * scale,
            cy: CY * scale,
        }
    }

    pub fn project(&self, point: &Vector3<f32>) -> Option<(f32, f32)> {
        if point.z <= 0.0 {
            return None;
        }
        Some((
            self.cx + self.fx * point.x / point.z,
            self.cy - self.fy * point.y / point.z,
        ))
    }

    pub fn unproject(&self, u: f32, v: f32, z: f32) -> Vector3<f32> {
        Vector3::new((u - self.cx) * z / self.fx, -(v - self.cy) * z / self.fy, z)
    }
}

const HEAD_RADIUS: f32 = 0.1;
const TORSO_HALF_WIDTH: f32 = 0.18;
const BACKGROUND_MM: u16 = 2500;

/// Joint offsets from the body centre, metres, in `JointType::ALL` order.
const JOINT_OFFSETS: [(f32, f32); 20] = [
    (0.0, -0.3),
    (0.0, -0.1),
    (0.0, 0.1),
    (0.0, 0.25),
    (-0.18, 0.08),
    (-0.25, -0.15),
    (-0.27, -0.35),
    (-0.28, -0.42),
    (0.18, 0.08),
    (0.25, -0.15),
    (0.27, -0.35),
    (0.28, -0.42),
    (-0.1, -0.35),
    (-0.1, -0.75),
    (-0.1, -1.1),
    (-0.1, -1.15),
    (0.1, -0.35),
    (0.1, -0.75),
    (0.1, -1.1),
    (0.1, -1.15),
];

#[derive(Clone, Copy, Debug)]
struct SyntheticBody {
    slot: usize,
    tracking_id: u32,
    centre: Vector3<f32>,
}

impl SyntheticBody {
    fn joint(&self, joint: JointType) -> Vector3<f32> {
        let (dx, dy) = JOINT_OFFSETS[joint.index()];
        self.centre + Vector3::new(dx, dy, 0.0)
    }

    fn skeleton(&self) -> Skeleton {
        let mut skeleton = Skeleton {
            tracking_id: self.tracking_id,
            state: SkeletonTrackingState::Tracked,
            position: self.centre,
            ..Default::default()
        };
        for joint in JointType::ALL {
            let j = skeleton.joint_mut(joint);
            j.position = self.joint(joint);
            j.state = JointTrackingState::Tracked;
        }
        skeleton
    }

    fn player_index(&self) -> u8 {
        (self.slot + 1) as u8
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticFrames {
    pub color_format: ColorImageFormat,
    pub depth_format: DepthImageFormat,
    pub color: Option<Vec<u8>>,
    pub depth: Option<Vec<DepthPixel>>,
    pub skeletons: Option<Vec<Skeleton>>,
}

impl AllFramesReady for SyntheticFrames {
    fn open_color_frame(&self) -> Option<ColorImageFrame<'_>> {
        self.color.as_deref().map(|pixels| ColorImageFrame {
            format: self.color_format,
            pixels,
        })
    }

    fn open_depth_frame(&self) -> Option<DepthImageFrame<'_>> {
        self.depth.as_deref().map(|pixels| DepthImageFrame {
            format: self.depth_format,
            pixels,
        })
    }

    fn open_skeleton_frame(&self) -> Option<SkeletonFrame<'_>> {
        self.skeletons
            .as_deref()
            .map(|skeletons| SkeletonFrame { skeletons })
    }
}

/// A seated person swaying slowly in front of a flat wall, optionally with a
/// second person further back and off to the side.
#[derive(Debug)]
pub struct SyntheticSensor {
    color_format: ColorImageFormat,
    depth_format: DepthImageFormat,
    second_body: bool,
    primary_id: u32,
    tick: u64,
}

impl SyntheticSensor {
    pub const SKELETON_SLOTS: usize = 6;

    pub fn new(color_format: ColorImageFormat, depth_format: DepthImageFormat) -> Self {
        Self {
            color_format,
            depth_format,
            second_body: false,
            primary_id: 1,
            tick: 0,
        }
    }

    pub fn with_second_body(mut self, enabled: bool) -> Self {
        self.second_body = enabled;
        self
    }

    pub fn set_second_body(&mut self, enabled: bool) {
        self.second_body = enabled;
    }

    pub fn set_primary_id(&mut self, id: u32) {
        self.primary_id = id;
    }

    pub fn set_depth_format(&mut self, format: DepthImageFormat) {
        self.depth_format = format;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn next_frames(&mut self) -> SyntheticFrames {
        self.tick += 1;
        let bodies = self.bodies();

        let mut skeletons = vec![Skeleton::default(); Self::SKELETON_SLOTS];
        for body in &bodies {
            skeletons[body.slot] = body.skeleton();
        }

        SyntheticFrames {
            color_format: self.color_format,
            depth_format: self.depth_format,
            color: Some(self.render_color()),
            depth: Some(self.render_depth(&bodies)),
            skeletons: Some(skeletons),
        }
    }

    fn bodies(&self) -> Vec<SyntheticBody> {
        let sway = (self.tick as f32 * 0.05).sin() * 0.05;
        let mut bodies = vec![SyntheticBody {
            slot: 0,
            tracking_id: self.primary_id,
            centre: Vector3::new(sway, 0.0, 1.0),
        }];
        if self.second_body {
            bodies.push(SyntheticBody {
                slot: 1,
                tracking_id: self.primary_id + 100,
                centre: Vector3::new(0.7, 0.0, 2.2),
            });
        }
        bodies
    }

    fn render_color(&self) -> Vec<u8> {
        let (w, h) = self.color_format.size();
        let shade = (self.tick % 256) as u8;
        let mut pixels = vec![0u8; w as usize * h as usize * BGRA_BYTES];
        if w == 0 {
            return pixels;
        }
        pixels
            .par_chunks_mut(w as usize * BGRA_BYTES)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(BGRA_BYTES).enumerate() {
                    px.copy_from_slice(&[
                        (x * 255 / w as usize) as u8,
                        (y * 255 / h as usize) as u8,
                        shade,
                        255,
                    ]);
                }
            });
        pixels
    }

    fn render_depth(&self, bodies: &[SyntheticBody]) -> Vec<DepthPixel> {
        let (w, h) = self.depth_format.size();
        let k = Intrinsics::for_width(w);
        let mut pixels = vec![DepthPixel::new(BACKGROUND_MM, 0); w as usize * h as usize];
        if w == 0 {
            return pixels;
        }

        // Far to near so the closer body wins where they overlap.
        let mut ordered = bodies.to_vec();
        ordered.sort_by(|a, b| b.centre.z.total_cmp(&a.centre.z));

        pixels
            .par_chunks_mut(w as usize)
            .enumerate()
            .for_each(|(v, row)| {
                for (u, px) in row.iter_mut().enumerate() {
                    for body in &ordered {
                        if let Some(depth) = body_depth_at(body, &k, u as f32, v as f32) {
                            *px = DepthPixel::new(depth, body.player_index());
                        }
                    }
                }
            });
        pixels
    }
}

/// Depth in millimetres where pixel `(u, v)` hits `body`'s head sphere or
/// torso slab.
fn body_depth_at(body: &SyntheticBody, k: &Intrinsics, u: f32, v: f32) -> Option<u16> {
    let head = body.joint(JointType::Head);
    if let Some((hu, hv)) = k.project(&head) {
        let r = k.fx * HEAD_RADIUS / head.z;
        let d2 = ((u - hu).powi(2) + (v - hv).powi(2)) / (r * r);
        if d2 <= 1.0 {
            let z = head.z - HEAD_RADIUS * (1.0 - d2).sqrt();
            return Some((z * 1000.0) as u16);
        }
    }

    let neck = body.joint(JointType::ShoulderCenter);
    let hip = body.joint(JointType::HipCenter);
    let top_left = neck + Vector3::new(-TORSO_HALF_WIDTH, 0.0, 0.0);
    let bottom_right = hip + Vector3::new(TORSO_HALF_WIDTH, 0.0, 0.0);
    let ((u0, v0), (u1, v1)) = (k.project(&top_left)?, k.project(&bottom_right)?);
    if (u0..=u1).contains(&u) && (v0..=v1).contains(&v) {
        return Some((body.centre.z * 1000.0) as u16);
    }
    None
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticMapper;

impl CoordinateMapper for SyntheticMapper {
    fn map_color_frame_to_depth_frame(
        &self,
        color_format: ColorImageFormat,
        depth_format: DepthImageFormat,
        depth_pixels: &[DepthPixel],
        out: &mut [DepthImagePoint],
    ) -> anyhow::Result<()> {
        let (cw, ch) = color_format.size();
        let (dw, dh) = depth_format.size();
        ensure!(
            out.len() == color_format.pixel_count(),
            "registration buffer holds {} points, color has {}",
            out.len(),
            color_format.pixel_count()
        );
        ensure!(
            depth_pixels.len() == depth_format.pixel_count(),
            "depth buffer holds {} pixels, format has {}",
            depth_pixels.len(),
            depth_format.pixel_count()
        );
        if cw == 0 {
            return Ok(());
        }

        let (cw, ch, dw, dh) = (cw as usize, ch as usize, dw as usize, dh as usize);
        out.par_chunks_mut(cw).enumerate().for_each(|(cy, row)| {
            let dy = cy * dh / ch;
            for (cx, point) in row.iter_mut().enumerate() {
                let dx = cx * dw / cw;
                let depth = depth_pixels.get(dy * dw + dx).map_or(0, |px| px.depth);
                *point = DepthImagePoint::new(dx as i32, dy as i32, depth);
            }
        });
        Ok(())
    }

    fn map_skeleton_point_to_depth(
        &self,
        point: &Vector3<f32>,
        depth_format: DepthImageFormat,
    ) -> DepthImagePoint {
        let (w, _) = depth_format.size();
        match Intrinsics::for_width(w).project(point) {
            Some((u, v)) => DepthImagePoint::new(
                u.round() as i32,
                v.round() as i32,
                (point.z * 1000.0) as u16,
            ),
            None => DepthImagePoint::new(-1, -1, 0),
        }
    }
}

/// A 2.5D stand-in for the volumetric engine: a per-pixel weighted running
/// average of integrated depth, ray-cast by back-projection. The sensor is
/// assumed static, so alignment returns its seed.
#[derive(Debug)]
pub struct ReferenceVolume {
    config: FusionConfig,
    world_to_volume: Matrix4<f32>,
    surface: Array2<f32>,
    weights: Array2<f32>,
    fail_alignment: Arc<AtomicBool>,
    integrated: Arc<AtomicU64>,
    unavailable: bool,
}

impl ReferenceVolume {
    pub const MAX_WEIGHT: f32 = 1000.0;

    pub fn new(config: FusionConfig) -> Self {
        Self {
            world_to_volume: fusion::default_world_to_volume(&config),
            config,
            surface: Array2::zeros((0, 0)),
            weights: Array2::zeros((0, 0)),
            fail_alignment: Arc::new(AtomicBool::new(false)),
            integrated: Arc::new(AtomicU64::new(0)),
            unavailable: false,
        }
    }

    pub fn unavailable(config: FusionConfig) -> Self {
        Self {
            unavailable: true,
            ..Self::new(config)
        }
    }

    /// While set, every alignment reports non-convergence.
    pub fn alignment_failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_alignment)
    }

    pub fn integration_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.integrated)
    }

    pub fn world_to_volume(&self) -> &Matrix4<f32> {
        &self.world_to_volume
    }

    fn surface_point(&self, k: &Intrinsics, x: usize, y: usize) -> Option<Vector3<f32>> {
        let z = *self.surface.get([y, x])?;
        (z > 0.0).then(|| k.unproject(x as f32, y as f32, z))
    }
}

impl ReconstructionVolume for ReferenceVolume {
    fn align_to_reconstruction(
        &mut self,
        depth: &DepthFloatFrame,
        _iterations: u32,
        seed_world_to_camera: &Matrix4<f32>,
    ) -> anyhow::Result<Alignment> {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        if self.surface.dim() == depth.dim() {
            Zip::from(&self.surface).and(depth).for_each(|&s, &d| {
                if s > 0.0 && d > 0.0 {
                    sum += (s - d).abs();
                    count += 1;
                }
            });
        }
        let energy = if count == 0 { 0.0 } else { sum / count as f32 };

        Ok(Alignment {
            succeeded: !self.fail_alignment.load(Ordering::Relaxed),
            world_to_camera: *seed_world_to_camera,
            energy,
        })
    }

    fn integrate(
        &mut self,
        depth: &DepthFloatFrame,
        weight: u16,
        _world_to_camera: &Matrix4<f32>,
    ) -> anyhow::Result<()> {
        if self.surface.dim() != depth.dim() {
            self.surface = Array2::zeros(depth.dim());
            self.weights = Array2::zeros(depth.dim());
        }
        let weight = weight.max(1) as f32;
        Zip::from(&mut self.surface)
            .and(&mut self.weights)
            .and(depth)
            .for_each(|s, w, &d| {
                if d > 0.0 {
                    *s = (*s * *w + d * weight) / (*w + weight);
                    *w = (*w + weight).min(Self::MAX_WEIGHT);
                }
            });
        self.integrated.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn calculate_point_cloud(
        &mut self,
        view: &Matrix4<f32>,
        cloud: &mut PointCloud,
    ) -> anyhow::Result<()> {
        let (h, w) = self.surface.dim();
        cloud.resize(w as u32, h as u32);
        if w == 0 {
            return Ok(());
        }
        let k = Intrinsics::for_width(w as u32);
        let rotation = view.fixed_view::<3, 3>(0, 0).into_owned();
        let this = &*self;

        cloud
            .points
            .par_chunks_mut(w)
            .zip(cloud.normals.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, (points, normals))| {
                for (x, (point, normal)) in points.iter_mut().zip(normals.iter_mut()).enumerate() {
                    *point = Vector3::zeros();
                    *normal = Vector3::zeros();
                    let Some(p) = this.surface_point(&k, x, y) else {
                        continue;
                    };
                    *point = view.transform_point(&Point3::from(p)).coords;

                    let right = this.surface_point(&k, x + 1, y);
                    let down = this.surface_point(&k, x, y + 1);
                    if let (Some(right), Some(down)) = (right, down) {
                        let n = (down - p).cross(&(right - p));
                        if let Some(n) = n.try_normalize(1e-9) {
                            *normal = rotation * n;
                        }
                    }
                }
            });
        Ok(())
    }

    fn shade(
        &mut self,
        cloud: &PointCloud,
        _view: &Matrix4<f32>,
        out: &mut BgraImage,
    ) -> anyhow::Result<()> {
        out.resize(cloud.width, cloud.height);
        let w = cloud.width as usize;
        if w == 0 {
            return Ok(());
        }

        out.pixels
            .par_chunks_mut(w * BGRA_BYTES)
            .zip(cloud.points.par_chunks(w))
            .zip(cloud.normals.par_chunks(w))
            .for_each(|((row, points), normals)| {
                let pixels = row.chunks_exact_mut(BGRA_BYTES).zip(points.iter().zip(normals));
                for (px, (point, normal)) in pixels {
                    let lit = match point.try_normalize(1e-9) {
                        Some(dir) if normal.norm_squared() > 0.0 => normal.dot(&-dir).abs(),
                        Some(_) => 0.5,
                        None => 0.0,
                    };
                    px.copy_from_slice(&gray_bgra((lit.clamp(0.0, 1.0) * 255.0) as u8));
                }
            });
        Ok(())
    }

    fn reset(
        &mut self,
        _world_to_camera: &Matrix4<f32>,
        world_to_volume: &Matrix4<f32>,
    ) -> anyhow::Result<()> {
        if self.unavailable {
            bail!("reconstruction engine unavailable");
        }
        self.world_to_volume = *world_to_volume;
        self.surface.fill(0.0);
        self.weights.fill(0.0);
        self.integrated.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn default_world_to_volume(&self) -> Matrix4<f32> {
        fusion::default_world_to_volume(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_round_trip_through_projection() {
        let k = Intrinsics::for_width(320);
        let p = Vector3::new(0.1, -0.2, 1.5);
        let (u, v) = k.project(&p).unwrap();
        let back = k.unproject(u, v, p.z);
        assert!((back - p).norm() < 1e-5);
        assert!(k.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn sensor_segments_near_body_as_player_one() {
        let mut sensor = SyntheticSensor::new(
            ColorImageFormat::Rgb640x480Fps30,
            DepthImageFormat::Resolution80x60Fps30,
        )
        .with_second_body(true);
        let frames = sensor.next_frames();

        let depth = frames.depth.as_deref().unwrap();
        assert_eq!(depth.len(), 80 * 60);
        let players: Vec<u8> = depth.iter().map(|px| px.player_index).collect();
        assert!(players.contains(&1));
        assert!(players.contains(&2));
        assert!(players.contains(&0));

        let skeletons = frames.skeletons.as_deref().unwrap();
        assert_eq!(skeletons.len(), SyntheticSensor::SKELETON_SLOTS);
        assert_eq!(skeletons.iter().filter(|s| s.is_tracked()).count(), 2);

        // The head projects onto a head pixel owned by the near body.
        let head = SyntheticMapper.map_skeleton_point_to_depth(
            &skeletons[0].joint(JointType::Head).position,
            frames.depth_format,
        );
        let idx = head.index_in(80, 60).unwrap();
        assert_eq!(depth[idx].player_index, 1);
        assert!(depth[idx].depth < 1000);
    }

    #[test]
    fn mapper_scales_color_onto_depth() {
        let depth = vec![DepthPixel::new(1234, 0); 80 * 60];
        let mut out = vec![DepthImagePoint::default(); 640 * 480];
        SyntheticMapper
            .map_color_frame_to_depth_frame(
                ColorImageFormat::Rgb640x480Fps30,
                DepthImageFormat::Resolution80x60Fps30,
                &depth,
                &mut out,
            )
            .unwrap();
        assert_eq!(out[0], DepthImagePoint::new(0, 0, 1234));
        assert_eq!(out[639 + 479 * 640], DepthImagePoint::new(79, 59, 1234));

        let mut short = vec![DepthImagePoint::default(); 10];
        assert!(
            SyntheticMapper
                .map_color_frame_to_depth_frame(
                    ColorImageFormat::Rgb640x480Fps30,
                    DepthImageFormat::Resolution80x60Fps30,
                    &depth,
                    &mut short,
                )
                .is_err()
        );
    }

    #[test]
    fn reference_volume_integrates_and_shades_surface() {
        let mut volume = ReferenceVolume::new(FusionConfig::default());
        volume
            .reset(&Matrix4::identity(), &volume.default_world_to_volume())
            .unwrap();

        let mut depth = DepthFloatFrame::zeros((4, 4));
        depth.fill(1.0);
        volume.integrate(&depth, 30, &Matrix4::identity()).unwrap();
        depth.fill(1.2);
        let alignment = volume
            .align_to_reconstruction(&depth, 7, &Matrix4::identity())
            .unwrap();
        assert!(alignment.succeeded);
        assert!((alignment.energy - 0.2).abs() < 1e-5);

        let mut cloud = PointCloud::default();
        volume
            .calculate_point_cloud(&Matrix4::identity(), &mut cloud)
            .unwrap();
        let mut shaded = BgraImage::default();
        volume
            .shade(&cloud, &Matrix4::identity(), &mut shaded)
            .unwrap();
        assert_eq!((shaded.width, shaded.height), (4, 4));
        // A flat wall facing the camera is lit almost fully near the centre.
        assert!(shaded.pixel(1, 1).unwrap()[0] > 200);
        assert_eq!(volume.integration_counter().load(Ordering::Relaxed), 1);

        volume.alignment_failure_switch().store(true, Ordering::Relaxed);
        assert!(
            !volume
                .align_to_reconstruction(&depth, 7, &Matrix4::identity())
                .unwrap()
                .succeeded
        );
    }

    #[test]
    fn unavailable_volume_refuses_reset() {
        let mut volume = ReferenceVolume::unavailable(FusionConfig::default());
        assert!(
            volume
                .reset(&Matrix4::identity(), &Matrix4::identity())
                .is_err()
        );
    }
}
