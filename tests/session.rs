use std::{
    sync::{Arc, atomic::Ordering},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use face_fusion::{
    FusionError, PipelineConfig,
    pipeline::{
        CaptureOutcome, CoordinateMapper, FusionSession, LinearDepthConverter, TrackingStatus,
    },
    sim::{ReferenceVolume, SyntheticMapper, SyntheticSensor},
    types::{ColorImageFormat, DepthImageFormat, DepthImagePoint, DepthPixel},
    ui::{self, UiState, UiUpdate},
};
use nalgebra::Vector3;

const WAIT: Duration = Duration::from_secs(10);

fn sensor() -> SyntheticSensor {
    SyntheticSensor::new(
        ColorImageFormat::Rgb640x480Fps30,
        DepthImageFormat::Resolution80x60Fps30,
    )
}

fn start(volume: ReferenceVolume) -> (FusionSession, Receiver<UiUpdate>) {
    start_with_mapper(volume, Arc::new(SyntheticMapper))
}

fn start_with_mapper(
    volume: ReferenceVolume,
    mapper: Arc<dyn CoordinateMapper>,
) -> (FusionSession, Receiver<UiUpdate>) {
    let config = PipelineConfig::default();
    let (poster, rx) = ui::channel();
    let session = FusionSession::start(
        config,
        mapper,
        Box::new(volume),
        Box::new(LinearDepthConverter),
        poster,
    )
    .expect("session starts");
    (session, rx)
}

fn pump(session: &mut FusionSession, sensor: &mut SyntheticSensor, ticks: usize) {
    for _ in 0..ticks {
        let frames = sensor.next_frames();
        session.on_all_frames_ready(&frames);
        thread::sleep(Duration::from_millis(15));
    }
}

/// Fold UI updates into `state` until `done` holds, feeding the sensor while
/// waiting so the pipeline keeps moving.
fn pump_until(
    session: &mut FusionSession,
    sensor: &mut SyntheticSensor,
    rx: &Receiver<UiUpdate>,
    state: &mut UiState,
    done: impl Fn(&UiState) -> bool,
) {
    let deadline = Instant::now() + WAIT;
    while !done(state) {
        assert!(Instant::now() < deadline, "timed out waiting for ui state");
        pump(session, sensor, 1);
        state.drain(rx);
    }
}

#[test]
fn synthetic_session_produces_views_and_renders() {
    let (mut session, rx) = start(ReferenceVolume::new(PipelineConfig::default().fusion));
    let mut sensor = sensor();
    let mut state = UiState::new();

    pump_until(&mut session, &mut sensor, &rx, &mut state, |s| {
        s.frame().is_some() && s.shaded().is_some()
    });

    let frame = state.frame().unwrap();
    assert_eq!((frame.depth.width, frame.depth.height), (80, 60));
    assert_eq!(frame.active_body, Some(1));
    assert!(frame.overlay.is_some());
    assert!(frame.body_mask.pixels.chunks_exact(4).any(|px| px[0] > 0));
    assert_eq!(state.tracking_succeeded(), Some(true));
    assert_eq!(state.tracking_status(), TrackingStatus::Tracking);

    session.shutdown();
    assert_eq!(session.frame_pool().available(), session.frame_pool().size());
    assert_eq!(session.fusion_pool().available(), session.fusion_pool().size());
    assert_eq!(session.on_all_frames_ready(&sensor.next_frames()), CaptureOutcome::Stopped);
}

#[test]
fn unavailable_engine_fails_start() {
    let config = PipelineConfig::default();
    let (poster, _rx) = ui::channel();
    let result = FusionSession::start(
        config.clone(),
        Arc::new(SyntheticMapper),
        Box::new(ReferenceVolume::unavailable(config.fusion)),
        Box::new(LinearDepthConverter),
        poster,
    );
    assert!(matches!(result, Err(FusionError::Initialization(_))));
}

#[test]
fn incomplete_tick_is_skipped() {
    let (mut session, _rx) = start(ReferenceVolume::new(PipelineConfig::default().fusion));
    let mut sensor = sensor();

    let mut frames = sensor.next_frames();
    frames.skeletons = None;
    assert_eq!(session.on_all_frames_ready(&frames), CaptureOutcome::Incomplete);
    assert_eq!(session.counters().raw(), 0);
    assert_eq!(session.format(), None);
}

#[test]
fn depth_format_change_reallocates_mid_stream() {
    let (mut session, rx) = start(ReferenceVolume::new(PipelineConfig::default().fusion));
    let mut sensor = sensor();
    let mut state = UiState::new();

    pump_until(&mut session, &mut sensor, &rx, &mut state, |s| s.frame().is_some());

    sensor.set_depth_format(DepthImageFormat::Resolution320x240Fps30);
    pump_until(&mut session, &mut sensor, &rx, &mut state, |s| {
        s.frame().is_some_and(|f| f.depth.width == 320)
    });
    assert_eq!(
        session.fusion_pool().format(),
        DepthImageFormat::Resolution320x240Fps30
    );
    assert_eq!(
        session.format().map(|f| f.depth),
        Some(DepthImageFormat::Resolution320x240Fps30)
    );
}

#[test]
fn tracking_failure_is_surfaced() {
    let volume = ReferenceVolume::new(PipelineConfig::default().fusion);
    let fail = volume.alignment_failure_switch();
    let (mut session, rx) = start(volume);
    let mut sensor = sensor();
    let mut state = UiState::new();

    fail.store(true, Ordering::Relaxed);
    pump_until(&mut session, &mut sensor, &rx, &mut state, |s| {
        s.tracking_status() == TrackingStatus::Lost
    });
    assert_eq!(state.tracking_succeeded(), Some(false));

    fail.store(false, Ordering::Relaxed);
    pump_until(&mut session, &mut sensor, &rx, &mut state, |s| {
        s.tracking_status() == TrackingStatus::Tracking
    });
}

#[test]
fn controls_fail_after_shutdown() {
    let (mut session, _rx) = start(ReferenceVolume::new(PipelineConfig::default().fusion));
    let controls = session.controls();
    assert!(controls.set_rotation_rate(2.0).is_ok());

    session.shutdown();
    assert!(matches!(controls.reset(), Err(FusionError::Stopped)));
}

/// Registers color like the synthetic sensor but either panics or lands far
/// off the image when projecting skeleton joints.
struct BrokenSkeletonMapper {
    panic: bool,
}

impl CoordinateMapper for BrokenSkeletonMapper {
    fn map_color_frame_to_depth_frame(
        &self,
        color_format: ColorImageFormat,
        depth_format: DepthImageFormat,
        depth_pixels: &[DepthPixel],
        out: &mut [DepthImagePoint],
    ) -> anyhow::Result<()> {
        SyntheticMapper.map_color_frame_to_depth_frame(
            color_format,
            depth_format,
            depth_pixels,
            out,
        )
    }

    fn map_skeleton_point_to_depth(
        &self,
        _point: &Vector3<f32>,
        _depth_format: DepthImageFormat,
    ) -> DepthImagePoint {
        if self.panic {
            panic!("calibration table missing");
        }
        DepthImagePoint::new(i32::MIN, i32::MAX, 0)
    }
}

#[test]
fn worker_panic_is_posted_as_status() {
    let volume = ReferenceVolume::new(PipelineConfig::default().fusion);
    let (mut session, rx) =
        start_with_mapper(volume, Arc::new(BrokenSkeletonMapper { panic: true }));
    let mut sensor = sensor();
    let mut state = UiState::new();

    pump_until(&mut session, &mut sensor, &rx, &mut state, |s| {
        s.status().starts_with("Frame error")
    });
    assert!(state.status().contains("calibration table missing"));
    assert!(state.frame().is_none());

    session.shutdown();
    assert_eq!(session.frame_pool().available(), session.frame_pool().size());
}

#[test]
fn off_image_joints_still_produce_views() {
    let volume = ReferenceVolume::new(PipelineConfig::default().fusion);
    let (mut session, rx) =
        start_with_mapper(volume, Arc::new(BrokenSkeletonMapper { panic: false }));
    let mut sensor = sensor();
    let mut state = UiState::new();

    pump_until(&mut session, &mut sensor, &rx, &mut state, |s| s.frame_updates() >= 3);
    let overlay = state.frame().and_then(|f| f.overlay.clone()).expect("overlay");
    assert!(overlay.joints.iter().all(Option::is_none));
    assert!(!state.status().starts_with("Frame error"));
}
