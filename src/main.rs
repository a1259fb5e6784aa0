use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use face_fusion::{
    PipelineConfig,
    pipeline::{FrameCounters, FrameRateSampler, FusionSession, LinearDepthConverter},
    sim::{ReferenceVolume, SyntheticMapper, SyntheticSensor},
    types::{BgraImage, ColorImageFormat, DepthImageFormat},
    ui::{self, UiState, UiUpdate, draw_skeleton, snapshot::save_png},
};

const SENSOR_PERIOD: Duration = Duration::from_millis(33);
const DEFAULT_TICKS: u64 = 300;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let ticks = match args.next() {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("invalid tick count `{arg}`"))?,
        None => DEFAULT_TICKS,
    };
    let out_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("snapshots"));

    let config = PipelineConfig::default();
    let (poster, ui_rx) = ui::channel();
    let mut session = FusionSession::start(
        config.clone(),
        Arc::new(SyntheticMapper),
        Box::new(ReferenceVolume::new(config.fusion)),
        Box::new(LinearDepthConverter),
        poster,
    )?;
    let controls = session.controls();
    controls.set_rotation_rate(1.0)?;

    let counters = session.counters();
    let ui_thread = thread::Builder::new()
        .name("ui".into())
        .spawn(move || run_ui(&ui_rx, &counters))
        .context("failed to spawn ui thread")?;

    let mut sensor = SyntheticSensor::new(
        ColorImageFormat::Rgb640x480Fps30,
        DepthImageFormat::Resolution320x240Fps30,
    )
    .with_second_body(true);

    log::info!("running synthetic sensor for {ticks} ticks");
    let mut deadline = Instant::now();
    for _ in 0..ticks {
        let frames = sensor.next_frames();
        let outcome = session.on_all_frames_ready(&frames);
        log::trace!("tick {}: {outcome:?}", sensor.tick());

        if sensor.tick() == ticks / 2 {
            log::info!("requesting volume reset");
            controls.reset()?;
        }

        deadline += SENSOR_PERIOD;
        thread::sleep(deadline.saturating_duration_since(Instant::now()));
    }

    session.shutdown();
    drop(session);

    let state = ui_thread
        .join()
        .map_err(|_| anyhow!("ui thread panicked"))?;
    write_snapshots(&state, &out_dir)?;
    Ok(())
}

fn run_ui(rx: &Receiver<UiUpdate>, counters: &FrameCounters) -> UiState {
    let mut state = UiState::new();
    let mut sampler = FrameRateSampler::new(FrameRateSampler::DEFAULT_INTERVAL);

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(update) => {
                state.apply(update);
                state.drain(rx);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if let Some(rates) = sampler.sample(counters) {
            let text = rates.status_text();
            log::info!(
                "{text} | tracking {:?}, energy {:?}",
                state.tracking_status(),
                state.alignment_energy()
            );
            state.set_status(text);
        }
    }

    log::info!(
        "ui saw {} frame updates and {} fusion updates",
        state.frame_updates(),
        state.fusion_updates()
    );
    state
}

fn write_snapshots(state: &UiState, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    if let Some(frame) = state.frame() {
        save_png(&frame.depth, &out_dir.join("depth.png"))?;
        save_png(&frame.color, &out_dir.join("color.png"))?;

        let mut mask = BgraImage::clone(&frame.body_mask);
        if let Some(overlay) = &frame.overlay {
            draw_skeleton(&mut mask, overlay);
        }
        save_png(&mask, &out_dir.join("body_mask.png"))?;
    }
    if let Some(shaded) = state.shaded() {
        save_png(shaded, &out_dir.join("shaded.png"))?;
    }

    log::info!("snapshots written to {}", out_dir.display());
    Ok(())
}
