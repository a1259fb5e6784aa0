use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Tick counters shared between the capture thread, the fusion worker and the
/// UI side. A volume reset zeroes both.
#[derive(Debug, Default)]
pub struct FrameCounters {
    raw: AtomicU64,
    fused: AtomicU64,
}

impl FrameCounters {
    pub fn record_raw(&self) {
        self.raw.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fused(&self) {
        self.fused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn raw(&self) -> u64 {
        self.raw.load(Ordering::Relaxed)
    }

    pub fn fused(&self) -> u64 {
        self.fused.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.raw.store(0, Ordering::Relaxed);
        self.fused.store(0, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameRates {
    pub sensor_fps: f64,
    pub fusion_fps: f64,
}

impl FrameRates {
    pub fn status_text(&self) -> String {
        format!(
            "Sensor FPS: {:.1} Fusion FPS: {:.1}",
            self.sensor_fps, self.fusion_fps
        )
    }
}

#[derive(Debug)]
pub struct FrameRateSampler {
    interval: Duration,
    last_sample: Instant,
    last_raw: u64,
    last_fused: u64,
}

impl FrameRateSampler {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_sample: now,
            last_raw: 0,
            last_fused: 0,
        }
    }

    pub fn sample(&mut self, counters: &FrameCounters) -> Option<FrameRates> {
        self.sample_at(counters, Instant::now())
    }

    pub fn sample_at(&mut self, counters: &FrameCounters, now: Instant) -> Option<FrameRates> {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed < self.interval {
            return None;
        }

        let raw = counters.raw();
        let fused = counters.fused();
        // A reset in between restarts the counts from zero.
        let raw_delta = if raw >= self.last_raw { raw - self.last_raw } else { raw };
        let fused_delta = if fused >= self.last_fused {
            fused - self.last_fused
        } else {
            fused
        };

        let secs = elapsed.as_secs_f64();
        self.last_sample = now;
        self.last_raw = raw;
        self.last_fused = fused;

        Some(FrameRates {
            sensor_fps: raw_delta as f64 / secs,
            fusion_fps: fused_delta as f64 / secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_reports_rates_once_per_interval() {
        let start = Instant::now();
        let counters = FrameCounters::default();
        let mut sampler = FrameRateSampler::starting_at(Duration::from_secs(1), start);

        for _ in 0..30 {
            counters.record_raw();
        }
        for _ in 0..12 {
            counters.record_fused();
        }

        assert!(
            sampler
                .sample_at(&counters, start + Duration::from_millis(500))
                .is_none()
        );
        let rates = sampler
            .sample_at(&counters, start + Duration::from_secs(1))
            .unwrap();
        assert!((rates.sensor_fps - 30.0).abs() < 1e-9);
        assert!((rates.fusion_fps - 12.0).abs() < 1e-9);
        assert_eq!(rates.status_text(), "Sensor FPS: 30.0 Fusion FPS: 12.0");
    }

    #[test]
    fn sampler_survives_counter_reset() {
        let start = Instant::now();
        let counters = FrameCounters::default();
        let mut sampler = FrameRateSampler::starting_at(Duration::from_secs(1), start);
        for _ in 0..40 {
            counters.record_raw();
        }
        sampler.sample_at(&counters, start + Duration::from_secs(1));

        counters.reset();
        for _ in 0..5 {
            counters.record_raw();
        }
        let rates = sampler
            .sample_at(&counters, start + Duration::from_secs(2))
            .unwrap();
        assert!((rates.sensor_fps - 5.0).abs() < 1e-9);
    }
}
