//! Telemetry Sampler
//!
//! Idle -> Monitoring -> Idle. While monitoring, a background task reads the
//! device probe on a fixed interval and appends to a shared sample log.
//! `stop()` joins that task, so nothing is appended after it returns.

use crate::probe::{DeviceProbe, EnergyUnit};
use crate::sink::TelemetrySink;
use crate::{PerfMetrics, TelemetryError, TelemetrySample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Configuration for the telemetry sampler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sampling interval in milliseconds (default: 1000)
    pub interval_ms: u64,
    /// Capacity of the live subscriber channel
    pub live_channel_capacity: usize,
    /// Optional CSV log of every sample
    pub telemetry_csv: Option<PathBuf>,
    /// Root of per-core cpufreq directories
    pub cpu_root: PathBuf,
    /// Root of the power supply class
    pub power_supply_root: PathBuf,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            live_channel_capacity: 64,
            telemetry_csv: None,
            cpu_root: PathBuf::from("/sys/devices/system/cpu"),
            power_supply_root: PathBuf::from("/sys/class/power_supply"),
        }
    }
}

impl SamplerConfig {
    /// Default config with a different interval
    pub fn with_interval(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            ..Default::default()
        }
    }

    /// 100ms cadence for short runs
    pub fn fast() -> Self {
        Self::with_interval(100)
    }

    /// Sampling interval
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Sampler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Monitoring,
}

/// Energy used over a session: first level minus last level.
///
/// Only samples whose energy read succeeded count. Zero with fewer than two
/// such samples. Negative when the level rose (e.g. while charging); never
/// clamped.
pub fn energy_delta(samples: &[TelemetrySample]) -> f64 {
    let mut valid = samples.iter().filter(|s| s.energy_valid);
    match (valid.next(), valid.last()) {
        (Some(first), Some(last)) => first.energy_level - last.energy_level,
        _ => 0.0,
    }
}

/// Probe and sink, owned by the sampling task while monitoring
struct LoopParts {
    probe: Box<dyn DeviceProbe>,
    sink: Option<Box<dyn TelemetrySink>>,
}

/// A running monitoring session
struct Session {
    started: Instant,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<LoopParts>,
}

/// Background CPU/energy sampler
pub struct TelemetrySampler {
    /// Configuration
    config: SamplerConfig,
    /// Probe and sink while idle
    parts: Option<LoopParts>,
    /// Unit reported by the probe
    energy_unit: EnergyUnit,
    /// Append-only log shared with the sampling task
    samples: Arc<RwLock<Vec<TelemetrySample>>>,
    /// Active session, if monitoring
    session: Option<Session>,
}

impl TelemetrySampler {
    /// Create an idle sampler
    pub fn new(probe: Box<dyn DeviceProbe>, config: SamplerConfig) -> Self {
        let energy_unit = probe.energy_unit();
        info!(
            "Telemetry sampler created: interval={}ms, energy unit {}",
            config.interval_ms, energy_unit
        );
        Self {
            config,
            parts: Some(LoopParts { probe, sink: None }),
            energy_unit,
            samples: Arc::new(RwLock::new(Vec::new())),
            session: None,
        }
    }

    /// Persist every sample to `sink`
    pub fn with_sink(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        if let Some(parts) = self.parts.as_mut() {
            parts.sink = Some(sink);
        }
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> SamplerState {
        if self.session.is_some() {
            SamplerState::Monitoring
        } else {
            SamplerState::Idle
        }
    }

    /// Unit of energy readings
    pub fn energy_unit(&self) -> EnergyUnit {
        self.energy_unit
    }

    /// Get the sampler configuration
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Copy of the samples collected so far
    pub fn samples(&self) -> Vec<TelemetrySample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of samples collected so far
    pub fn sample_count(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Begin a monitoring session.
    ///
    /// Clears samples from any previous session. Each new sample is also
    /// offered to `live` without blocking. Fails if already monitoring.
    pub fn start(
        &mut self,
        live: Option<mpsc::Sender<TelemetrySample>>,
    ) -> Result<(), TelemetryError> {
        if self.session.is_some() {
            return Err(TelemetryError::AlreadyMonitoring);
        }
        let runtime = Handle::try_current().map_err(|e| TelemetryError::NoRuntime(e.to_string()))?;
        let parts = self
            .parts
            .take()
            .ok_or_else(|| TelemetryError::ProbeError("device probe lost by a failed session".into()))?;

        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let started = Instant::now();
        let started_at = Utc::now();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = SamplingTask {
            parts,
            samples: Arc::clone(&self.samples),
            live,
            interval: self.config.interval(),
            started,
            started_at,
            last_elapsed: None,
            last_energy: None,
        };
        let handle = runtime.spawn(task.run(shutdown_rx));

        self.session = Some(Session {
            started,
            shutdown,
            handle,
        });
        info!("Telemetry monitoring started");
        Ok(())
    }

    /// End the session, waiting for the sampling task to exit
    pub async fn stop(&mut self) -> Result<PerfMetrics, TelemetryError> {
        let session = self.session.take().ok_or(TelemetryError::NotMonitoring)?;

        // Receiver gone means the task already exited
        let _ = session.shutdown.send(true);

        match session.handle.await {
            Ok(mut parts) => {
                if let Some(sink) = parts.sink.as_mut() {
                    if let Err(e) = sink.flush() {
                        warn!("Telemetry log flush failed: {}", e);
                    }
                }
                self.parts = Some(parts);
            }
            // Probe and sink panics are caught in the task, so only an abort lands here
            Err(e) => warn!("Telemetry sampling task ended abnormally: {}", e),
        }

        let samples = self.samples();
        let metrics = PerfMetrics {
            energy_usage: energy_delta(&samples),
            energy_unit: self.energy_unit,
            duration: session.started.elapsed(),
            samples,
        };

        info!(
            "Telemetry monitoring stopped: {} samples, energy delta {:.2} {}",
            metrics.samples.len(),
            metrics.energy_usage,
            metrics.energy_unit
        );
        Ok(metrics)
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Telemetry sampler dropped while monitoring, aborting sampling task");
            let _ = session.shutdown.send(true);
            session.handle.abort();
        }
    }
}

/// State owned by the background sampling task
struct SamplingTask {
    parts: LoopParts,
    samples: Arc<RwLock<Vec<TelemetrySample>>>,
    live: Option<mpsc::Sender<TelemetrySample>>,
    interval: Duration,
    started: Instant,
    started_at: DateTime<Utc>,
    last_elapsed: Option<Duration>,
    last_energy: Option<f64>,
}

impl SamplingTask {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LoopParts {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Every session records at least one sample, however short
        ticker.tick().await;
        self.sample_once();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.sample_once(),
            }
        }

        debug!("Telemetry sampling loop exited");
        self.parts
    }

    fn sample_once(&mut self) {
        let mut elapsed = self.started.elapsed();
        if let Some(prev) = self.last_elapsed {
            if elapsed <= prev {
                elapsed = prev + Duration::from_nanos(1);
            }
        }
        self.last_elapsed = Some(elapsed);

        let probe = &mut self.parts.probe;
        let cpu = guarded("CPU utilization", || probe.cpu_utilization());
        let (cpu_utilization, cpu_flagged) = match cpu {
            Ok(value) => sanitize_utilization(value),
            Err(e) => {
                warn!("CPU utilization read failed: {}", e);
                (0.0, true)
            }
        };

        let energy = guarded("Energy level", || probe.energy_level());
        let (energy_level, energy_valid) = match energy {
            Ok(level) if level.is_finite() => {
                self.last_energy = Some(level);
                (level, true)
            }
            Ok(level) => {
                warn!("Non-finite energy level {}, excluding sample from energy delta", level);
                (self.last_energy.unwrap_or(0.0), false)
            }
            Err(e) => {
                warn!("Energy level read failed: {}", e);
                (self.last_energy.unwrap_or(0.0), false)
            }
        };

        let timestamp = chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|offset| self.started_at.checked_add_signed(offset))
            .unwrap_or(self.started_at);

        let sample = TelemetrySample {
            timestamp,
            elapsed,
            cpu_utilization,
            energy_level,
            energy_valid,
            flagged: cpu_flagged || !energy_valid,
        };

        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample.clone());

        if let Some(sink) = self.parts.sink.as_mut() {
            if let Err(e) = guarded("Telemetry log", || sink.write(&sample)) {
                warn!("Dropping telemetry log row: {}", e);
            }
        }

        if let Some(live) = &self.live {
            if let Err(e) = live.try_send(sample) {
                debug!("Live telemetry subscriber skipped a sample: {}", e);
            }
        }
    }
}

/// Run a probe or sink call, turning a panic into an error so the task
/// always hands its parts back to `stop()`
fn guarded<T>(
    what: &str,
    call: impl FnOnce() -> Result<T, TelemetryError>,
) -> Result<T, TelemetryError> {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|_| Err(TelemetryError::ProbeError(format!("{} call panicked", what))))
}

/// Clamp a utilization reading into [0, 1], flagging bad values
fn sanitize_utilization(value: f64) -> (f64, bool) {
    if !value.is_finite() {
        warn!("Non-finite CPU utilization {}, recording 0", value);
        (0.0, true)
    } else if !(0.0..=1.0).contains(&value) {
        warn!("CPU utilization {} outside [0, 1], clamping", value);
        (value.clamp(0.0, 1.0), true)
    } else {
        (value, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::SyntheticProbe;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sampler(cpu: Vec<f64>, energy: Vec<f64>) -> TelemetrySampler {
        TelemetrySampler::new(
            Box::new(SyntheticProbe::new(cpu, energy)),
            SamplerConfig::with_interval(1000),
        )
    }

    fn level(energy_level: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: Utc::now(),
            elapsed: Duration::ZERO,
            cpu_utilization: 0.0,
            energy_level,
            energy_valid: true,
            flagged: false,
        }
    }

    /// Energy reads fail on the listed calls; the CPU read panics on the listed calls
    struct FlakyProbe {
        energy: Vec<f64>,
        energy_fails_on: Vec<usize>,
        cpu_panics_on: Vec<usize>,
        energy_calls: usize,
        cpu_calls: usize,
    }

    impl FlakyProbe {
        fn new(energy: Vec<f64>) -> Self {
            Self {
                energy,
                energy_fails_on: Vec::new(),
                cpu_panics_on: Vec::new(),
                energy_calls: 0,
                cpu_calls: 0,
            }
        }
    }

    impl DeviceProbe for FlakyProbe {
        fn cpu_utilization(&mut self) -> Result<f64, TelemetryError> {
            let call = self.cpu_calls;
            self.cpu_calls += 1;
            if self.cpu_panics_on.contains(&call) {
                panic!("cpufreq driver went away");
            }
            Ok(0.25)
        }

        fn energy_level(&mut self) -> Result<f64, TelemetryError> {
            let call = self.energy_calls;
            self.energy_calls += 1;
            if self.energy_fails_on.contains(&call) {
                return Err(TelemetryError::ProbeError("battery service busy".into()));
            }
            Ok(self.energy[call.min(self.energy.len() - 1)])
        }

        fn energy_unit(&self) -> EnergyUnit {
            EnergyUnit::Millivolts
        }
    }

    fn flaky_sampler(probe: FlakyProbe) -> TelemetrySampler {
        TelemetrySampler::new(Box::new(probe), SamplerConfig::with_interval(1000))
    }

    struct FailingSink {
        attempts: Arc<AtomicUsize>,
    }

    impl TelemetrySink for FailingSink {
        fn write(&mut self, _sample: &TelemetrySample) -> Result<(), TelemetryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TelemetryError::WriteError("disk full".into()))
        }
    }

    #[test]
    fn test_energy_delta() {
        assert_eq!(energy_delta(&[]), 0.0);
        assert_eq!(energy_delta(&[level(100.0)]), 0.0);
        assert_eq!(energy_delta(&[level(100.0), level(80.0)]), 20.0);
        assert_eq!(energy_delta(&[level(80.0), level(100.0)]), -20.0);
        assert_eq!(energy_delta(&[level(90.0), level(10.0), level(85.0)]), 5.0);
    }

    #[test]
    fn test_energy_delta_skips_failed_reads() {
        let mut missing = level(0.0);
        missing.energy_valid = false;
        missing.flagged = true;

        assert_eq!(energy_delta(&[missing.clone(), level(3990.0)]), 0.0);
        assert_eq!(
            energy_delta(&[missing.clone(), level(3990.0), level(3980.0)]),
            10.0
        );
        assert_eq!(
            energy_delta(&[level(4000.0), level(3990.0), missing]),
            10.0
        );
    }

    #[test]
    fn test_sanitize_utilization() {
        assert_eq!(sanitize_utilization(0.4), (0.4, false));
        assert_eq!(sanitize_utilization(1.7), (1.0, true));
        assert_eq!(sanitize_utilization(-0.2), (0.0, true));
        assert_eq!(sanitize_utilization(f64::NAN), (0.0, true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_at_fixed_cadence() {
        let mut sampler = sampler(vec![0.5], vec![4000.0, 3990.0, 3980.0]);
        sampler.start(None).unwrap();
        assert_eq!(sampler.state(), SamplerState::Monitoring);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let metrics = sampler.stop().await.unwrap();

        assert_eq!(sampler.state(), SamplerState::Idle);
        assert!((2..=3).contains(&metrics.samples.len()));
        assert!(metrics.energy_usage > 0.0);
        assert_eq!(metrics.average_cpu_utilization(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamps_strictly_increasing() {
        let mut sampler = sampler(vec![0.3], vec![100.0]);
        sampler.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(5500)).await;
        let metrics = sampler.stop().await.unwrap();

        assert!(metrics.samples.len() >= 2);
        for pair in metrics.samples.windows(2) {
            assert!(pair[0].elapsed < pair[1].elapsed);
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_samples_after_stop() {
        let mut sampler = sampler(vec![0.3], vec![100.0]);
        sampler.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sampler.stop().await.unwrap();

        let count = sampler.sample_count();
        assert_eq!(sampler.sample_count(), count);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sampler.sample_count(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_fails_fast() {
        let mut sampler = sampler(vec![0.3], vec![100.0]);
        sampler.start(None).unwrap();

        assert!(matches!(
            sampler.start(None),
            Err(TelemetryError::AlreadyMonitoring)
        ));
        assert_eq!(sampler.state(), SamplerState::Monitoring);
        sampler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_while_idle_fails() {
        let mut sampler = sampler(vec![0.3], vec![100.0]);
        assert!(matches!(
            sampler.stop().await,
            Err(TelemetryError::NotMonitoring)
        ));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let mut sampler = sampler(vec![0.3], vec![100.0]);
        assert!(matches!(
            sampler.start(None),
            Err(TelemetryError::NoRuntime(_))
        ));
        assert_eq!(sampler.state(), SamplerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_clears_previous_session() {
        let mut sampler = sampler(vec![0.3], vec![100.0]);
        sampler.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let first = sampler.stop().await.unwrap();
        assert!(first.samples.len() >= 3);

        sampler.start(None).unwrap();
        let second = sampler.stop().await.unwrap();
        assert_eq!(second.samples.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_cpu_is_clamped() {
        let mut sampler = sampler(vec![1.7], vec![100.0]);
        sampler.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let metrics = sampler.stop().await.unwrap();

        assert!(!metrics.samples.is_empty());
        for sample in &metrics.samples {
            assert_eq!(sample.cpu_utilization, 1.0);
            assert!(sample.flagged);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_errors_do_not_stop_sampling() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut sampler = sampler(vec![0.2], vec![100.0]).with_sink(Box::new(FailingSink {
            attempts: Arc::clone(&attempts),
        }));
        let (tx, mut rx) = mpsc::channel(16);

        sampler.start(Some(tx)).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let metrics = sampler.stop().await.unwrap();

        assert!(metrics.samples.len() >= 2);
        assert_eq!(attempts.load(Ordering::SeqCst), metrics.samples.len());

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, metrics.samples.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_charging_is_negative() {
        let mut sampler = sampler(vec![0.2], vec![80.0, 100.0]);
        sampler.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let metrics = sampler.stop().await.unwrap();

        assert_eq!(metrics.samples.len(), 2);
        assert_eq!(metrics.energy_usage, -20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_energy_read_is_flagged_not_invented() {
        let mut probe = FlakyProbe::new(vec![0.0, 3990.0, 3980.0]);
        probe.energy_fails_on = vec![0];
        let mut sampler = flaky_sampler(probe);

        sampler.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let metrics = sampler.stop().await.unwrap();

        assert_eq!(metrics.samples.len(), 2);
        assert!(metrics.samples[0].flagged);
        assert!(!metrics.samples[0].energy_valid);
        assert!(metrics.samples[1].energy_valid);
        assert!(!metrics.samples[1].flagged);
        // One good reading is not enough for a delta
        assert_eq!(metrics.energy_usage, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_energy_read_mid_session() {
        let mut probe = FlakyProbe::new(vec![4000.0, 0.0, 3980.0]);
        probe.energy_fails_on = vec![1];
        let mut sampler = flaky_sampler(probe);

        sampler.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let metrics = sampler.stop().await.unwrap();

        assert_eq!(metrics.samples.len(), 3);
        assert!(metrics.samples[1].flagged);
        // Last good level is carried for display only
        assert_eq!(metrics.samples[1].energy_level, 4000.0);
        assert_eq!(metrics.energy_usage, 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_panic_keeps_sampler_reusable() {
        let mut probe = FlakyProbe::new(vec![100.0]);
        probe.cpu_panics_on = vec![0];
        let mut sampler = flaky_sampler(probe);

        sampler.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let first = sampler.stop().await.unwrap();

        assert_eq!(first.samples.len(), 2);
        assert!(first.samples[0].flagged);
        assert_eq!(first.samples[0].cpu_utilization, 0.0);
        assert_eq!(first.samples[1].cpu_utilization, 0.25);

        sampler.start(None).unwrap();
        let second = sampler.stop().await.unwrap();
        assert_eq!(second.samples.len(), 1);
        assert!(!second.samples[0].flagged);
    }

    proptest! {
        #[test]
        fn prop_energy_delta_is_first_minus_last(levels in proptest::collection::vec(-1e6f64..1e6, 2..32)) {
            let samples: Vec<_> = levels.iter().map(|&l| level(l)).collect();
            prop_assert_eq!(energy_delta(&samples), levels[0] - levels[levels.len() - 1]);
        }
    }
}
