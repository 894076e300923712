//! # Meter Value Scheduler
//!
//! This module produces periodic energy meter updates for a connector while
//! a transaction is active, using one of two interchangeable strategies:
//!
//! - Increment: add a fixed delta on a fixed interval
//! - Curve: Bézier-interpolated value over operator-placed control points
//!
//! Each update is written into connector state through the injected sink and
//! then forwarded to the protocol layer so the collaborator can send it.

use crate::config::MeterConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// One control point of a charging curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Offset from session start in minutes
    pub time_minutes: f64,
    /// Meter value at this point in kWh
    pub value_kwh: f64,
}

/// Curve strategy configuration; points must be ordered by time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveConfig {
    pub points: Vec<CurvePoint>,
    /// Fixed tick interval in seconds; `None` derives one from the curve span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
}

/// Increment strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementConfig {
    /// Tick interval in seconds, clamped to a minimum of 1s
    pub interval_seconds: u64,
    /// Delta added to the meter register per tick in Wh
    pub increment_wh: i64,
    /// Stop after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time_seconds: Option<u64>,
    /// Stop once the register reaches this value (the final tick clamps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value_wh: Option<i64>,
}

/// Meter progression strategy; only one may be active per connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MeterValueStrategy {
    Increment(IncrementConfig),
    Curve(CurveConfig),
}

/// Receives each freshly computed meter value
#[async_trait]
pub trait MeterValueSink: Send + Sync {
    /// Current meter register, read before applying an increment
    async fn current_value_wh(&self) -> i64;
    /// Write the updated value into connector state
    async fn set_value_wh(&self, value_wh: i64);
    /// Forward the updated value to the protocol layer
    async fn send_value_wh(&self, value_wh: i64);
}

/// Evaluate the charging curve at `elapsed_minutes` using De Casteljau's
/// algorithm over the control point values.
///
/// Elapsed time is clamped to the curve's time domain, so values outside it
/// hold at the nearest boundary instead of extrapolating. Two control points
/// degenerate to exact linear interpolation, one point to a constant.
/// Returns `None` for an empty point list.
pub fn curve_value_kwh(points: &[CurvePoint], elapsed_minutes: f64) -> Option<f64> {
    let (first, last) = (points.first()?, points.last()?);
    if points.len() == 1 {
        return Some(first.value_kwh);
    }

    let clamped = elapsed_minutes.clamp(first.time_minutes, last.time_minutes);
    let span = last.time_minutes - first.time_minutes;
    let u = if span <= f64::EPSILON {
        0.0
    } else {
        (clamped - first.time_minutes) / span
    };

    let mut values: Vec<f64> = points.iter().map(|p| p.value_kwh).collect();
    let mut len = values.len();
    while len > 1 {
        for i in 0..len - 1 {
            values[i] += (values[i + 1] - values[i]) * u;
        }
        len -= 1;
    }
    Some(values[0])
}

/// Tick interval for a curve strategy: the configured fixed interval, or one
/// derived so roughly `auto_tick_target_samples` ticks span the curve,
/// bounded to a sane refresh rate.
fn curve_tick_interval(curve: &CurveConfig, config: &MeterConfig) -> Duration {
    if let Some(seconds) = curve.interval_seconds {
        return Duration::from_secs(seconds.max(1));
    }

    let duration_minutes = match (curve.points.first(), curve.points.last()) {
        (Some(first), Some(last)) => (last.time_minutes - first.time_minutes).max(0.0),
        _ => 0.0,
    };
    let raw = duration_minutes * 60.0 / config.auto_tick_target_samples.max(1) as f64;
    Duration::from_secs_f64(raw.clamp(
        config.auto_tick_min_secs as f64,
        config.auto_tick_max_secs as f64,
    ))
}

/// Timer-driven meter value generator for one connector.
///
/// Starting a strategy always stops the previous one first; no two
/// strategies run concurrently against the same connector.
pub struct MeterValueScheduler {
    config: MeterConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl MeterValueScheduler {
    /// Create an idle scheduler
    pub fn new(config: MeterConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
            stop_tx: Mutex::new(None),
        }
    }

    /// Start a strategy, replacing whatever was running before
    pub fn start(&self, strategy: MeterValueStrategy, sink: Arc<dyn MeterValueSink>) {
        self.stop();

        let (stop_tx, stop_rx) = watch::channel(false);
        let config = self.config.clone();
        let handle = tokio::spawn(async move {
            match strategy {
                MeterValueStrategy::Increment(increment) => {
                    run_increment(increment, sink, config, stop_rx).await
                }
                MeterValueStrategy::Curve(curve) => run_curve(curve, sink, config, stop_rx).await,
            }
        });

        *self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(stop_tx);
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stop the active strategy and reset elapsed-time tracking
    pub fn stop(&self) {
        if let Some(stop_tx) = self
            .stop_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
            debug!("meter value scheduler stopped");
        }
    }

    /// Whether a strategy timer is currently armed
    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for MeterValueScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_increment(
    config: IncrementConfig,
    sink: Arc<dyn MeterValueSink>,
    meter_config: MeterConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    let interval_secs = config
        .interval_seconds
        .max(meter_config.min_increment_interval_secs.max(1));
    let started = Instant::now();
    let mut timer = interval(Duration::from_secs(interval_secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval() fires immediately; the first increment belongs one period in
    timer.tick().await;

    debug!(
        "increment strategy started: +{} Wh every {}s",
        config.increment_wh, interval_secs
    );

    loop {
        tokio::select! {
            _ = timer.tick() => {
                if let Some(max_time) = config.max_time_seconds {
                    if started.elapsed() >= Duration::from_secs(max_time) {
                        debug!("increment strategy reached max time");
                        break;
                    }
                }

                let mut next = sink.current_value_wh().await + config.increment_wh;
                let mut exhausted = false;
                if let Some(max_value) = config.max_value_wh {
                    if next >= max_value {
                        next = max_value;
                        exhausted = true;
                    }
                }

                sink.set_value_wh(next).await;
                sink.send_value_wh(next).await;
                trace!("increment tick: {} Wh", next);

                if exhausted {
                    debug!("increment strategy reached max value");
                    break;
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_curve(
    config: CurveConfig,
    sink: Arc<dyn MeterValueSink>,
    meter_config: MeterConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    if config.points.is_empty() {
        warn!("curve strategy started with no control points");
        return;
    }

    let tick = curve_tick_interval(&config, &meter_config);
    let started = Instant::now();
    let mut timer = interval(tick);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        "curve strategy started: {} points, tick {:?}",
        config.points.len(),
        tick
    );

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let elapsed_minutes = started.elapsed().as_secs_f64() / 60.0;
                if let Some(kwh) = curve_value_kwh(&config.points, elapsed_minutes) {
                    let value_wh = (kwh * 1000.0).round() as i64;
                    sink.set_value_wh(value_wh).await;
                    sink.send_value_wh(value_wh).await;
                    trace!("curve tick: {:.1} min -> {} Wh", elapsed_minutes, value_wh);
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    fn points(raw: &[(f64, f64)]) -> Vec<CurvePoint> {
        raw.iter()
            .map(|(time_minutes, value_kwh)| CurvePoint {
                time_minutes: *time_minutes,
                value_kwh: *value_kwh,
            })
            .collect()
    }

    struct RecordingSink {
        value: AsyncMutex<i64>,
        sent: AsyncMutex<Vec<i64>>,
    }

    impl RecordingSink {
        fn new(initial: i64) -> Arc<Self> {
            Arc::new(Self {
                value: AsyncMutex::new(initial),
                sent: AsyncMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MeterValueSink for RecordingSink {
        async fn current_value_wh(&self) -> i64 {
            *self.value.lock().await
        }

        async fn set_value_wh(&self, value_wh: i64) {
            *self.value.lock().await = value_wh;
        }

        async fn send_value_wh(&self, value_wh: i64) {
            self.sent.lock().await.push(value_wh);
        }
    }

    #[test]
    fn test_curve_two_points_is_linear_interpolation() {
        let points = points(&[(0.0, 0.0), (10.0, 20.0)]);

        assert_eq!(curve_value_kwh(&points, 0.0), Some(0.0));
        assert_eq!(curve_value_kwh(&points, 5.0), Some(10.0));
        assert_eq!(curve_value_kwh(&points, 10.0), Some(20.0));
    }

    #[test]
    fn test_curve_clamps_outside_domain() {
        let points = points(&[(5.0, 2.0), (15.0, 8.0)]);

        // Before the domain holds the first value, after it the last.
        assert_eq!(curve_value_kwh(&points, 0.0), Some(2.0));
        assert_eq!(curve_value_kwh(&points, 100.0), Some(8.0));
    }

    #[test]
    fn test_curve_is_deterministic() {
        let points = points(&[(0.0, 1.0), (10.0, 5.0), (20.0, 3.0), (30.0, 9.0)]);

        let first = curve_value_kwh(&points, 12.5);
        let second = curve_value_kwh(&points, 12.5);
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn test_curve_degenerate_cases() {
        assert_eq!(curve_value_kwh(&[], 1.0), None);

        let single = points(&[(3.0, 7.5)]);
        assert_eq!(curve_value_kwh(&single, 0.0), Some(7.5));
        assert_eq!(curve_value_kwh(&single, 99.0), Some(7.5));
    }

    #[test]
    fn test_curve_midpoint_of_quadratic() {
        // De Casteljau at u = 0.5 over three values a, b, c gives
        // (a + 2b + c) / 4.
        let points = points(&[(0.0, 0.0), (5.0, 4.0), (10.0, 0.0)]);
        assert_eq!(curve_value_kwh(&points, 5.0), Some(2.0));
    }

    #[test]
    fn test_auto_tick_interval_bounds() {
        let config = MeterConfig::default();

        // 10 minute span / 100 samples = 6s, inside the bounds.
        let curve = CurveConfig {
            points: points(&[(0.0, 0.0), (10.0, 1.0)]),
            interval_seconds: None,
        };
        assert_eq!(curve_tick_interval(&curve, &config), Duration::from_secs(6));

        // A short curve clamps to the minimum rate.
        let short = CurveConfig {
            points: points(&[(0.0, 0.0), (1.0, 1.0)]),
            interval_seconds: None,
        };
        assert_eq!(curve_tick_interval(&short, &config), Duration::from_secs(5));

        // A very long curve clamps to the maximum rate.
        let long = CurveConfig {
            points: points(&[(0.0, 0.0), (1000.0, 1.0)]),
            interval_seconds: None,
        };
        assert_eq!(curve_tick_interval(&long, &config), Duration::from_secs(60));

        // Explicit intervals win and never drop below 1s.
        let fixed = CurveConfig {
            points: points(&[(0.0, 0.0), (10.0, 1.0)]),
            interval_seconds: Some(0),
        };
        assert_eq!(curve_tick_interval(&fixed, &config), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_strategy_arithmetic() {
        let sink = RecordingSink::new(1000);
        let scheduler = MeterValueScheduler::new(MeterConfig::default());

        scheduler.start(
            MeterValueStrategy::Increment(IncrementConfig {
                interval_seconds: 1,
                increment_wh: 500,
                max_time_seconds: None,
                max_value_wh: None,
            }),
            sink.clone(),
        );
        assert!(scheduler.is_active());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        scheduler.stop();

        // Ticks at 1s, 2s and 3s: 1000 + 3 * 500.
        assert_eq!(*sink.value.lock().await, 2500);
        assert_eq!(*sink.sent.lock().await, vec![1500, 2000, 2500]);
        assert!(!scheduler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_strategy_stops_at_max_value() {
        let sink = RecordingSink::new(0);
        let scheduler = MeterValueScheduler::new(MeterConfig::default());

        scheduler.start(
            MeterValueStrategy::Increment(IncrementConfig {
                interval_seconds: 1,
                increment_wh: 400,
                max_time_seconds: None,
                max_value_wh: Some(1000),
            }),
            sink.clone(),
        );

        tokio::time::sleep(Duration::from_millis(5500)).await;

        // 400, 800, then clamped to 1000 and stopped.
        assert_eq!(*sink.sent.lock().await, vec![400, 800, 1000]);
        assert!(!scheduler.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_clamped_to_one_second() {
        let sink = RecordingSink::new(0);
        let scheduler = MeterValueScheduler::new(MeterConfig::default());

        scheduler.start(
            MeterValueStrategy::Increment(IncrementConfig {
                interval_seconds: 0,
                increment_wh: 10,
                max_time_seconds: None,
                max_value_wh: None,
            }),
            sink.clone(),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.stop();

        // A zero interval must not busy-tick; it runs at the 1s floor.
        assert_eq!(*sink.sent.lock().await, vec![10, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starting_new_strategy_replaces_previous() {
        let sink = RecordingSink::new(0);
        let scheduler = MeterValueScheduler::new(MeterConfig::default());

        scheduler.start(
            MeterValueStrategy::Increment(IncrementConfig {
                interval_seconds: 1,
                increment_wh: 1,
                max_time_seconds: None,
                max_value_wh: None,
            }),
            sink.clone(),
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Replacing resets elapsed tracking and the previous timer is gone.
        scheduler.start(
            MeterValueStrategy::Curve(CurveConfig {
                points: points(&[(0.0, 0.0), (1.0, 6.0)]),
                interval_seconds: Some(30),
            }),
            sink.clone(),
        );
        tokio::time::sleep(Duration::from_millis(45_000)).await;
        scheduler.stop();

        let sent = sink.sent.lock().await.clone();
        // One increment tick, then curve ticks only (values in whole Wh).
        assert_eq!(sent[0], 1);
        assert!(sent.len() >= 2);
        // 30s into a 1-minute ramp to 6 kWh = 3000 Wh.
        assert!(sent.contains(&3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_curve_holds_at_boundary_after_domain() {
        let sink = RecordingSink::new(0);
        let scheduler = MeterValueScheduler::new(MeterConfig::default());

        scheduler.start(
            MeterValueStrategy::Curve(CurveConfig {
                points: points(&[(0.0, 1.0), (1.0, 2.0)]),
                interval_seconds: Some(30),
            }),
            sink.clone(),
        );

        // Run well past the 1-minute domain; the value holds at 2 kWh.
        tokio::time::sleep(Duration::from_secs(150)).await;
        scheduler.stop();

        let sent = sink.sent.lock().await.clone();
        assert!(sent.len() >= 3);
        assert_eq!(*sent.last().unwrap(), 2000);
    }
}
