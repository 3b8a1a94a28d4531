//! Communication statistics
//!
//! Raw counters are incremented by the master while it holds the
//! transaction lock. Rates and averages are derived when a [`CommStats`]
//! snapshot is taken, never stored.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct Counters {
    tx_frames: u64,
    rx_frames: u64,
    crc_errors: u64,
    timeouts: u64,
    exceptions: u64,
    latency_total: Duration,
    latency_samples: u64,
    window_start: Instant,
    window_started_at: DateTime<Local>,
}

impl Counters {
    fn new() -> Self {
        Self {
            tx_frames: 0,
            rx_frames: 0,
            crc_errors: 0,
            timeouts: 0,
            exceptions: 0,
            latency_total: Duration::ZERO,
            latency_samples: 0,
            window_start: Instant::now(),
            window_started_at: Local::now(),
        }
    }
}

/// Counter store owned by the master.
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    counters: Mutex<Counters>,
}

impl StatsRecorder {
    pub(crate) fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::new()),
        }
    }

    pub(crate) fn record_tx(&self) {
        self.counters.lock().tx_frames += 1;
    }

    /// A valid frame arrived; `latency` is set for completed transactions.
    pub(crate) fn record_rx(&self, latency: Option<Duration>) {
        let mut c = self.counters.lock();
        c.rx_frames += 1;
        if let Some(latency) = latency {
            c.latency_total += latency;
            c.latency_samples += 1;
        }
    }

    pub(crate) fn record_crc_error(&self) {
        self.counters.lock().crc_errors += 1;
    }

    pub(crate) fn record_timeout(&self) {
        self.counters.lock().timeouts += 1;
    }

    pub(crate) fn record_exception(&self) {
        self.counters.lock().exceptions += 1;
    }

    pub(crate) fn reset(&self) {
        *self.counters.lock() = Counters::new();
    }

    /// Snapshot combined with the link-level counters.
    pub(crate) fn snapshot(&self, discarded_bytes: u64, restarts: u64) -> CommStats {
        let c = self.counters.lock().clone();
        CommStats {
            tx_frames: c.tx_frames,
            rx_frames: c.rx_frames,
            crc_errors: c.crc_errors,
            timeouts: c.timeouts,
            exceptions: c.exceptions,
            discarded_bytes,
            restarts,
            latency_total: c.latency_total,
            latency_samples: c.latency_samples,
            window: c.window_start.elapsed(),
            window_started_at: c.window_started_at,
        }
    }
}

/// Point-in-time view of the communication counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CommStats {
    /// Request frames written to the link.
    pub tx_frames: u64,
    /// Frames received with a valid CRC, exception responses included.
    pub rx_frames: u64,
    pub crc_errors: u64,
    pub timeouts: u64,
    pub exceptions: u64,
    /// Bytes dropped while resynchronizing on the frame boundary.
    pub discarded_bytes: u64,
    /// Times the link was reopened.
    pub restarts: u64,
    latency_total: Duration,
    latency_samples: u64,
    /// Time since the counters were last reset.
    pub window: Duration,
    pub window_started_at: DateTime<Local>,
}

impl CommStats {
    /// Frames in both directions per second of the measurement window.
    pub fn frames_per_second(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.tx_frames + self.rx_frames) as f64 / secs
    }

    /// CRC failures as a percentage of transmitted frames.
    pub fn crc_error_percent(&self) -> f64 {
        percent(self.crc_errors, self.tx_frames)
    }

    /// Timeouts as a percentage of transmitted frames.
    pub fn timeout_percent(&self) -> f64 {
        percent(self.timeouts, self.tx_frames)
    }

    /// CRC failures and timeouts together, as a percentage of transmitted
    /// frames.
    pub fn error_rate_percent(&self) -> f64 {
        percent(self.crc_errors + self.timeouts, self.tx_frames)
    }

    /// Mean round-trip time of successful transactions.
    pub fn average_latency(&self) -> Option<Duration> {
        if self.latency_samples == 0 {
            return None;
        }
        let mean = self.latency_total.as_nanos() / u128::from(self.latency_samples);
        Some(Duration::from_nanos(mean as u64))
    }

    /// Ordered label/value pairs for status displays.
    pub fn report(&self) -> Vec<(&'static str, String)> {
        let mut lines = vec![
            (
                "Packet Count",
                format!("M: {}, S: {}", self.tx_frames, self.rx_frames),
            ),
            ("CRC Errors", self.crc_errors.to_string()),
            (
                "CRC Percent Errors",
                format!("{:.2}%", self.crc_error_percent()),
            ),
            ("Packet Timeouts", self.timeouts.to_string()),
            (
                "Packet Timeouts Percent Errors",
                format!("{:.2}%", self.timeout_percent()),
            ),
            ("Modbus Exceptions", self.exceptions.to_string()),
            ("Discarded Bytes", self.discarded_bytes.to_string()),
            ("Comm Restarts", self.restarts.to_string()),
            (
                "Packets Per Second",
                format!("{:.2}", self.frames_per_second()),
            ),
        ];
        if let Some(latency) = self.average_latency() {
            lines.push((
                "Average Transaction Time",
                format!("{:.4} sec", latency.as_secs_f64()),
            ));
        }
        lines
    }
}

impl fmt::Display for CommStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Communication stats since {}",
            self.window_started_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        for (label, value) in self.report() {
            writeln!(f, "  {}: {}", label, value)?;
        }
        Ok(())
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}
