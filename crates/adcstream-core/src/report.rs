//! Periodic reports produced by the drain loop
//!
//! Reports are handed to a [`ReportSink`]. [`LogSink`] writes them to the
//! `log` facade in the same shape the device console has always shown:
//!
//! ```text
//! Samples 20480 (40960 bytes, 0 invalid) in 1000 ms
//! ID=ct_1,min=1843,max=2260,range=417
//! ```

use embassy_time::Duration;
use log::info;

use crate::accumulator::ChannelStats;
use crate::channel::ChannelId;

/// Samples received during one reporting window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputReport {
    pub samples: u32,
    pub bytes: u32,
    pub invalid: u32,
    pub elapsed: Duration,
}

impl ThroughputReport {
    /// Samples per second over the window
    pub fn samples_per_sec(&self) -> u32 {
        let elapsed_us = self.elapsed.as_micros();
        if elapsed_us == 0 {
            return 0;
        }
        (u64::from(self.samples) * 1_000_000 / elapsed_us).min(u64::from(u32::MAX)) as u32
    }
}

/// Statistics of one monitored channel for the cycle that just ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelReport<'a> {
    pub label: &'a str,
    pub id: ChannelId,
    /// `None` when nothing was recorded this cycle
    pub stats: Option<ChannelStats>,
    pub recorded: usize,
    pub overflowed: u32,
}

/// Receiver of drain-loop reports
pub trait ReportSink {
    fn throughput(&mut self, report: &ThroughputReport);

    fn channel(&mut self, report: &ChannelReport<'_>);
}

impl<R: ReportSink + ?Sized> ReportSink for &mut R {
    fn throughput(&mut self, report: &ThroughputReport) {
        (**self).throughput(report)
    }

    fn channel(&mut self, report: &ChannelReport<'_>) {
        (**self).channel(report)
    }
}

/// Writes reports as `info` log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn throughput(&mut self, report: &ThroughputReport) {
        info!(
            "Samples {} ({} bytes, {} invalid) in {} ms, {} samples/s",
            report.samples,
            report.bytes,
            report.invalid,
            report.elapsed.as_millis(),
            report.samples_per_sec()
        );
    }

    fn channel(&mut self, report: &ChannelReport<'_>) {
        match report.stats {
            Some(stats) if report.overflowed > 0 => info!(
                "ID={},min={},max={},range={} ({} dropped over capacity)",
                report.label, stats.min, stats.max, stats.range, report.overflowed
            ),
            Some(stats) => info!(
                "ID={},min={},max={},range={}",
                report.label, stats.min, stats.max, stats.range
            ),
            None => info!("ID={},no samples ({})", report.label, report.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_per_sec() {
        let report = ThroughputReport {
            samples: 5120,
            bytes: 20480,
            invalid: 0,
            elapsed: Duration::from_millis(250),
        };
        assert_eq!(report.samples_per_sec(), 20480);
    }

    #[test]
    fn test_samples_per_sec_zero_window() {
        let report = ThroughputReport {
            samples: 10,
            bytes: 20,
            invalid: 0,
            elapsed: Duration::from_ticks(0),
        };
        assert_eq!(report.samples_per_sec(), 0);
    }
}
