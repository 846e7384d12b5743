use std::time::Duration;

use adcstream_core::Clock;
use embassy_time::Instant;
use embedded_hal_async::delay::DelayNs;

/// Host timebase: the embassy std clock, with pauses that block the thread
#[derive(Debug, Default, Clone, Copy)]
pub struct StdTimebase;

impl Clock for StdTimebase {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl DelayNs for StdTimebase {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}
