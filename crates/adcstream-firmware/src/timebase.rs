use adcstream_core::Clock;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal_async::delay::DelayNs;

/// Drain-loop timebase backed by the embassy time driver
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbassyTimebase;

impl Clock for EmbassyTimebase {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl DelayNs for EmbassyTimebase {
    async fn delay_ns(&mut self, ns: u32) {
        Timer::after(Duration::from_nanos(u64::from(ns))).await
    }

    async fn delay_us(&mut self, us: u32) {
        Timer::after_micros(u64::from(us)).await
    }

    async fn delay_ms(&mut self, ms: u32) {
        Timer::after_millis(u64::from(ms)).await
    }
}
