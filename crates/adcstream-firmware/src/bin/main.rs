#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use adcstream_core::config::Attenuation;
use adcstream_core::{
    ChannelId, ChannelSet, ChipVariant, DrainLoop, LogSink, MonitorConfig, select_decoder,
};
use adcstream_firmware::sampler::MAX_FRAME_BYTES;
use adcstream_firmware::{
    EmbassyTimebase, FramePlan, FrontEnd, SAMPLE_STREAM, StreamSource, sampler_task,
};
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info};
use static_cell::StaticCell;

/// Raised to stop sampling; nothing on this board raises it yet
static SHUTDOWN: Signal<CriticalSectionRawMutex, ()> = Signal::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "the channel accumulators live in the main task"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(log::LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    let monitor = MonitorConfig::reference(ChipVariant::Esp32S3)
        .with_channels(
            &[
                (ChannelId::adc1(0), "ct_1"),
                (ChannelId::adc1(3), "ct_2"),
                (ChannelId::adc1(6), "ct_3"),
            ],
            Attenuation::Db6,
        )
        .expect("Invalid channel table");

    let plan = FramePlan::new(&monitor).expect("Sampling configuration rejected");
    let layout =
        select_decoder(monitor.chip, &monitor.sampling).expect("No record layout for this chip");
    let channels: ChannelSet = ChannelSet::from_bindings(
        &monitor.channels,
        monitor.drain.overflow_policy,
        monitor.drain.unmatched_policy,
    )
    .expect("Invalid channel bindings");

    let front_end = FrontEnd::new(
        peripherals.ADC1,
        peripherals.GPIO1,
        peripherals.GPIO4,
        peripherals.GPIO7,
        Attenuation::Db6,
    );
    spawner.spawn(sampler_task(front_end, plan).expect("Failed to spawn sampler task"));

    static BATCH: StaticCell<[u8; MAX_FRAME_BYTES]> = StaticCell::new();
    let batch = BATCH.init([0; MAX_FRAME_BYTES]);

    let drain = DrainLoop::new(
        StreamSource::new(&SAMPLE_STREAM),
        layout,
        channels,
        monitor.drain,
        EmbassyTimebase,
        LogSink,
        &mut batch[..monitor.batch_bytes()],
    )
    .expect("Read buffer too small");

    info!(
        "Monitoring {} channels at {} Hz",
        monitor.channels.len(),
        monitor.sampling.sample_freq_hz
    );

    match drain.run(&SHUTDOWN).await {
        Ok(summary) => info!(
            "Sampling finished: {} samples, {} reports",
            summary.samples, summary.reports
        ),
        Err(e) => error!("Sampling failed: {}", e),
    }

    panic!("Drain loop exited");
}
