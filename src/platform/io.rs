//! Buttons, link LED and buzzer on embassy-nrf GPIO

use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{Input, Level, Output};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;

use crate::clock::{SystemTime, TimeSource};
use crate::input::{ButtonConfig, Edge, InputQueue, RecordOutcome};
use crate::output::OutputSink;

/// Watch one active-low button and feed its edges to the input queue
pub async fn watch_button(mut pin: Input<'static>, button: ButtonConfig, queue: &'static InputQueue) -> ! {
    loop {
        pin.wait_for_any_edge().await;
        let edge = Edge::from_active_low(pin.is_high());
        if queue.record_edge(&button, edge, SystemTime.now_ms()) == RecordOutcome::Dropped {
            warn!("INPUT: queue full, {:?} lost", button.id);
        }
    }
}

/// Pending buzzer pulse length (ms)
pub type BuzzerSignal = Signal<CriticalSectionRawMutex, u32>;

/// Buzzer task body; a new pulse request restarts the pulse
pub async fn run_buzzer(mut pin: Output<'static>, requests: &'static BuzzerSignal) -> ! {
    loop {
        let mut duration_ms = requests.wait().await;
        loop {
            pin.set_high();
            let pulse = Timer::after_millis(duration_ms as u64);
            match select(pulse, requests.wait()).await {
                Either::First(()) => break,
                Either::Second(next) => duration_ms = next,
            }
        }
        pin.set_low();
    }
}

/// Status line over RTT, link state on an LED, buzzer through the buzzer task
pub struct PanelOutput {
    link_led: Output<'static>,
    buzzer: &'static BuzzerSignal,
}

impl PanelOutput {
    pub fn new(link_led: Output<'static>, buzzer: &'static BuzzerSignal) -> Self {
        Self { link_led, buzzer }
    }
}

impl OutputSink for PanelOutput {
    fn show_line(&mut self, line: &str) {
        info!("OUTPUT: {}", line);
    }

    fn pulse_buzzer(&mut self, duration_ms: u32) {
        self.buzzer.signal(duration_ms);
    }

    fn set_link_indicator(&mut self, connected: bool) {
        // LED is active low
        self.link_led.set_level(if connected { Level::Low } else { Level::High });
    }
}
