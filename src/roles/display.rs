//! Display role: mirrors the clock, pair button only

use crate::ble::connection::{submit, RegistryCommand, RegistryQueue};
use crate::ble::subscriber::MirrorObserver;
use crate::clock::ClockMirror;
use crate::input::{ButtonEvent, ButtonHandler, ButtonId, Edge};
use crate::output::{ClockView, OutputSink};

pub struct Display<'a, O: OutputSink> {
    view: ClockView<O>,
    registry: &'a RegistryQueue,
}

impl<'a, O: OutputSink> Display<'a, O> {
    pub fn new(output: O, default_max_ms: u32, registry: &'a RegistryQueue) -> Self {
        Self {
            view: ClockView::new(output, default_max_ms, true),
            registry,
        }
    }

    pub fn view(&self) -> &ClockView<O> {
        &self.view
    }

    pub fn on_link_up(&mut self) {
        self.view.set_connected(true);
    }

    pub fn on_link_down(&mut self, mirror: &ClockMirror) {
        self.view.set_connected(false);
        self.view.render(mirror);
    }
}

impl<O: OutputSink> ButtonHandler for Display<'_, O> {
    fn on_button(&mut self, event: ButtonEvent) {
        if event.id == ButtonId::Pair && event.edge == Edge::Press {
            let _ = submit(self.registry, RegistryCommand::TogglePairing);
        }
    }
}

impl<O: OutputSink> MirrorObserver for Display<'_, O> {
    fn on_mirror_update(&mut self, mirror: &ClockMirror) {
        self.view.render(mirror);
    }

    fn on_mirror_stale(&mut self, mirror: &ClockMirror) {
        warn!("DISPLAY: clock feed lost");
        self.view.render(mirror);
    }
}
