//! Remote role: mirrors the clock and sends commands back to the controller
//!
//! Buttons queue `ClockCommand`s in a `CommandSender`; the link task writes
//! them to the controller's command characteristic. A short press of the pair
//! button toggles pairing mode, a long press clears all bonds.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::ble::connection::{submit, RegistryCommand, RegistryQueue};
use crate::ble::subscriber::{ClockSubscriber, GattClient, MirrorObserver};
use crate::clock::time::elapsed_ms;
use crate::clock::{ClockCommand, ClockMirror};
use crate::config::LONG_PRESS_MS;
use crate::input::{ButtonEvent, ButtonHandler, ButtonId, Edge};
use crate::output::{ClockView, OutputSink};

pub const COMMAND_QUEUE_DEPTH: usize = 4;

/// Outgoing back-channel commands
pub struct CommandSender {
    channel: Channel<CriticalSectionRawMutex, ClockCommand, COMMAND_QUEUE_DEPTH>,
    dropped: AtomicU32,
}

impl CommandSender {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Queue a command; dropped (and counted) when the queue is full
    pub fn send(&self, command: ClockCommand) -> bool {
        if self.channel.try_send(command).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("REMOTE: command queue full, dropped {:?}", command);
            return false;
        }
        true
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn try_next(&self) -> Option<ClockCommand> {
        self.channel.try_receive().ok()
    }

    pub async fn next(&self) -> ClockCommand {
        self.channel.receive().await
    }

    /// Write every queued command over the link. Commands that fail are
    /// logged and discarded; a stale start/stop is worse than a lost one.
    pub async fn flush<C: GattClient>(&self, subscriber: &ClockSubscriber, client: &mut C) -> usize {
        let mut sent = 0;
        while let Some(command) = self.try_next() {
            match subscriber.send_command(client, command).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("REMOTE: {:?} not sent: {:?}", command, e),
            }
        }
        sent
    }
}

impl Default for CommandSender {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Remote<'a, O: OutputSink> {
    view: ClockView<O>,
    commands: &'a CommandSender,
    registry: &'a RegistryQueue,
    pair_pressed_at: Option<u32>,
}

impl<'a, O: OutputSink> Remote<'a, O> {
    pub fn new(output: O, default_max_ms: u32, commands: &'a CommandSender, registry: &'a RegistryQueue) -> Self {
        Self {
            view: ClockView::new(output, default_max_ms, false),
            commands,
            registry,
            pair_pressed_at: None,
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

    fn on_pair(&mut self, edge: Edge, at_ms: u32) {
        match edge {
            Edge::Press => self.pair_pressed_at = Some(at_ms),
            Edge::Release => {
                let Some(pressed_at) = self.pair_pressed_at.take() else {
                    return;
                };
                let command = if elapsed_ms(at_ms, pressed_at) >= LONG_PRESS_MS {
                    RegistryCommand::ClearBonds
                } else {
                    RegistryCommand::TogglePairing
                };
                let _ = submit(self.registry, command);
            }
        }
    }
}

impl<O: OutputSink> ButtonHandler for Remote<'_, O> {
    fn on_button(&mut self, event: ButtonEvent) {
        let command = match (event.id, event.edge) {
            (ButtonId::Pair, edge) => return self.on_pair(edge, event.at_ms),
            (_, Edge::Release) => return,
            (ButtonId::Start, Edge::Press) => ClockCommand::Start,
            (ButtonId::Stop, Edge::Press) => ClockCommand::Stop,
            (ButtonId::User, Edge::Press) => ClockCommand::Toggle,
        };
        self.commands.send(command);
    }
}

impl<O: OutputSink> MirrorObserver for Remote<'_, O> {
    fn on_mirror_update(&mut self, mirror: &ClockMirror) {
        self.view.render(mirror);
    }

    fn on_mirror_stale(&mut self, mirror: &ClockMirror) {
        self.view.render(mirror);
    }
}
