//! Controller role: owns the clock

use crate::ble::connection::{submit, RegistryCommand, RegistryQueue};
use crate::ble::gatt::{decode_command, CodecError};
use crate::clock::{ClockCommand, ClockEngine, TimeSource, Transition};
use crate::input::{ButtonEvent, ButtonHandler, ButtonId, Edge};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Write arrived on a link that is not encrypted and authenticated
    Unauthorized,
    Codec(CodecError),
}

pub struct Controller<'a, T: TimeSource> {
    engine: &'a ClockEngine<T>,
    registry: &'a RegistryQueue,
}

impl<'a, T: TimeSource> Controller<'a, T> {
    pub const fn new(engine: &'a ClockEngine<T>, registry: &'a RegistryQueue) -> Self {
        Self { engine, registry }
    }

    /// Command characteristic write from the remote
    pub fn on_command_write(&self, payload: &[u8], authorized: bool) -> Result<Transition, CommandError> {
        if !authorized {
            warn!("CONTROLLER: command write refused, link not authenticated");
            return Err(CommandError::Unauthorized);
        }
        let command = decode_command(payload).map_err(|e| {
            warn!("CONTROLLER: bad command payload: {:?}", e);
            CommandError::Codec(e)
        })?;
        info!("CONTROLLER: remote {:?}", command);
        Ok(self.engine.apply(command))
    }
}

impl<T: TimeSource> ButtonHandler for Controller<'_, T> {
    fn on_button(&mut self, event: ButtonEvent) {
        if event.edge != Edge::Press {
            return;
        }
        match event.id {
            ButtonId::Start => {
                self.engine.apply(ClockCommand::Start);
            }
            ButtonId::Stop => {
                self.engine.apply(ClockCommand::Stop);
            }
            ButtonId::User => {
                self.engine.apply(ClockCommand::Toggle);
            }
            ButtonId::Pair => {
                let _ = submit(self.registry, RegistryCommand::TogglePairing);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Phase, SystemTime};
    use crate::config::ClockConfig;

    fn press(id: ButtonId) -> ButtonEvent {
        ButtonEvent {
            id,
            edge: Edge::Press,
            at_ms: 0,
        }
    }

    #[test]
    fn test_buttons_drive_engine_and_registry() {
        let engine = ClockEngine::new(SystemTime, ClockConfig::new());
        let queue = RegistryQueue::new();
        let mut controller = Controller::new(&engine, &queue);

        controller.on_button(press(ButtonId::Start));
        assert_eq!(engine.phase(), Phase::Running);
        controller.on_button(press(ButtonId::User));
        assert_eq!(engine.phase(), Phase::Paused);
        controller.on_button(press(ButtonId::Stop));
        assert_eq!(engine.phase(), Phase::Stopped);

        controller.on_button(press(ButtonId::Pair));
        assert_eq!(queue.try_receive().ok(), Some(RegistryCommand::TogglePairing));
    }

    #[test]
    fn test_release_is_ignored() {
        let engine = ClockEngine::new(SystemTime, ClockConfig::new());
        let queue = RegistryQueue::new();
        let mut controller = Controller::new(&engine, &queue);
        controller.on_button(ButtonEvent {
            id: ButtonId::Start,
            edge: Edge::Release,
            at_ms: 0,
        });
        assert_eq!(engine.phase(), Phase::Stopped);
    }

    #[test]
    fn test_command_write_needs_authorization() {
        let engine = ClockEngine::new(SystemTime, ClockConfig::new());
        let queue = RegistryQueue::new();
        let controller = Controller::new(&engine, &queue);

        assert_eq!(controller.on_command_write(&[0], false), Err(CommandError::Unauthorized));
        assert_eq!(engine.phase(), Phase::Stopped);
        assert_eq!(controller.on_command_write(&[0], true).map(|t| t.to), Ok(Phase::Running));
        assert!(matches!(
            controller.on_command_write(&[9], true),
            Err(CommandError::Codec(_))
        ));
    }
}
