//! DCLK GATT Service Layout
//!
//! One primary service with three characteristics:
//!
//! | Characteristic | UUID          | Properties  | Payload                  |
//! |----------------|---------------|-------------|--------------------------|
//! | Clock State    | `00001554-…`  | read notify | 1 byte phase             |
//! | Clock Command  | `00001555-…`  | write       | 1 byte command (postcard)|
//! | Clock Value    | `00001556-…`  | read notify | 4 byte LE milliseconds   |
//!
//! Reads and CCCD writes require an encrypted, authenticated link.

use heapless::Vec;

use crate::clock::{ClockCommand, ClockSnapshot, Phase};

/// 128-bit UUID, stored as its big-endian numeric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid(pub u128);

impl Uuid {
    /// Over-the-air byte order (little-endian)
    pub const fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub const fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }
}

pub const DCLK_SERVICE_UUID: Uuid = Uuid(0x00001553_1212_efde_1523_785feabcd123);
pub const CLOCK_STATE_UUID: Uuid = Uuid(0x00001554_1212_efde_1523_785feabcd123);
pub const CLOCK_COMMAND_UUID: Uuid = Uuid(0x00001555_1212_efde_1523_785feabcd123);
pub const CLOCK_VALUE_UUID: Uuid = Uuid(0x00001556_1212_efde_1523_785feabcd123);

/// Client Characteristic Configuration value enabling notifications
pub const CCCD_NOTIFY: u16 = 0x0001;

pub const VALUE_LEN: usize = 4;
pub const STATE_LEN: usize = 1;
pub const COMMAND_LEN: usize = 1;

/// Largest payload carried by any DCLK characteristic
pub const MAX_PAYLOAD_LEN: usize = VALUE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockCharacteristic {
    /// Milliseconds remaining
    Value,
    /// Phase byte
    State,
    /// Back-channel for remote commands
    Command,
}

impl ClockCharacteristic {
    pub const fn uuid(self) -> Uuid {
        match self {
            ClockCharacteristic::Value => CLOCK_VALUE_UUID,
            ClockCharacteristic::State => CLOCK_STATE_UUID,
            ClockCharacteristic::Command => CLOCK_COMMAND_UUID,
        }
    }

    pub const fn notifies(self) -> bool {
        matches!(self, ClockCharacteristic::Value | ClockCharacteristic::State)
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        [
            ClockCharacteristic::Value,
            ClockCharacteristic::State,
            ClockCharacteristic::Command,
        ]
        .into_iter()
        .find(|c| c.uuid() == uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    BadLength { expected: u8, actual: u8 },
    UnknownPhase(u8),
    UnknownCommand(u8),
    Encode,
}

fn check_len(payload: &[u8], expected: usize) -> Result<(), CodecError> {
    if payload.len() != expected {
        return Err(CodecError::BadLength {
            expected: expected as u8,
            actual: payload.len().min(u8::MAX as usize) as u8,
        });
    }
    Ok(())
}

pub const fn encode_value(remaining_ms: u32) -> [u8; VALUE_LEN] {
    remaining_ms.to_le_bytes()
}

pub fn decode_value(payload: &[u8]) -> Result<u32, CodecError> {
    check_len(payload, VALUE_LEN)?;
    Ok(u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]))
}

pub const fn encode_state(phase: Phase) -> [u8; STATE_LEN] {
    [phase.as_u8()]
}

pub fn decode_state(payload: &[u8]) -> Result<Phase, CodecError> {
    check_len(payload, STATE_LEN)?;
    Phase::from_u8(payload[0]).ok_or(CodecError::UnknownPhase(payload[0]))
}

pub fn encode_command(command: ClockCommand) -> Result<[u8; COMMAND_LEN], CodecError> {
    let mut buf = [0u8; COMMAND_LEN];
    let used = postcard::to_slice(&command, &mut buf)
        .map_err(|_| CodecError::Encode)?
        .len();
    if used != COMMAND_LEN {
        return Err(CodecError::Encode);
    }
    Ok(buf)
}

pub fn decode_command(payload: &[u8]) -> Result<ClockCommand, CodecError> {
    check_len(payload, COMMAND_LEN)?;
    postcard::from_bytes(payload).map_err(|_| CodecError::UnknownCommand(payload[0]))
}

/// Value returned by a GATT read of `characteristic`
pub fn read_payload(characteristic: ClockCharacteristic, snapshot: ClockSnapshot) -> Vec<u8, MAX_PAYLOAD_LEN> {
    let mut out = Vec::new();
    // Payloads never exceed MAX_PAYLOAD_LEN
    let _ = match characteristic {
        ClockCharacteristic::Value => out.extend_from_slice(&encode_value(snapshot.remaining_ms)),
        ClockCharacteristic::State => out.extend_from_slice(&encode_state(snapshot.phase)),
        ClockCharacteristic::Command => Ok(()),
    };
    out
}

/// AD types carrying 128-bit service UUID lists
const AD_INCOMPLETE_UUID128: u8 = 0x06;
const AD_COMPLETE_UUID128: u8 = 0x07;

/// Whether raw advertising data lists `service` among its 128-bit UUIDs.
/// Truncated structures end the walk.
pub fn advertises_service(data: &[u8], service: Uuid) -> bool {
    let wanted = service.to_le_bytes();
    let mut rest = data;
    while let [len, tail @ ..] = rest {
        let len = *len as usize;
        if len == 0 || len > tail.len() {
            return false;
        }
        let (structure, next) = tail.split_at(len);
        if let [AD_INCOMPLETE_UUID128 | AD_COMPLETE_UUID128, uuids @ ..] = structure {
            if uuids.chunks_exact(16).any(|u| u == wanted) {
                return true;
            }
        }
        rest = next;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_wire_order() {
        let bytes = DCLK_SERVICE_UUID.to_le_bytes();
        assert_eq!(bytes[0], 0x23);
        assert_eq!(bytes[15], 0x00);
        assert_eq!(Uuid::from_le_bytes(bytes), DCLK_SERVICE_UUID);
    }

    #[test]
    fn test_value_is_little_endian() {
        assert_eq!(encode_value(9_700), [0xE4, 0x25, 0x00, 0x00]);
        assert_eq!(decode_value(&[0x10, 0x27, 0x00, 0x00]), Ok(10_000));
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        assert_eq!(
            decode_value(&[1, 2, 3]),
            Err(CodecError::BadLength { expected: 4, actual: 3 })
        );
        assert_eq!(decode_state(&[7]), Err(CodecError::UnknownPhase(7)));
        assert_eq!(decode_state(&[]), Err(CodecError::BadLength { expected: 1, actual: 0 }));
        assert_eq!(decode_command(&[42]), Err(CodecError::UnknownCommand(42)));
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(encode_command(ClockCommand::Start), Ok([0]));
        assert_eq!(encode_command(ClockCommand::Stop), Ok([1]));
        assert_eq!(encode_command(ClockCommand::Pause), Ok([2]));
        assert_eq!(encode_command(ClockCommand::Resume), Ok([3]));
        assert_eq!(encode_command(ClockCommand::Toggle), Ok([4]));
        assert_eq!(decode_command(&[3]), Ok(ClockCommand::Resume));
    }

    #[test]
    fn test_characteristic_lookup() {
        assert_eq!(
            ClockCharacteristic::from_uuid(CLOCK_VALUE_UUID),
            Some(ClockCharacteristic::Value)
        );
        assert_eq!(ClockCharacteristic::from_uuid(DCLK_SERVICE_UUID), None);
        assert!(!ClockCharacteristic::Command.notifies());
    }

    #[test]
    fn test_read_payload() {
        let snapshot = ClockSnapshot {
            remaining_ms: 10_000,
            phase: Phase::Paused,
        };
        assert_eq!(
            read_payload(ClockCharacteristic::Value, snapshot).as_slice(),
            &[0x10, 0x27, 0, 0]
        );
        assert_eq!(read_payload(ClockCharacteristic::State, snapshot).as_slice(), &[1]);
        assert!(read_payload(ClockCharacteristic::Command, snapshot).is_empty());
    }

    #[test]
    fn test_finds_service_in_advertising_data() {
        let mut data = vec![0x02, 0x01, 0x06, 0x11, AD_COMPLETE_UUID128];
        data.extend_from_slice(&DCLK_SERVICE_UUID.to_le_bytes());
        data.extend_from_slice(&[0x04, 0x09, b'D', b'C', b'L']);
        assert!(advertises_service(&data, DCLK_SERVICE_UUID));
        assert!(!advertises_service(&data, CLOCK_VALUE_UUID));

        // length byte runs past the end
        data[3] = 0x30;
        assert!(!advertises_service(&data, DCLK_SERVICE_UUID));
        assert!(!advertises_service(&[], DCLK_SERVICE_UUID));
    }
}
