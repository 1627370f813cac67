#![cfg_attr(not(test), no_std)]

//! DCLK Shot Clock Firmware Library
//!
//! A controller node owns a countdown and replicates it over BLE to display and
//! remote nodes. The library is organized into layers:
//!
//! - `clock`: countdown state machine and the subscriber-side mirror
//! - `ble`: GATT layout, notification bridge, connection registry
//! - `input`: debounced button events
//! - `roles`: controller, display and remote button/mirror bindings
//! - `output`: status line and buzzer
//! - `platform`: nrf-softdevice and embassy-nrf glue (`firmware` feature)

#[macro_use]
mod fmt;

pub mod ble;
pub mod clock;
pub mod config;
pub mod input;
pub mod output;
pub mod roles;

#[cfg(feature = "firmware")]
pub mod platform;
