//! Button Input
//!
//! Raw GPIO edges in, named button events out.

pub mod button;
pub mod dispatcher;

pub use button::{ButtonConfig, ButtonEvent, ButtonId, Edge, EdgePolicy};
pub use dispatcher::{ButtonHandler, InputDispatcher, InputQueue, RecordOutcome};
