//! BLE Layer
//!
//! Stack-independent half of the clock replication: GATT layout and codecs,
//! the notification publisher (controller), the subscriber (display/remote),
//! and the connection registry with its radio seam. The nrf-softdevice glue
//! lives in `platform`.

pub mod advertising;
pub mod bonding;
pub mod connection;
pub mod gatt;
pub mod notifications;
pub mod registry;
pub mod subscriber;

pub use advertising::{DiscoveryController, DiscoveryMode, RadioControl, RadioError};
pub use bonding::{AddressKind, BondStore, PeerAddress};
pub use connection::{RegistryCommand, RegistryQueue, SharedRegistry};
pub use gatt::ClockCharacteristic;
pub use notifications::{ClockPublisher, NotifyTransport, PublishOutcome, PublishReport, Subscriptions, TransportError};
pub use registry::{ConnectionRegistry, PeerRecord, RegistryAction, SecurityLevel};
pub use subscriber::{ClockSubscriber, GattClient, MirrorObserver};
