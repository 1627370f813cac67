//! Connection loops
//!
//! The controller advertises and serves the DCLK service; display and remote
//! scan, connect as centrals and follow the clock. Both sides follow the
//! `DiscoveryController` plan and restart discovery whenever it changes.

use core::cell::RefCell;
use core::ptr;

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::advertisement_builder::{
    Flag, LegacyAdvertisementBuilder, LegacyAdvertisementPayload, ServiceList,
};
use nrf_softdevice::ble::{central, gatt_client, gatt_server, peripheral, Address, Connection};
use nrf_softdevice::{raw, RawError, Softdevice};

use super::gatt::{
    describe, ClockServiceClient, ClockServiceClientEvent, ClockServiceEvent, LinkClient, Server, ServerAttributes,
    ServerEvent, ServerNotifier,
};
use super::security::{security_level, Bonder};
use super::{gap_conn_params, peer_address, stack_address};
use crate::ble::advertising::{DiscoveryController, DiscoveryMode, RadioError};
use crate::ble::bonding::PeerAddress;
use crate::ble::connection::{submit, RegistryCommand, RegistryQueue};
use crate::ble::gatt::{advertises_service, ClockCharacteristic, DCLK_SERVICE_UUID};
use crate::ble::notifications::{run_reporter, store_snapshot, ClockPublisher, Subscriptions};
use crate::ble::registry::SecurityLevel;
use crate::ble::subscriber::{ClockSubscriber, MirrorObserver};
use crate::clock::{ClockEngine, TimeSource};
use crate::config::{ConnectionParams, CONTROLLER_NAME, MAX_PEERS};
use crate::roles::{CommandSender, Controller};

/// Pause before retrying a failed advertise/connect
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Attempts at enabling notifications per connection
const SUBSCRIBE_ATTEMPTS: u8 = 3;

/// Disconnect reason reported when the stack does not give one
const REASON_UNKNOWN: u8 = 0;

static ADV_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
    .services_128(ServiceList::Complete, &[DCLK_SERVICE_UUID.to_le_bytes()])
    .build();

static SCAN_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new().full_name(CONTROLLER_NAME).build();

/// Load the controller's filter table. An empty list clears it.
fn apply_accept_list(peers: &[PeerAddress]) -> Result<(), RadioError> {
    let addrs: Vec<raw::ble_gap_addr_t, MAX_PEERS> = peers.iter().map(|p| stack_address(p).into_raw()).collect();
    let ptrs: Vec<*const raw::ble_gap_addr_t, MAX_PEERS> = addrs.iter().map(|a| a as *const _).collect();
    let list = if ptrs.is_empty() { ptr::null() } else { ptrs.as_ptr() };
    let ret = unsafe { raw::sd_ble_gap_whitelist_set(list, ptrs.len() as u8) };
    RawError::convert(ret).map_err(|e| RadioError::Stack(e as u32))
}

/// Controller: advertise until a central connects, then ask the central for
/// the node's connection parameters
pub async fn advertise(
    sd: &Softdevice,
    discovery: &DiscoveryController,
    bonder: &'static Bonder,
    params: &ConnectionParams,
) -> Connection {
    let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
        adv_data: &ADV_DATA,
        scan_data: &SCAN_DATA,
    };

    loop {
        let plan = discovery.wait_requested().await;
        let mut config = peripheral::Config::default();
        if plan.mode == Some(DiscoveryMode::AcceptList) {
            if let Err(e) = apply_accept_list(&plan.accept_list) {
                error!("DISCOVERY: accept list rejected: {:?}", e);
                Timer::after(RETRY_DELAY).await;
                continue;
            }
            config.filter_policy = peripheral::FilterPolicy::Both;
        }
        info!("DISCOVERY: advertising ({:?})", plan.mode);

        match select(peripheral::advertise_pairable(sd, adv, &config, bonder), discovery.changed()).await {
            Either::First(Ok(conn)) => {
                if let Err(e) = conn.set_conn_params(gap_conn_params(params)) {
                    warn!("CONNECTION: parameter update refused: {:?}", e);
                }
                return conn;
            }
            Either::First(Err(e)) => {
                warn!("DISCOVERY: advertising failed: {:?}", e);
                Timer::after(RETRY_DELAY).await;
            }
            Either::Second(_) => debug!("DISCOVERY: plan changed, restarting"),
        }
    }
}

async fn scan_for_controller(sd: &Softdevice) -> Result<Address, central::ScanError> {
    let config = central::ScanConfig::default();
    central::scan(sd, &config, |report| {
        let data = unsafe { core::slice::from_raw_parts(report.data.p_data, report.data.len as usize) };
        advertises_service(data, DCLK_SERVICE_UUID).then(|| Address::from_raw(report.peer_addr))
    })
    .await
}

async fn connect_to(
    sd: &Softdevice,
    targets: &[Address],
    bonder: &'static Bonder,
    params: &ConnectionParams,
) -> Result<Connection, central::ConnectError> {
    let refs: Vec<&Address, MAX_PEERS> = targets.iter().collect();
    let mut config = central::ConnectConfig::default();
    config.scan_config.whitelist = Some(refs.as_slice());
    config.conn_params = gap_conn_params(params);
    central::connect_with_security(sd, &config, bonder).await
}

/// Display and remote: scan and connect to a controller
pub async fn connect(
    sd: &Softdevice,
    discovery: &DiscoveryController,
    bonder: &'static Bonder,
    params: &ConnectionParams,
) -> Connection {
    loop {
        let plan = discovery.wait_requested().await;
        info!("DISCOVERY: scanning ({:?})", plan.mode);

        let attempt = async {
            let targets: Vec<Address, MAX_PEERS> = match plan.mode {
                Some(DiscoveryMode::AcceptList) => plan.accept_list.iter().map(stack_address).collect(),
                _ => {
                    let found = scan_for_controller(sd).await.map_err(|e| {
                        warn!("DISCOVERY: scan failed: {:?}", e);
                    })?;
                    let mut targets = Vec::new();
                    let _ = targets.push(found);
                    targets
                }
            };
            connect_to(sd, &targets, bonder, params).await.map_err(|e| {
                warn!("DISCOVERY: connect failed: {:?}", e);
            })
        };

        match select(attempt, discovery.changed()).await {
            Either::First(Ok(conn)) => {
                if let Err(e) = conn.request_security() {
                    warn!("BONDING: security request failed: {:?}", e);
                }
                return conn;
            }
            Either::First(Err(())) => Timer::after(RETRY_DELAY).await,
            Either::Second(_) => debug!("DISCOVERY: plan changed, restarting"),
        }
    }
}

/// Report the link to the registry; returns the peer
pub fn link_up(conn: &Connection, registry: &RegistryQueue) -> PeerAddress {
    let peer = peer_address(&conn.peer_address());
    info!("CONNECTION: link up with {:?}", peer);
    let _ = submit(registry, RegistryCommand::Connected(peer));
    peer
}

pub fn link_down(peer: PeerAddress, registry: &RegistryQueue) {
    info!("CONNECTION: link down with {:?}", peer);
    let _ = submit(
        registry,
        RegistryCommand::Disconnected {
            peer,
            reason: REASON_UNKNOWN,
        },
    );
}

fn authorized(conn: &Connection) -> bool {
    security_level(conn.security_mode()) >= SecurityLevel::Authenticated
}

/// Controller: serve one connection until it drops
pub async fn serve_clock<T: TimeSource>(
    conn: &Connection,
    server: &Server,
    engine: &ClockEngine<T>,
    controller: &Controller<'_, T>,
    subscriptions: &Subscriptions,
    interval: Duration,
) {
    let notifier = ServerNotifier { server, conn };
    let mut attributes = ServerAttributes { server };
    store_snapshot(&mut attributes, engine.snapshot());

    let publisher = ClockPublisher::new(subscriptions);
    let events = gatt_server::run(conn, server, |event| match event {
        ServerEvent::Clock(ClockServiceEvent::ValueCccdWrite { notifications }) => {
            subscriptions.on_cccd_write(ClockCharacteristic::Value, notifications, authorized(conn));
        }
        ServerEvent::Clock(ClockServiceEvent::StateCccdWrite { notifications }) => {
            subscriptions.on_cccd_write(ClockCharacteristic::State, notifications, authorized(conn));
        }
        ServerEvent::Clock(ClockServiceEvent::CommandWrite(byte)) => {
            let _ = controller.on_command_write(&[byte], authorized(conn));
        }
    });

    let e = select(events, run_reporter(engine, &publisher, notifier, attributes, interval)).await;
    if let Either::First(e) = e {
        debug!("CONNECTION: gatt server exited: {:?}", e);
    }
    subscriptions.clear();
}

/// Display and remote: discover, subscribe, and feed notifications to the
/// mirror until the link drops. Queued commands are written as they arrive.
pub async fn follow_clock<O: MirrorObserver>(
    conn: &Connection,
    mut observer: O,
    commands: Option<&CommandSender>,
) -> ClockSubscriber {
    let subscriber = RefCell::new(ClockSubscriber::new());
    subscriber.borrow_mut().on_connected();

    let client: ClockServiceClient = match gatt_client::discover(conn).await {
        Ok(client) => client,
        Err(e) => {
            error!("SUBSCRIBE: service discovery failed: {:?}", e);
            let _ = conn.disconnect();
            subscriber.borrow_mut().on_disconnected(&mut observer);
            return subscriber.into_inner();
        }
    };
    let characteristics = client.characteristics();
    if subscriber.borrow_mut().on_discovered(&describe(&characteristics)).is_err() {
        let _ = conn.disconnect();
        subscriber.borrow_mut().on_disconnected(&mut observer);
        return subscriber.into_inner();
    }

    // No other borrow exists until the notification loop starts
    let subscribed = subscriber
        .borrow_mut()
        .subscribe_with_retry(&mut LinkClient { conn }, SUBSCRIBE_ATTEMPTS, RETRY_DELAY)
        .await;
    if let Err(e) = subscribed {
        // Without notifications the mirror never updates; reconnecting reruns
        // discovery and subscribe
        error!("SUBSCRIBE: giving up ({:?}), dropping link", e);
        let _ = conn.disconnect();
        subscriber.borrow_mut().on_disconnected(&mut observer);
        return subscriber.into_inner();
    }

    let value_handle = client.value_handle();
    let state_handle = client.state_handle();
    let notifications = gatt_client::run(conn, &client, |event| {
        let (handle, bytes): (u16, &[u8]) = match &event {
            ClockServiceClientEvent::ValueNotification(value) => (value_handle, value.as_slice()),
            ClockServiceClientEvent::StateNotification(state) => (state_handle, core::slice::from_ref(state)),
        };
        subscriber.borrow_mut().on_notification(handle, Some(bytes), &mut observer);
    });

    let sender = async {
        let Some(commands) = commands else {
            return core::future::pending::<()>().await;
        };
        loop {
            let command = commands.next().await;
            let current = subscriber.borrow().clone();
            if let Err(e) = current.send_command(&mut LinkClient { conn }, command).await {
                warn!("REMOTE: {:?} not sent: {:?}", command, e);
            }
            commands.flush(&current, &mut LinkClient { conn }).await;
        }
    };

    if let Either::First(e) = select(notifications, sender).await {
        debug!("CONNECTION: gatt client exited: {:?}", e);
    }

    let mut subscriber = subscriber.into_inner();
    subscriber.on_disconnected(&mut observer);
    subscriber
}
