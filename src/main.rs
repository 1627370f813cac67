//! Controller node: owns the shot clock and serves it over BLE

#![no_std]
#![no_main]

use core::cell::RefCell;

use defmt::{info, unwrap};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Input, Pull};
use embassy_nrf::{config::Config, interrupt};
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Duration;
use nrf_softdevice::{Flash, Softdevice};
use panic_probe as _;

use dclk_firmware::ble::advertising::DiscoveryController;
use dclk_firmware::ble::connection::{init_registry, run_registry, RegistryQueue, SharedRegistry};
use dclk_firmware::ble::notifications::Subscriptions;
use dclk_firmware::ble::registry::ConnectionRegistry;
use dclk_firmware::clock::{run_expiry_timer, ClockEngine, SystemTime};
use dclk_firmware::config::{ClockConfig, ConnectionParams, NodeConfig, PairingConfig};
use dclk_firmware::input::{ButtonConfig, ButtonId, InputDispatcher, InputQueue};
use dclk_firmware::platform::gatt::Server;
use dclk_firmware::platform::io::watch_button;
use dclk_firmware::platform::link::{advertise, link_down, link_up, serve_clock};
use dclk_firmware::platform::radio::{LinkSlot, SoftdeviceRadio};
use dclk_firmware::platform::security::Bonder;
use dclk_firmware::platform::softdevice_config;
use dclk_firmware::platform::storage::{load_bonds, run_bond_storage, PersistSignal};
use dclk_firmware::roles::Controller;

static ENGINE: ClockEngine<SystemTime> = ClockEngine::new(SystemTime, ClockConfig::new());
static SUBSCRIPTIONS: Subscriptions = Subscriptions::new();
static INPUT: InputQueue = InputQueue::new();
static REGISTRY_QUEUE: RegistryQueue = RegistryQueue::new();
static REGISTRY: SharedRegistry = Mutex::new(RefCell::new(ConnectionRegistry::new(PairingConfig::new())));
static DISCOVERY: DiscoveryController = DiscoveryController::new();
static LINK: LinkSlot = LinkSlot::new();
static PERSIST: PersistSignal = PersistSignal::new();
static BONDER: Bonder = Bonder::new(&REGISTRY_QUEUE);

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting DCLK controller");
    let node = NodeConfig::controller();

    // Keep clear of the SoftDevice's reserved priorities (0, 1, 4)
    let mut nrf_config = Config::default();
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let p = embassy_nrf::init(nrf_config);

    let sd = Softdevice::enable(&softdevice_config(&node));
    let server = unwrap!(Server::new(sd));
    info!("SoftDevice enabled, GATT server registered");

    ENGINE.boot();

    // Flash operations go through the SoftDevice, so it must be running
    unwrap!(spawner.spawn(softdevice_task(sd)));
    let mut flash = Flash::take(sd);
    let bonds = load_bonds(&mut flash, &BONDER).await;
    init_registry(&REGISTRY, node.pairing, &bonds);

    unwrap!(spawner.spawn(storage_task(flash)));
    unwrap!(spawner.spawn(registry_task()));
    unwrap!(spawner.spawn(expiry_task()));
    unwrap!(spawner.spawn(input_task()));

    let pins = [
        (ButtonId::Pair, Input::new(p.P0_11, Pull::Up)),
        (ButtonId::User, Input::new(p.P0_12, Pull::Up)),
        (ButtonId::Start, Input::new(p.P0_24, Pull::Up)),
        (ButtonId::Stop, Input::new(p.P0_25, Pull::Up)),
    ];
    for (id, pin) in pins {
        if let Some(&button) = node.button(id) {
            unwrap!(spawner.spawn(button_task(pin, button)));
        }
    }

    unwrap!(spawner.spawn(ble_task(
        sd,
        server,
        node.conn_params,
        Duration::from_millis(node.sync_interval_ms as u64),
    )));
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn storage_task(flash: Flash) -> ! {
    run_bond_storage(flash, &PERSIST, &BONDER).await
}

#[embassy_executor::task]
async fn registry_task() -> ! {
    let radio = SoftdeviceRadio {
        discovery: &DISCOVERY,
        bonder: &BONDER,
        link: &LINK,
        persist: &PERSIST,
    };
    run_registry(&REGISTRY, &REGISTRY_QUEUE, SystemTime, radio).await
}

#[embassy_executor::task]
async fn expiry_task() -> ! {
    run_expiry_timer(&ENGINE).await
}

#[embassy_executor::task]
async fn input_task() -> ! {
    let mut dispatcher = InputDispatcher::new(Controller::new(&ENGINE, &REGISTRY_QUEUE));
    dispatcher.run(&INPUT).await
}

#[embassy_executor::task(pool_size = 4)]
async fn button_task(pin: Input<'static>, button: ButtonConfig) -> ! {
    watch_button(pin, button, &INPUT).await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice, server: Server, params: ConnectionParams, interval: Duration) {
    let controller = Controller::new(&ENGINE, &REGISTRY_QUEUE);
    loop {
        let conn = advertise(sd, &DISCOVERY, &BONDER, &params).await;
        LINK.set(&conn);
        let peer = link_up(&conn, &REGISTRY_QUEUE);

        serve_clock(&conn, &server, &ENGINE, &controller, &SUBSCRIPTIONS, interval).await;

        LINK.clear();
        link_down(peer, &REGISTRY_QUEUE);
    }
}
