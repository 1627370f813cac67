//! Display node: mirrors the controller's clock, buzzes on expiry

#![no_std]
#![no_main]

use core::cell::RefCell;

use defmt::{info, unwrap};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::{config::Config, interrupt};
use embassy_sync::blocking_mutex::Mutex;
use nrf_softdevice::{Flash, Softdevice};
use panic_probe as _;
use static_cell::StaticCell;

use dclk_firmware::ble::advertising::DiscoveryController;
use dclk_firmware::ble::connection::{init_registry, run_registry, RegistryQueue, SharedRegistry};
use dclk_firmware::ble::registry::ConnectionRegistry;
use dclk_firmware::clock::SystemTime;
use dclk_firmware::config::{ConnectionParams, NodeConfig, PairingConfig, DEFAULT_DURATION_MS};
use dclk_firmware::input::{ButtonConfig, ButtonId, InputDispatcher, InputQueue};
use dclk_firmware::platform::io::{run_buzzer, watch_button, BuzzerSignal, PanelOutput};
use dclk_firmware::platform::link::{connect, follow_clock, link_down, link_up};
use dclk_firmware::platform::radio::{LinkSlot, SoftdeviceRadio};
use dclk_firmware::platform::security::Bonder;
use dclk_firmware::platform::softdevice_config;
use dclk_firmware::platform::storage::{load_bonds, run_bond_storage, PersistSignal};
use dclk_firmware::roles::{Display, SharedRole};

type DisplayRole = SharedRole<Display<'static, PanelOutput>>;

static INPUT: InputQueue = InputQueue::new();
static REGISTRY_QUEUE: RegistryQueue = RegistryQueue::new();
static REGISTRY: SharedRegistry = Mutex::new(RefCell::new(ConnectionRegistry::new(PairingConfig::new())));
static DISCOVERY: DiscoveryController = DiscoveryController::new();
static LINK: LinkSlot = LinkSlot::new();
static PERSIST: PersistSignal = PersistSignal::new();
static BONDER: Bonder = Bonder::new(&REGISTRY_QUEUE);
static BUZZER: BuzzerSignal = BuzzerSignal::new();
static ROLE: StaticCell<DisplayRole> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting DCLK display");
    let node = NodeConfig::display();

    let mut nrf_config = Config::default();
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let p = embassy_nrf::init(nrf_config);

    let sd = Softdevice::enable(&softdevice_config(&node));

    let output = PanelOutput::new(Output::new(p.P0_13, Level::High, OutputDrive::Standard), &BUZZER);
    let role: &'static DisplayRole = ROLE.init(SharedRole::new(Display::new(
        output,
        DEFAULT_DURATION_MS,
        &REGISTRY_QUEUE,
    )));

    // Flash operations go through the SoftDevice, so it must be running
    unwrap!(spawner.spawn(softdevice_task(sd)));
    let mut flash = Flash::take(sd);
    let bonds = load_bonds(&mut flash, &BONDER).await;
    init_registry(&REGISTRY, node.pairing, &bonds);

    unwrap!(spawner.spawn(storage_task(flash)));
    unwrap!(spawner.spawn(registry_task()));
    unwrap!(spawner.spawn(input_task(role)));
    unwrap!(spawner.spawn(buzzer_task(Output::new(p.P0_03, Level::Low, OutputDrive::Standard))));
    if let Some(&button) = node.button(ButtonId::Pair) {
        unwrap!(spawner.spawn(button_task(Input::new(p.P0_11, Pull::Up), button)));
    }
    unwrap!(spawner.spawn(ble_task(sd, role, node.conn_params)));
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
async fn input_task(role: &'static DisplayRole) -> ! {
    InputDispatcher::new(role).run(&INPUT).await
}

#[embassy_executor::task]
async fn button_task(pin: Input<'static>, button: ButtonConfig) -> ! {
    watch_button(pin, button, &INPUT).await
}

#[embassy_executor::task]
async fn buzzer_task(pin: Output<'static>) -> ! {
    run_buzzer(pin, &BUZZER).await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice, role: &'static DisplayRole, params: ConnectionParams) {
    loop {
        let conn = connect(sd, &DISCOVERY, &BONDER, &params).await;
        LINK.set(&conn);
        let peer = link_up(&conn, &REGISTRY_QUEUE);
        role.with(|d| d.on_link_up());

        let subscriber = follow_clock(&conn, role, None).await;

        role.with(|d| d.on_link_down(subscriber.mirror()));
        LINK.clear();
        link_down(peer, &REGISTRY_QUEUE);
    }
}
