//! Controller to display/remote over a loopback link
//!
//! The controller's notifications are handed straight to a subscriber, and
//! the remote's command writes straight back to the controller.

mod common;

use common::{GattWrite, ManualTime, RecordingGattClient, RecordingOutput, RecordingTransport};
use dclk_firmware::ble::connection::RegistryQueue;
use dclk_firmware::ble::gatt::{
    ClockCharacteristic, CLOCK_COMMAND_UUID, CLOCK_STATE_UUID, CLOCK_VALUE_UUID, DCLK_SERVICE_UUID,
};
use dclk_firmware::ble::notifications::{report_once, ClockPublisher, Subscriptions};
use dclk_firmware::ble::subscriber::{ClockSubscriber, DiscoveredCharacteristic, DiscoveredService, MirrorObserver};
use dclk_firmware::clock::{ClockEngine, Phase, TimeSource};
use dclk_firmware::config::{NodeConfig, DEFAULT_DURATION_MS};
use dclk_firmware::input::{ButtonEvent, ButtonId, Edge, InputDispatcher, InputQueue};
use dclk_firmware::output::BUZZER_PULSE_MS;
use dclk_firmware::roles::{CommandSender, Controller, Display, Remote, SharedRole};
use embassy_futures::block_on;

const VALUE_HANDLE: u16 = 17;
const STATE_HANDLE: u16 = 12;
const COMMAND_HANDLE: u16 = 15;

const CHARACTERISTICS: [DiscoveredCharacteristic; 3] = [
    DiscoveredCharacteristic {
        uuid: CLOCK_VALUE_UUID,
        value_handle: VALUE_HANDLE,
        cccd_handle: Some(18),
    },
    DiscoveredCharacteristic {
        uuid: CLOCK_STATE_UUID,
        value_handle: STATE_HANDLE,
        cccd_handle: Some(13),
    },
    DiscoveredCharacteristic {
        uuid: CLOCK_COMMAND_UUID,
        value_handle: COMMAND_HANDLE,
        cccd_handle: None,
    },
];

fn connect(sub: &mut ClockSubscriber, subs: &Subscriptions) {
    let mut client = RecordingGattClient::default();
    sub.on_connected();
    sub.on_discovered(&DiscoveredService {
        uuid: DCLK_SERVICE_UUID,
        characteristics: &CHARACTERISTICS,
    })
    .unwrap();
    block_on(sub.subscribe(&mut client)).unwrap();

    // the server sees the same CCCD writes on an authenticated link
    assert!(subs.on_cccd_write(ClockCharacteristic::Value, true, true));
    assert!(subs.on_cccd_write(ClockCharacteristic::State, true, true));
}

/// Deliver everything the controller sent since the last call
fn deliver<O: MirrorObserver>(transport: &mut RecordingTransport, sub: &mut ClockSubscriber, observer: &mut O) {
    for (characteristic, payload) in transport.sent.drain(..) {
        let handle = match characteristic {
            ClockCharacteristic::Value => VALUE_HANDLE,
            _ => STATE_HANDLE,
        };
        sub.on_notification(handle, Some(payload.as_slice()), observer);
    }
}

fn press(queue: &InputQueue, config: &NodeConfig, id: ButtonId, now_ms: u32) {
    queue.record_edge(config.button(id).unwrap(), Edge::Press, now_ms);
}

#[test]
fn test_countdown_replicates_to_display() {
    let time = ManualTime::new(1_000);
    let engine = ClockEngine::new(&time, NodeConfig::controller().clock);
    assert_eq!(engine.boot(), Phase::Stopped);

    let registry = RegistryQueue::new();
    let subs = Subscriptions::new();
    let publisher = ClockPublisher::new(&subs);
    let mut transport = RecordingTransport::default();

    let mut sub = ClockSubscriber::new();
    let display = SharedRole::new(Display::new(RecordingOutput::default(), DEFAULT_DURATION_MS, &registry));
    connect(&mut sub, &subs);
    display.with(|d| d.on_link_up());

    // idle controller still reports the full duration
    report_once(&engine, &publisher, &mut transport);
    deliver(&mut transport, &mut sub, &mut &display);
    assert_eq!(display.with(|d| d.view().output().last_line().map(str::to_owned)), Some("T:- S2 C".into()));

    let config = NodeConfig::controller();
    let input = InputQueue::new();
    let mut dispatcher = InputDispatcher::new(Controller::new(&engine, &registry));
    press(&input, &config, ButtonId::Start, time.now_ms());
    dispatcher.dispatch_pending(&input);
    assert_eq!(engine.phase(), Phase::Running);

    time.advance(300);
    report_once(&engine, &publisher, &mut transport);
    assert_eq!(transport.values(), vec![9_700]);
    assert_eq!(transport.phases(), vec![Phase::Running.as_u8()]);
    deliver(&mut transport, &mut sub, &mut &display);
    assert_eq!(sub.mirror().remaining_ms(), Some(9_700));
    assert_eq!(display.with(|d| d.view().output().last_line().map(str::to_owned)), Some("T:10 S0 C".into()));

    time.advance(9_700);
    report_once(&engine, &publisher, &mut transport);
    assert_eq!(transport.values(), vec![0]);
    assert_eq!(transport.phases(), vec![Phase::Expired.as_u8()]);
    deliver(&mut transport, &mut sub, &mut &display);

    display.with(|d| {
        let output = d.view().output();
        assert_eq!(output.last_line(), Some("T:0 S3 C"));
        assert_eq!(output.buzzes, vec![BUZZER_PULSE_MS]);
    });

    // expired stays expired; no second buzz
    time.advance(300);
    report_once(&engine, &publisher, &mut transport);
    deliver(&mut transport, &mut sub, &mut &display);
    display.with(|d| assert_eq!(d.view().output().buzzes.len(), 1));
}

#[test]
fn test_link_loss_marks_display_disconnected() {
    let time = ManualTime::new(0);
    let engine = ClockEngine::new(&time, NodeConfig::controller().clock);
    engine.boot();
    engine.start(DEFAULT_DURATION_MS);

    let registry = RegistryQueue::new();
    let subs = Subscriptions::new();
    let publisher = ClockPublisher::new(&subs);
    let mut transport = RecordingTransport::default();
    let mut sub = ClockSubscriber::new();
    let display = SharedRole::new(Display::new(RecordingOutput::default(), DEFAULT_DURATION_MS, &registry));
    connect(&mut sub, &subs);
    display.with(|d| d.on_link_up());

    time.advance(2_500);
    report_once(&engine, &publisher, &mut transport);
    deliver(&mut transport, &mut sub, &mut &display);

    sub.on_disconnected(&mut &display);
    subs.clear();
    display.with(|d| d.on_link_down(sub.mirror()));

    display.with(|d| {
        let output = d.view().output();
        // last known value kept, link shown as down
        assert_eq!(output.last_line(), Some("T:8 S0 D"));
        assert_eq!(output.link, Some(false));
    });

    // nothing goes out while nobody listens
    time.advance(300);
    let report = report_once(&engine, &publisher, &mut transport);
    assert_eq!(report.sent_count(), 0);
    assert!(transport.sent.is_empty());
}

#[test]
fn test_unauthenticated_cccd_write_gets_no_notifications() {
    let time = ManualTime::new(0);
    let engine = ClockEngine::new(&time, NodeConfig::controller().clock);
    engine.boot();

    let subs = Subscriptions::new();
    assert!(!subs.on_cccd_write(ClockCharacteristic::Value, true, false));
    let publisher = ClockPublisher::new(&subs);
    let mut transport = RecordingTransport::default();
    report_once(&engine, &publisher, &mut transport);
    assert_eq!(transport.calls, 0);
}

#[test]
fn test_remote_commands_drive_controller() {
    let time = ManualTime::new(0);
    let engine = ClockEngine::new(&time, NodeConfig::controller().clock);
    engine.boot();
    let controller_registry = RegistryQueue::new();
    let controller = Controller::new(&engine, &controller_registry);

    let remote_registry = RegistryQueue::new();
    let commands = CommandSender::new();
    let remote = SharedRole::new(Remote::new(
        RecordingOutput::default(),
        DEFAULT_DURATION_MS,
        &commands,
        &remote_registry,
    ));
    let subs = Subscriptions::new();
    let mut sub = ClockSubscriber::new();
    connect(&mut sub, &subs);

    let mut dispatcher = InputDispatcher::new(&remote);
    for id in [ButtonId::Start, ButtonId::User] {
        dispatcher.dispatch(ButtonEvent {
            id,
            edge: Edge::Press,
            at_ms: 0,
        });
    }

    let mut client = RecordingGattClient::default();
    assert_eq!(block_on(commands.flush(&sub, &mut client)), 2);

    let mut phases = Vec::new();
    for write in &client.writes {
        if let GattWrite::Value { handle, data } = write {
            assert_eq!(*handle, COMMAND_HANDLE);
            phases.push(controller.on_command_write(data, true).unwrap().to);
        }
    }
    assert_eq!(phases, vec![Phase::Running, Phase::Paused]);
    assert_eq!(engine.phase(), Phase::Paused);
}
