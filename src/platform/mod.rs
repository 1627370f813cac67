//! nRF52840 / S140 glue
//!
//! Everything that touches the SoftDevice or the GPIO peripheral. The
//! library's seams (`NotifyTransport`, `GattClient`, `RadioControl`,
//! `OutputSink`) are implemented here on top of nrf-softdevice and
//! embassy-nrf; the node binaries wire them together.

pub mod gatt;
pub mod io;
pub mod link;
pub mod radio;
pub mod security;
pub mod storage;

use nrf_softdevice::ble::{Address, AddressType};
use nrf_softdevice::{raw, Config};

use crate::ble::bonding::{AddressKind, PeerAddress};
use crate::config::{ConnectionParams, NodeConfig, NodeRole, MAX_LINKS};

pub fn peer_address(address: &Address) -> PeerAddress {
    let kind = match address.address_type() {
        AddressType::Public => AddressKind::Public,
        AddressType::RandomStatic => AddressKind::RandomStatic,
        AddressType::RandomPrivateResolvable => AddressKind::RandomPrivateResolvable,
        _ => AddressKind::RandomPrivateNonResolvable,
    };
    PeerAddress::new(kind, address.bytes())
}

pub fn stack_address(peer: &PeerAddress) -> Address {
    let kind = match peer.kind {
        AddressKind::Public => AddressType::Public,
        AddressKind::RandomStatic => AddressType::RandomStatic,
        AddressKind::RandomPrivateResolvable => AddressType::RandomPrivateResolvable,
        AddressKind::RandomPrivateNonResolvable => AddressType::RandomPrivateNonResolvable,
    };
    Address::new(kind, peer.bytes)
}

/// Connection parameters in the stack's form; invalid ones fall back to the
/// defaults
pub fn gap_conn_params(params: &ConnectionParams) -> raw::ble_gap_conn_params_t {
    let params = if params.is_valid() {
        *params
    } else {
        warn!("CONNECTION: invalid connection parameters, using defaults");
        ConnectionParams::default()
    };
    raw::ble_gap_conn_params_t {
        min_conn_interval: params.min_conn_interval,
        max_conn_interval: params.max_conn_interval,
        slave_latency: params.slave_latency,
        conn_sup_timeout: params.supervision_timeout,
    }
}

/// SoftDevice configuration for a node
///
/// The controller is peripheral only; display and remote connect out as
/// centrals.
pub fn softdevice_config(node: &NodeConfig) -> Config {
    let central = node.role != NodeRole::Controller;
    let links = MAX_LINKS as u8;

    Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: links,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 23 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t { attr_tab_size: 1408 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: if central { 0 } else { links },
            central_role_count: if central { links } else { 0 },
            central_sec_count: if central { links } else { 0 },
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: node.device_name.as_ptr() as _,
            current_len: node.device_name.len() as u16,
            max_len: node.device_name.len() as u16,
            write_perm: raw::ble_gap_conn_sec_mode_t {
                _bitfield_1: raw::ble_gap_conn_sec_mode_t::new_bitfield_1(0, 0),
            },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(raw::BLE_GATTS_VLOC_STACK as u8),
        }),
        ..Default::default()
    }
}
