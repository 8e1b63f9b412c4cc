//! ## Types
//!
//! The different types used across the crate
//!

use std::sync::{Arc, Mutex, MutexGuard};

use rusb::{Context, DeviceHandle, Direction, TransferType};

/// ### Handle
///
/// Alias for a libusb device handle wrapped in an Arc and Mutex.
///
#[derive(Debug, Clone)]
pub struct Handle(Arc<Mutex<DeviceHandle<Context>>>);

impl Handle {
    pub fn new(handle: DeviceHandle<Context>) -> Handle {
        Handle(Arc::new(Mutex::new(handle)))
    }

    pub fn borrow(&self) -> MutexGuard<'_, DeviceHandle<Context>> {
        self.0.lock().unwrap()
    }
}

/// USB device address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceAddr {
    /// USB bus number
    pub bus: u8,
    /// USB device number
    pub device: u8,
}

/// USB device identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceId {
    /// USB Id Vendor
    pub vendor_id: u16,
    /// USB Id Product
    pub product_id: u16,
}

/// USB device info
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub address: DeviceAddr,
}

/// ### Device Mode
///
/// A collection of the configuration, interface and interface number. Also if the interface has a kernel driver attached.
///
#[derive(Debug, Clone, Default)]
pub struct DeviceMode {
    /// The USB configuration number
    pub config_number: u8,
    /// The interface number specific to the configuration
    pub interface_number: u8,
    /// The setting number specific to the interface
    pub setting_number: u8,
    /// If the device has a kernel driver. Important for returning control to the OS (on Linux).
    pub has_kernel_driver: bool,
}

/// ### Endpoint
///
/// Properties of an endpoint.
///
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Address of the endpoint on the interface
    pub address: u8,
    /// The maximal size a packet can have on this endpoint
    pub max_packet_size: u16,
    /// The transfer type of the endpoint (for USBTMC, Bulk or Interrupt)
    pub transfer_type: TransferType,
    /// The direction of the endpoint (for USBTMC, In or Out)
    pub direction: Direction,
}

/// ### USBTMC Endpoints
///
/// Endpoints specific to the USBTMC spec.
///
#[derive(Clone, Debug)]
pub struct UsbtmcEndpoints {
    /// The mandatory BULK OUT endpoint
    pub bulk_out_ep: Endpoint,
    /// The mandatory BULK IN endpoint
    pub bulk_in_ep: Endpoint,
    /// The optional INTERRUPT IN endpoint, not currently read by any
    /// operation in this crate (interrupt-driven status notification is
    /// out of scope) but resolved at open time for completeness.
    #[allow(dead_code)]
    pub interrupt_ep: Option<Endpoint>,
}

/// ### Capabilities
///
/// The collected, decoded capabilities of a USBTMC device.
///
#[derive(Clone, Debug)]
pub struct Capabilities {
    /// Can accept a control command for pulse
    pub accepts_indicator_pulse_request: bool,
    /// Only sends data to the controller
    pub is_talk_only: bool,
    /// Only accepts data from the controller
    pub is_listen_only: bool,
    /// When returning data, it has a terminator character in the data
    pub supports_bulk_in_term_char: bool,
}

/// The four capability bytes returned verbatim from GET_CAPABILITIES, at byte
/// offsets 4 (interface_caps), 5 (device_caps), 14 (usb488_interface_caps)
/// and 15 (usb488_device_caps).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawCapabilities {
    pub interface_caps: u8,
    pub device_caps: u8,
    pub usb488_interface_caps: u8,
    pub usb488_device_caps: u8,
}

impl From<RawCapabilities> for Capabilities {
    fn from(raw: RawCapabilities) -> Self {
        Capabilities {
            accepts_indicator_pulse_request: raw.interface_caps & 0b0000_0100 != 0,
            is_talk_only: raw.interface_caps & 0b0000_0010 != 0,
            is_listen_only: raw.interface_caps & 0b0000_0001 != 0,
            supports_bulk_in_term_char: raw.device_caps & 0b0000_0001 != 0,
        }
    }
}

/// Selects the EOF emulation contract a [`crate::Session::read`] follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// A short read is followed by a single zero-length read signalling EOF,
    /// matching the contract buffered stream readers expect.
    #[default]
    Fread,
    /// No sticky EOF emulation; every read attempts to fill the caller's buffer.
    Read,
}
