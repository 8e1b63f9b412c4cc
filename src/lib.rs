//! # usbtmc-host
//!
//! Host-side driver for USB Test and Measurement Class (USBTMC) instruments:
//! oscilloscopes, signal generators, multimeters and similar devices
//! exposing bInterfaceClass=0xFE, bInterfaceSubClass=0x03. Implements the
//! bulk message framing, chunked read/write loops, bTag transaction
//! discipline and the ABORT_BULK_IN/ABORT_BULK_OUT/CLEAR control state
//! machines from USBTMC 1.0 §4.2.1.
//!
//! ## Usage
//!
//! ```toml
//! usbtmc-host = "0.1"
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use usbtmc_host::Session;
//!
//! const DEVICE_VID: u16 = 0x0000;
//! const DEVICE_PID: u16 = 0x0000;
//!
//! fn main() {
//!     let device = Session::connect((DEVICE_VID, DEVICE_PID)).expect("failed to connect");
//!     device.command("*IDN?").expect("failed to send command");
//!     let response: String = device.query("*IDN?").expect("failed to query device");
//!     println!("{response}");
//! }
//! ```
//!

mod attribute;
mod btag;
mod constants;
mod error;
mod init;
mod io;
mod registry;
mod types;

mod communication {
    pub mod bulk;
    pub mod control;
}

use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use rusb::DeviceDescriptor;

pub use attribute::{AttributeId, AttributeValue};
pub use error::{Error, ErrorKind};
pub use registry::EnumerationSession;
pub use types::{Capabilities, DeviceAddr, DeviceId, DeviceInfo, RawCapabilities, ReadMode};

use attribute::SessionAttributes;
use btag::BTag;
use communication::{bulk, control};
use constants::misc;
use registry::InstrumentMeta;
use types::{DeviceMode, Handle, UsbtmcEndpoints};

/// Selects which attached instrument [`Session::connect`] opens.
pub trait DeviceFilter {
    fn apply_filter<T: rusb::UsbContext>(
        &self,
        device: &rusb::Device<T>,
        device_desc: &DeviceDescriptor,
    ) -> bool;
}

struct SessionState {
    attrs: SessionAttributes,
    io_buffer: Vec<u8>,
    eof_sticky: bool,
}

/// Per-instrument context: the two bulk endpoints, timeout and terminator
/// configuration, bTag state and the scratch I/O buffer. Every operation
/// locks the single internal mutex for its duration, which both protects
/// the scratch buffer and enforces the one-operation-in-flight contract.
pub struct Session {
    handle: Handle,
    mode: DeviceMode,
    endpoints: UsbtmcEndpoints,
    btag: BTag,
    minor: u32,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("endpoints", &self.endpoints)
            .field("minor", &self.minor)
            .finish()
    }
}

impl Session {
    /// List attached USBTMC devices without opening any of them.
    pub fn devices() -> Result<Vec<DeviceInfo>, Error> {
        let mut context = rusb::Context::new()?;
        init::list_devices(&mut context)
    }

    /// Open and initialize a USBTMC session.
    ///
    /// `filter` selects the instrument:
    /// - `()` - first found USBTMC device
    /// - `(idVendor, idProduct)` or [`DeviceId`] - by USB identifiers
    /// - `(bus, device)` or [`DeviceAddr`] - by USB bus/device address
    /// - [`DeviceInfo`] - by both
    pub fn connect(filter: impl DeviceFilter) -> Result<Session, Error> {
        let mut context = rusb::Context::new()?;
        let (device, mut handle) = init::open_device(&mut context, filter)?;

        let mut mode = init::get_usbtmc_mode(&device)?;
        init::detach_kernel_driver(&mut mode, &mut handle)?;

        let endpoints: UsbtmcEndpoints = init::get_endpoints(&mode, &device)?;

        handle.set_active_configuration(mode.config_number)?;
        handle.claim_interface(mode.interface_number)?;
        handle.set_alternate_setting(mode.interface_number, mode.setting_number)?;

        let device_desc = device.device_descriptor()?;
        let (manufacturer, product, serial) =
            init::read_identification_strings(&handle, &device_desc);

        let handle = Handle::new(handle);
        let btag = BTag::new();

        let minor = registry::attach(InstrumentMeta {
            manufacturer,
            product,
            serial,
        })?;

        debug!(
            "usbtmc session opened: minor={minor} interface={} bulk_out=0x{:02x} bulk_in=0x{:02x}",
            mode.interface_number, endpoints.bulk_out_ep.address, endpoints.bulk_in_ep.address
        );

        Ok(Session {
            handle,
            mode,
            endpoints,
            btag,
            minor,
            state: Mutex::new(SessionState {
                attrs: SessionAttributes::default(),
                io_buffer: vec![0u8; misc::IOBUFFER],
                eof_sticky: false,
            }),
        })
    }

    fn timeout(&self) -> Duration {
        let state = self.state.lock().unwrap();
        Duration::from_millis(state.attrs.timeout_ms.max(0) as u64)
    }

    /// Deliver a command: frame and submit `data` over the bulk OUT
    /// endpoint, chunked per the message engine's write contract. Returns
    /// the number of bytes consumed (always `data.len()` on success).
    pub fn write(&self, data: &[u8]) -> Result<usize, Error> {
        let mut state = self.state.lock().unwrap();
        state.eof_sticky = false;
        let params = bulk::WriteParams {
            bulk_out_addr: self.endpoints.bulk_out_ep.address,
            timeout: Duration::from_millis(state.attrs.timeout_ms.max(0) as u64),
            auto_abort: state.attrs.auto_abort,
            rem_nl_on_write: state.attrs.rem_nl_on_write,
        };
        bulk::write_message(&self.handle, &self.btag, data, &params)
    }

    /// Retrieve a response into a buffer of up to `max` bytes.
    pub fn read(&self, max: usize) -> Result<Vec<u8>, Error> {
        let mut state = self.state.lock().unwrap();
        let mut out = vec![0u8; max];
        let params = bulk::ReadParams {
            bulk_in_addr: self.endpoints.bulk_in_ep.address,
            bulk_out_addr: self.endpoints.bulk_out_ep.address,
            bulk_in_max_packet: self.endpoints.bulk_in_ep.max_packet_size,
            timeout: Duration::from_millis(state.attrs.timeout_ms.max(0) as u64),
            term_char_enabled: state.attrs.term_char_enabled,
            term_char: state.attrs.term_char,
            add_nl_on_read: state.attrs.add_nl_on_read,
            auto_abort: state.attrs.auto_abort,
        };
        let read_mode = state.attrs.read_mode;
        let SessionState {
            io_buffer,
            eof_sticky,
            ..
        } = &mut *state;
        let n = bulk::read_message(
            &self.handle,
            &self.btag,
            io_buffer,
            eof_sticky,
            read_mode,
            &mut out,
            &params,
        )?;
        out.truncate(n);
        Ok(out)
    }

    /// Instruments have no addressable random-access position.
    pub fn seek(&self, _offset: u64) -> Result<u64, Error> {
        Err(Error::NotSupported("seek is not meaningful on instruments"))
    }

    /// Send a SCPI command, appending nothing; the caller supplies any
    /// required terminator.
    pub fn command(&self, cmd: &str) -> Result<(), Error> {
        self.write(cmd.as_bytes())?;
        Ok(())
    }

    /// Send a command and return the response as raw bytes.
    pub fn query_raw(&self, cmd: &str) -> Result<Vec<u8>, Error> {
        self.write(cmd.as_bytes())?;
        self.read(misc::IOBUFFER * 4)
    }

    /// Send a command and return the response decoded as UTF-8, with
    /// leading/trailing whitespace trimmed.
    pub fn query(&self, cmd: &str) -> Result<String, Error> {
        let resp = self.query_raw(cmd)?;
        let text = std::str::from_utf8(&resp)
            .map_err(|_| Error::InvalidArgument("response was not valid UTF-8".into()))?;
        Ok(text.trim().to_string())
    }

    /// Read the current value of a writable or derived attribute.
    pub fn get_attribute(&self, id: AttributeId) -> AttributeValue {
        let state = self.state.lock().unwrap();
        attribute::get(&state.attrs, id)
    }

    /// Write `value` to a writable attribute. Rejects unknown ids,
    /// out-of-range values and writes to read-only attributes.
    pub fn set_attribute(&self, id: AttributeId, value: AttributeValue) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        attribute::set(&mut state.attrs, id, value)
    }

    /// CLEAR_FEATURE/ENDPOINT_HALT on the bulk OUT endpoint.
    pub fn clear_out_halt(&self) -> Result<(), Error> {
        control::clear_feature(&self.handle, self.endpoints.bulk_out_ep.address)
    }

    /// CLEAR_FEATURE/ENDPOINT_HALT on the bulk IN endpoint.
    pub fn clear_in_halt(&self) -> Result<(), Error> {
        control::clear_feature(&self.handle, self.endpoints.bulk_in_ep.address)
    }

    /// Run the full device CLEAR procedure (USBTMC §4.2.1.6).
    pub fn clear(&self) -> Result<(), Error> {
        control::clear(
            &self.handle,
            self.mode.interface_number,
            self.endpoints.bulk_out_ep.address,
            self.endpoints.bulk_in_ep.address,
            self.endpoints.bulk_in_ep.max_packet_size,
            self.timeout(),
        )
    }

    /// Abort the in-flight bulk OUT transfer (USBTMC §4.2.1.2).
    pub fn abort_bulk_out(&self) -> Result<usize, Error> {
        control::abort_bulk_out(
            &self.handle,
            &self.btag,
            self.endpoints.bulk_out_ep.address,
            self.timeout(),
        )
    }

    /// Abort the in-flight bulk IN transfer (USBTMC §4.2.1.4).
    pub fn abort_bulk_in(&self) -> Result<usize, Error> {
        control::abort_bulk_in(
            &self.handle,
            &self.btag,
            self.endpoints.bulk_in_ep.address,
            self.endpoints.bulk_in_ep.max_packet_size,
            self.timeout(),
        )
    }

    /// Query the device's raw capability bytes.
    pub fn get_capabilities_raw(&self) -> Result<RawCapabilities, Error> {
        control::get_capabilities(&self.handle, self.mode.interface_number, self.timeout())
    }

    /// Ask the device to pulse its activity indicator.
    pub fn indicator_pulse(&self) -> Result<(), Error> {
        control::indicator_pulse(&self.handle, self.mode.interface_number, self.timeout())
    }

    /// Invoke the host USB stack's reset-configuration primitive.
    pub fn reset_conf(&self) -> Result<(), Error> {
        use io::EndpointIo;
        self.handle.reset()
    }

    /// The minor number this session was registered under.
    pub fn minor_number(&self) -> u32 {
        self.minor
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        registry::detach(self.minor);
        if let Err(e) = self
            .handle
            .borrow()
            .release_interface(self.mode.interface_number)
        {
            debug!("failed to release usb interface on drop: {e}");
        }
        if self.mode.has_kernel_driver {
            if let Err(e) = self
                .handle
                .borrow()
                .attach_kernel_driver(self.mode.interface_number)
            {
                debug!("failed to reattach kernel driver on drop: {e}");
            }
        }
    }
}

/// The `INSTRUMENT_DATA` control request: manufacturer, product and serial
/// number strings for the instrument attached at `minor`, truncated to 199
/// bytes each.
pub fn instrument_data(minor: u32) -> Result<(String, String, String), Error> {
    registry::instrument_data(minor)
}

/// Open the shared enumeration session (registry minor number 0 in the
/// reference model): reading it yields the tab-separated instrument table.
pub fn enumerate() -> EnumerationSession {
    EnumerationSession::open()
}
