//! ## Endpoint I/O facade
//!
//! A narrow synchronous interface over the host USB stack. Every other
//! component in this crate — the message engine and the control
//! procedures — talks to the device exclusively through this trait, never
//! through `rusb` directly. That keeps the protocol engine testable
//! against an in-memory fake with no hardware attached.
//!

use std::time::Duration;

use crate::error::Error;
use crate::types::Handle;

/// Synchronous endpoint operations, all returning the actual byte count
/// transferred or a typed error. Errors propagate the underlying stack's
/// error unchanged; callers decide whether to auto-abort.
pub trait EndpointIo {
    /// Submit `buf` to the bulk OUT endpoint `ep`, returning bytes written.
    fn bulk_out(&self, ep: u8, buf: &[u8], timeout: Duration) -> Result<usize, Error>;

    /// Read up to `buf.len()` bytes from the bulk IN endpoint `ep`.
    fn bulk_in(&self, ep: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, Error>;

    /// Issue a class/vendor control IN request, filling `buf` with the
    /// device's response and returning the bytes read.
    #[allow(clippy::too_many_arguments)]
    fn control_in(
        &self,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error>;

    /// Standard CLEAR_FEATURE/ENDPOINT_HALT on endpoint `ep`.
    fn clear_halt(&self, ep: u8) -> Result<(), Error>;

    /// The host stack's reset-configuration primitive.
    fn reset(&self) -> Result<(), Error>;
}

impl EndpointIo for Handle {
    fn bulk_out(&self, ep: u8, buf: &[u8], timeout: Duration) -> Result<usize, Error> {
        Ok(self.borrow().write_bulk(ep, buf, timeout)?)
    }

    fn bulk_in(&self, ep: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        Ok(self.borrow().read_bulk(ep, buf, timeout)?)
    }

    fn control_in(
        &self,
        bm_request_type: u8,
        b_request: u8,
        w_value: u16,
        w_index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        Ok(self.borrow().read_control(
            bm_request_type,
            b_request,
            w_value,
            w_index,
            buf,
            timeout,
        )?)
    }

    fn clear_halt(&self, ep: u8) -> Result<(), Error> {
        Ok(self.borrow().clear_halt(ep)?)
    }

    fn reset(&self) -> Result<(), Error> {
        Ok(self.borrow().reset()?)
    }
}
