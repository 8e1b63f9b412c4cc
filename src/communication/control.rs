//! Control
//!
//! The ABORT_BULK_OUT, ABORT_BULK_IN and CLEAR control-endpoint state
//! machines (USBTMC 1.0 §4.2.1), plus the single-shot control requests:
//! GET_CAPABILITIES, INDICATOR_PULSE and the halt-clearing primitives.
//! Every function here is generic over [`crate::io::EndpointIo`] so the
//! state machines run unchanged against a real device or a fake.
//!

use std::time::Duration;

use crate::btag::BTag;
use crate::constants::{control_requests, misc, usbtmc_status};
use crate::error::Error;
use crate::io::EndpointIo;
use crate::types::RawCapabilities;

fn bm_request_type_in() -> u8 {
    rusb::request_type(
        rusb::Direction::In,
        rusb::RequestType::Class,
        rusb::Recipient::Endpoint,
    )
}

fn bm_request_type_in_interface() -> u8 {
    rusb::request_type(
        rusb::Direction::In,
        rusb::RequestType::Class,
        rusb::Recipient::Interface,
    )
}

fn fifo_not_empty(detail_byte: u8) -> bool {
    detail_byte & 0b0000_0001 == 0
}

/// Abort the in-flight bulk OUT transfer tagged by `btag`'s last-issued OUT
/// tag. Returns the number of bytes the device accepted before aborting.
pub fn abort_bulk_out<IO: EndpointIo>(
    io: &IO,
    btag: &BTag,
    bulk_out_addr: u8,
    timeout: Duration,
) -> Result<usize, Error> {
    let bm_request_type = bm_request_type_in();
    let w_value = u16::from(btag.last_out());
    let w_index = u16::from(bulk_out_addr);

    let mut buf = [0u8; 2];
    io.control_in(
        bm_request_type,
        control_requests::INITIATE_ABORT_BULK_OUT,
        w_value,
        w_index,
        &mut buf,
        timeout,
    )?;
    match buf[0] {
        usbtmc_status::STATUS_SUCCESS => {}
        usbtmc_status::STATUS_FAILED => return Ok(0),
        _ => return Err(Error::StatusUnexpectedFailure),
    }

    let mut status_buf = [0u8; 8];
    let mut iterations = 0;
    loop {
        io.control_in(
            bm_request_type,
            control_requests::CHECK_ABORT_BULK_OUT_STATUS,
            0,
            w_index,
            &mut status_buf,
            timeout,
        )?;
        match status_buf[0] {
            usbtmc_status::STATUS_PENDING => {
                iterations += 1;
                if iterations >= misc::MAX_READS_TO_CLEAR_BULK_IN {
                    return Err(Error::DrainExceeded(misc::MAX_READS_TO_CLEAR_BULK_IN));
                }
                continue;
            }
            usbtmc_status::STATUS_SUCCESS => break,
            _ => return Err(Error::StatusUnexpectedFailure),
        }
    }

    Ok(u32::from_le_bytes([status_buf[4], status_buf[5], status_buf[6], status_buf[7]]) as usize)
}

/// Abort the in-flight bulk IN transfer tagged by `btag`'s last-issued IN
/// tag. If the device's FIFO still holds data while PENDING, drains it
/// (capped at [`misc::MAX_READS_TO_CLEAR_BULK_IN`]) before continuing to
/// poll. A `STATUS_FAILED` response on INITIATE means the FIFO was already
/// empty, which is not an error here.
pub fn abort_bulk_in<IO: EndpointIo>(
    io: &IO,
    btag: &BTag,
    bulk_in_addr: u8,
    bulk_in_max_packet: u16,
    timeout: Duration,
) -> Result<usize, Error> {
    let bm_request_type = bm_request_type_in();
    let w_value = u16::from(btag.last_in());
    let w_index = u16::from(bulk_in_addr);

    let mut buf = [0u8; 2];
    io.control_in(
        bm_request_type,
        control_requests::INITIATE_ABORT_BULK_IN,
        w_value,
        w_index,
        &mut buf,
        timeout,
    )?;
    match buf[0] {
        usbtmc_status::STATUS_SUCCESS => {}
        usbtmc_status::STATUS_FAILED => return Ok(0),
        _ => return Err(Error::StatusUnexpectedFailure),
    }

    let mut status_buf = [0u8; 8];
    let mut scratch = vec![0u8; misc::IOBUFFER];
    loop {
        io.control_in(
            bm_request_type,
            control_requests::CHECK_ABORT_BULK_IN_STATUS,
            0,
            w_index,
            &mut status_buf,
            timeout,
        )?;
        match status_buf[0] {
            usbtmc_status::STATUS_PENDING => {
                if fifo_not_empty(status_buf[1]) {
                    drain_bulk_in(io, bulk_in_addr, bulk_in_max_packet, &mut scratch, timeout)?;
                }
                continue;
            }
            usbtmc_status::STATUS_SUCCESS => break,
            _ => return Err(Error::StatusUnexpectedFailure),
        }
    }

    Ok(u32::from_le_bytes([status_buf[4], status_buf[5], status_buf[6], status_buf[7]]) as usize)
}

/// Read and discard whatever is sitting in the bulk IN FIFO, stopping at
/// the first short packet (fewer than `bulk_in_max_packet` bytes) or after
/// [`misc::MAX_READS_TO_CLEAR_BULK_IN`] reads, whichever comes first. Reads
/// up to `IOBUFFER` bytes per round per spec.md §4.6, so a backlog spread
/// across many small wMaxPacketSize packets still drains within the cap.
fn drain_bulk_in<IO: EndpointIo>(
    io: &IO,
    bulk_in_addr: u8,
    bulk_in_max_packet: u16,
    scratch: &mut [u8],
    timeout: Duration,
) -> Result<(), Error> {
    for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
        let n = io.bulk_in(bulk_in_addr, scratch, timeout)?;
        if n < bulk_in_max_packet as usize {
            return Ok(());
        }
    }
    Err(Error::DrainExceeded(misc::MAX_READS_TO_CLEAR_BULK_IN))
}

/// Run the interface-wide CLEAR procedure: INITIATE_CLEAR, poll
/// CHECK_CLEAR_STATUS draining the bulk IN FIFO while pending, then issue
/// the closing CLEAR_FEATURE/ENDPOINT_HALT on the bulk OUT endpoint that
/// the protocol requires after a successful clear.
pub fn clear<IO: EndpointIo>(
    io: &IO,
    interface_number: u8,
    bulk_out_addr: u8,
    bulk_in_addr: u8,
    bulk_in_max_packet: u16,
    timeout: Duration,
) -> Result<(), Error> {
    let bm_request_type = bm_request_type_in_interface();
    let w_index = u16::from(interface_number);

    let mut buf = [0u8; 1];
    io.control_in(
        bm_request_type,
        control_requests::INITIATE_CLEAR,
        0,
        w_index,
        &mut buf,
        timeout,
    )?;
    if buf[0] != usbtmc_status::STATUS_SUCCESS {
        return Err(Error::StatusUnexpectedFailure);
    }

    let mut status_buf = [0u8; 2];
    let mut scratch = vec![0u8; misc::IOBUFFER];
    loop {
        io.control_in(
            bm_request_type,
            control_requests::CHECK_CLEAR_STATUS,
            0,
            w_index,
            &mut status_buf,
            timeout,
        )?;
        match status_buf[0] {
            usbtmc_status::STATUS_PENDING => {
                if fifo_not_empty(status_buf[1]) {
                    drain_bulk_in(io, bulk_in_addr, bulk_in_max_packet, &mut scratch, timeout)?;
                }
                continue;
            }
            usbtmc_status::STATUS_SUCCESS => break,
            _ => return Err(Error::StatusUnexpectedFailure),
        }
    }

    io.clear_halt(bulk_out_addr)
}

/// CLEAR_FEATURE/ENDPOINT_HALT on a single endpoint.
pub fn clear_feature<IO: EndpointIo>(io: &IO, endpoint_addr: u8) -> Result<(), Error> {
    io.clear_halt(endpoint_addr)
}

/// Query the device's capability bytes via GET_CAPABILITIES.
pub fn get_capabilities<IO: EndpointIo>(
    io: &IO,
    interface_number: u8,
    timeout: Duration,
) -> Result<RawCapabilities, Error> {
    let bm_request_type = bm_request_type_in_interface();
    let w_index = u16::from(interface_number);
    let mut buf = [0u8; 0x18];

    io.control_in(
        bm_request_type,
        control_requests::GET_CAPABILITIES,
        0,
        w_index,
        &mut buf,
        timeout,
    )?;

    if buf[0] != usbtmc_status::STATUS_SUCCESS {
        return Err(Error::StatusUnexpectedFailure);
    }

    Ok(RawCapabilities {
        interface_caps: buf[4],
        device_caps: buf[5],
        usb488_interface_caps: buf[14],
        usb488_device_caps: buf[15],
    })
}

/// Ask the device to pulse its activity indicator, if it reported support
/// for the request in GET_CAPABILITIES.
pub fn indicator_pulse<IO: EndpointIo>(
    io: &IO,
    interface_number: u8,
    timeout: Duration,
) -> Result<(), Error> {
    let bm_request_type = bm_request_type_in_interface();
    let w_index = u16::from(interface_number);
    let mut buf = [0u8; 1];

    io.control_in(
        bm_request_type,
        control_requests::INDICATOR_PULSE,
        0,
        w_index,
        &mut buf,
        timeout,
    )?;

    match buf[0] {
        usbtmc_status::STATUS_SUCCESS => Ok(()),
        _ => Err(Error::StatusUnexpectedFailure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::io::fake::FakeEndpoint;

    fn status_buf(status: u8, detail: u8, count: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 8];
        buf[0] = status;
        buf[1] = detail;
        buf[4..8].copy_from_slice(&count.to_le_bytes());
        buf
    }

    #[test]
    fn abort_bulk_out_success_path() {
        let io = FakeEndpoint::new();
        io.push_control(vec![usbtmc_status::STATUS_SUCCESS, 0]);
        io.push_control(status_buf(usbtmc_status::STATUS_SUCCESS, 0, 42));
        let btag = BTag::new();
        btag.next_out();
        let n = abort_bulk_out(&io, &btag, 0x01, Duration::from_secs(1)).unwrap();
        assert_eq!(n, 42);

        let calls = io.control_log.lock().unwrap();
        assert_eq!(calls[0].bm_request_type, bm_request_type_in());
        assert_eq!(
            calls[0].b_request,
            control_requests::INITIATE_ABORT_BULK_OUT
        );
        assert_eq!(calls[0].w_value, 1);
        assert_eq!(calls[0].w_index, 0x01);
        assert_eq!(
            calls[1].b_request,
            control_requests::CHECK_ABORT_BULK_OUT_STATUS
        );
    }

    #[test]
    fn abort_bulk_out_already_idle_is_ok() {
        let io = FakeEndpoint::new();
        io.push_control(vec![usbtmc_status::STATUS_FAILED, 0]);
        let btag = BTag::new();
        let n = abort_bulk_out(&io, &btag, 0x01, Duration::from_secs(1)).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn abort_bulk_out_fails_past_iteration_cap() {
        let io = FakeEndpoint::new();
        io.push_control(vec![usbtmc_status::STATUS_SUCCESS, 0]);
        for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
            io.push_control(status_buf(usbtmc_status::STATUS_PENDING, 0, 0));
        }
        let btag = BTag::new();
        let err = abort_bulk_out(&io, &btag, 0x01, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::DrainExceeded(_)));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn abort_bulk_in_drains_pending_fifo_then_succeeds() {
        let io = FakeEndpoint::new();
        io.push_control(vec![usbtmc_status::STATUS_SUCCESS, 0]);
        // first poll: pending, fifo not empty -> triggers a drain read
        io.push_control(status_buf(usbtmc_status::STATUS_PENDING, 0, 0));
        io.push_bulk_in(vec![0xAA; 4]); // short read ends the drain
                                        // second poll: success
        io.push_control(status_buf(usbtmc_status::STATUS_SUCCESS, 1, 8));
        let btag = BTag::new();
        let n = abort_bulk_in(&io, &btag, 0x82, 64, Duration::from_secs(1)).unwrap();
        assert_eq!(n, 8);
        assert_eq!(io.bulk_in_queue.lock().unwrap().len(), 0);
    }

    #[test]
    fn clear_drains_fifo_and_clears_halt_on_completion() {
        let io = FakeEndpoint::new();
        io.push_control(vec![usbtmc_status::STATUS_SUCCESS]);
        io.push_control(vec![usbtmc_status::STATUS_PENDING, 0]);
        io.push_bulk_in(vec![0xAA; 4]);
        io.push_control(vec![usbtmc_status::STATUS_SUCCESS, 1]);
        clear(&io, 0, 0x01, 0x82, 64, Duration::from_secs(1)).unwrap();
        assert_eq!(*io.clear_halt_log.lock().unwrap(), vec![0x01]);
    }

    #[test]
    fn drain_bulk_in_errors_past_iteration_cap() {
        let io = FakeEndpoint::new();
        for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
            io.push_bulk_in(vec![0xAA; 64]);
        }
        let mut scratch = vec![0u8; 64];
        let err = drain_bulk_in(&io, 0x82, 64, &mut scratch, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::DrainExceeded(_)));
    }

    #[test]
    fn drain_bulk_in_reads_iobuffer_sized_rounds_so_a_large_backlog_fits_under_the_cap() {
        let io = FakeEndpoint::new();
        // A ~2000-byte backlog behind a 64-byte wMaxPacketSize endpoint is ~31
        // packets — more than MAX_READS_TO_CLEAR_BULK_IN (10) one packet at a
        // time, but an IOBUFFER-sized scratch buffer pulls it in a single round.
        io.push_bulk_in(vec![0xAA; 2000]);
        let mut scratch = vec![0u8; misc::IOBUFFER];
        drain_bulk_in(&io, 0x82, 64, &mut scratch, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn get_capabilities_decodes_byte_offsets() {
        let io = FakeEndpoint::new();
        let mut buf = vec![0u8; 0x18];
        buf[0] = usbtmc_status::STATUS_SUCCESS;
        buf[4] = 0b0000_0111;
        buf[5] = 0b0000_0001;
        buf[14] = 0x02;
        buf[15] = 0x03;
        io.push_control(buf);
        let caps = get_capabilities(&io, 0, Duration::from_secs(1)).unwrap();
        assert_eq!(caps.interface_caps, 0b0000_0111);
        assert_eq!(caps.device_caps, 0b0000_0001);
        assert_eq!(caps.usb488_interface_caps, 0x02);
        assert_eq!(caps.usb488_device_caps, 0x03);
    }
}
