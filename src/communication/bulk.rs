//! Bulk
//!
//! The wire codec (pure header encode/decode, no I/O) and the message
//! engine built on top of it: the chunked write/read loops that segment a
//! user transfer into framed bulk packets.
//!

use crate::btag::BTag;
use crate::constants::{bulk_msg_id, misc};
use crate::error::Error;
use crate::io::EndpointIo;
use crate::types::ReadMode;
use std::time::Duration;

use super::control;

/// Decoded fields common to both OUT and IN USBTMC bulk headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_id: u8,
    pub btag: u8,
    pub btag_inverse: u8,
    pub transfer_size: u32,
    pub bm_transfer_attributes: u8,
    pub term_char_or_reserved: u8,
}

/// Decode a 12-byte USBTMC bulk header (OUT and IN share the same layout).
pub fn decode_header(buf: &[u8]) -> Header {
    Header {
        msg_id: buf[0],
        btag: buf[1],
        btag_inverse: buf[2],
        transfer_size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        bm_transfer_attributes: buf[8],
        term_char_or_reserved: buf[9],
    }
}

/// Encode a `DEV_DEP_MSG_OUT` header. `eom` sets bmTransferAttributes bit 0.
pub fn encode_dev_dep_msg_out_header(btag: u8, payload_len: u32, eom: bool) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0] = bulk_msg_id::DEVICE_DEPENDENT_MSG_OUT;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&payload_len.to_le_bytes());
    if eom {
        header[8] = 0b0000_0001;
    }
    header
}

/// Encode a `REQUEST_DEV_DEP_MSG_IN` header. `term_char` being `Some` sets
/// bmTransferAttributes bit 1 ("terminate on term char") and TermChar.
pub fn encode_request_dev_dep_msg_in_header(
    btag: u8,
    transfer_size: u32,
    term_char: Option<u8>,
) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0] = bulk_msg_id::REQUEST_DEVICE_DEPENDENT_MSG_IN;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if let Some(tc) = term_char {
        header[8] = 0b0000_0010;
        header[9] = tc;
    }
    header
}

/// Build a complete `DEV_DEP_MSG_OUT` packet: header + payload, zero-padded
/// to a 4-byte boundary.
pub fn encode_dev_dep_msg_out(btag: u8, payload: &[u8], eom: bool) -> Vec<u8> {
    let mut packet = Vec::with_capacity(12 + payload.len() + 3);
    packet.extend_from_slice(&encode_dev_dep_msg_out_header(
        btag,
        payload.len() as u32,
        eom,
    ));
    packet.extend_from_slice(payload);
    while packet.len() % 4 != 0 {
        packet.push(0);
    }
    packet
}

/// Parameters a `write_message` call needs from the owning session.
pub struct WriteParams {
    pub bulk_out_addr: u8,
    pub timeout: Duration,
    pub auto_abort: bool,
    pub rem_nl_on_write: bool,
}

/// Implements the Message engine write contract: chunk `data` into
/// `IOBUFFER - 12`-sized pieces, frame each with the next bTag, strip a
/// trailing newline from the final chunk when requested, and submit each
/// framed chunk to the bulk OUT endpoint. Always returns `data.len()` on
/// success regardless of any newline trim — the caller's buffer was fully
/// consumed.
pub fn write_message<IO: EndpointIo>(
    io: &IO,
    btag: &BTag,
    data: &[u8],
    params: &WriteParams,
) -> Result<usize, Error> {
    let chunk_capacity = misc::IOBUFFER - misc::USBTMC_HEADER_SIZE;
    let mut pos = 0usize;

    loop {
        let remaining = data.len() - pos;
        let is_last = remaining <= chunk_capacity;
        let chunk_len = if is_last { remaining } else { chunk_capacity };
        let chunk = &data[pos..pos + chunk_len];

        let mut send_len = chunk_len;
        if is_last && params.rem_nl_on_write && chunk_len > 0 && chunk[chunk_len - 1] == b'\n' {
            send_len -= 1;
        }

        let tag = btag.next_out();
        let packet = encode_dev_dep_msg_out(tag, &chunk[..send_len], is_last);

        log::trace!(
            "usbtmc write: btag={tag} len={send_len} eom={is_last} padded_len={}",
            packet.len()
        );

        if let Err(e) = io.bulk_out(params.bulk_out_addr, &packet, params.timeout) {
            log::debug!("usbtmc bulk_out failed: {e}");
            if params.auto_abort {
                let _ = control::abort_bulk_out(io, btag, params.bulk_out_addr, params.timeout);
            }
            return Err(e);
        }

        pos += chunk_len;
        if is_last {
            break;
        }
    }

    Ok(data.len())
}

/// Parameters a `read_message` call needs from the owning session.
pub struct ReadParams {
    pub bulk_in_addr: u8,
    pub bulk_out_addr: u8,
    pub bulk_in_max_packet: u16,
    pub timeout: Duration,
    pub term_char_enabled: bool,
    pub term_char: u8,
    pub add_nl_on_read: bool,
    pub auto_abort: bool,
}

/// Implements the Message engine read contract: repeatedly request a chunk
/// via `REQUEST_DEV_DEP_MSG_IN`, read the reply into `scratch` (sized
/// `IOBUFFER`), and copy the payload into `out_buf` until a short packet is
/// seen. `eof_sticky` implements the FREAD one-shot EOF contract across
/// calls.
pub fn read_message<IO: EndpointIo>(
    io: &IO,
    btag: &BTag,
    scratch: &mut [u8],
    eof_sticky: &mut bool,
    read_mode: ReadMode,
    out_buf: &mut [u8],
    params: &ReadParams,
) -> Result<usize, Error> {
    if read_mode == ReadMode::Fread && *eof_sticky {
        *eof_sticky = false;
        return Ok(0);
    }

    let n = out_buf.len();
    let mut done = 0usize;
    let chunk_capacity = misc::IOBUFFER - misc::USBTMC_HEADER_SIZE - 3;

    loop {
        let remaining = n - done;
        let this_part = remaining.min(chunk_capacity);
        // Reproduces the reference implementation's framing byte-exactly:
        // TransferSize is this_part reduced by header size and alignment
        // headroom a second time.
        let transfer_size = (this_part as i64 - misc::USBTMC_HEADER_SIZE as i64 - 3).max(0) as u32;

        let term_char = params.term_char_enabled.then_some(params.term_char);
        let out_tag = btag.next_out();
        let request = encode_request_dev_dep_msg_in_header(out_tag, transfer_size, term_char);

        if let Err(e) = io.bulk_out(params.bulk_out_addr, &request, params.timeout) {
            log::debug!("usbtmc REQUEST_DEV_DEP_MSG_IN bulk_out failed: {e}");
            if params.auto_abort {
                let _ = control::abort_bulk_out(io, btag, params.bulk_out_addr, params.timeout);
            }
            return Err(e);
        }

        let read_len = misc::IOBUFFER.min(scratch.len());
        let actual = match io.bulk_in(
            params.bulk_in_addr,
            &mut scratch[..read_len],
            params.timeout,
        ) {
            Ok(a) => a,
            Err(e) => {
                log::debug!("usbtmc bulk_in failed: {e}");
                if params.auto_abort {
                    let _ = control::abort_bulk_in(
                        io,
                        btag,
                        params.bulk_in_addr,
                        params.bulk_in_max_packet,
                        params.timeout,
                    );
                }
                return Err(e);
            }
        };

        if actual < misc::USBTMC_HEADER_SIZE {
            return Err(Error::StatusUnexpectedFailure);
        }

        let header = decode_header(&scratch[..actual]);
        btag.record_in(header.btag);
        let n_characters = header.transfer_size as usize;

        let avail = actual - misc::USBTMC_HEADER_SIZE;
        let copy_len = n_characters.min(avail).min(n - done);
        out_buf[done..done + copy_len].copy_from_slice(
            &scratch[misc::USBTMC_HEADER_SIZE..misc::USBTMC_HEADER_SIZE + copy_len],
        );
        done += n_characters.min(n - done);

        if n_characters < misc::IOBUFFER - misc::USBTMC_HEADER_SIZE {
            break;
        }
    }

    if params.add_nl_on_read && done < n {
        out_buf[done] = b'\n';
        done += 1;
    }

    if done < n {
        *eof_sticky = true;
    }

    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fake::FakeEndpoint;

    #[test]
    fn out_header_btag_inverse_invariant() {
        let header = encode_dev_dep_msg_out_header(5, 10, true);
        assert_eq!(header[2], !header[1]);
    }

    #[test]
    fn decode_encode_dev_dep_msg_out_round_trip() {
        let payload = b"*IDN?\n";
        let packet = encode_dev_dep_msg_out(7, payload, true);
        let decoded = decode_header(&packet);
        assert_eq!(decoded.btag, 7);
        assert_eq!(decoded.transfer_size as usize, payload.len());
        assert_eq!(decoded.bm_transfer_attributes & 1, 1);
        assert_eq!(&packet[12..12 + payload.len()], payload);
    }

    #[test]
    fn packet_length_always_multiple_of_four() {
        for len in 0..20usize {
            let payload = vec![0xAA; len];
            let packet = encode_dev_dep_msg_out(1, &payload, true);
            assert_eq!(packet.len() % 4, 0);
        }
    }

    #[test]
    fn zero_byte_write_emits_one_packet_eom_set() {
        let io = FakeEndpoint::new();
        let btag = BTag::new();
        let params = WriteParams {
            bulk_out_addr: 0x01,
            timeout: Duration::from_secs(1),
            auto_abort: false,
            rem_nl_on_write: false,
        };
        let n = write_message(&io, &btag, &[], &params).unwrap();
        assert_eq!(n, 0);
        let log = io.bulk_out_log.lock().unwrap();
        assert_eq!(log.len(), 1);
        let header = decode_header(&log[0]);
        assert_eq!(header.transfer_size, 0);
        assert_eq!(header.bm_transfer_attributes & 1, 1);
    }

    #[test]
    fn write_failure_with_auto_abort_issues_abort_bulk_out_and_surfaces_original_error() {
        let io = FakeEndpoint::new();
        let btag = BTag::new();
        *io.fail_next_bulk_out.lock().unwrap() = true;
        io.push_control(vec![crate::constants::usbtmc_status::STATUS_SUCCESS, 0]);
        io.push_control({
            let mut buf = vec![0u8; 8];
            buf[0] = crate::constants::usbtmc_status::STATUS_SUCCESS;
            buf
        });
        let params = WriteParams {
            bulk_out_addr: 0x01,
            timeout: Duration::from_secs(1),
            auto_abort: true,
            rem_nl_on_write: false,
        };
        let err = write_message(&io, &btag, b"*IDN?\n", &params).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        let control_calls = io.control_log.lock().unwrap();
        assert_eq!(
            control_calls[0].b_request,
            crate::constants::control_requests::INITIATE_ABORT_BULK_OUT
        );
        assert_eq!(control_calls[0].w_value, 1);
    }

    #[test]
    fn write_exact_chunk_capacity_emits_single_unpadded_packet() {
        let io = FakeEndpoint::new();
        let btag = BTag::new();
        let params = WriteParams {
            bulk_out_addr: 0x01,
            timeout: Duration::from_secs(1),
            auto_abort: false,
            rem_nl_on_write: false,
        };
        let capacity = misc::IOBUFFER - misc::USBTMC_HEADER_SIZE;
        let data = vec![0x41u8; capacity];
        let n = write_message(&io, &btag, &data, &params).unwrap();
        assert_eq!(n, capacity);
        let log = io.bulk_out_log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].len(), capacity + misc::USBTMC_HEADER_SIZE);
        let header = decode_header(&log[0]);
        assert_eq!(header.bm_transfer_attributes & 1, 1);
    }

    #[test]
    fn write_one_over_chunk_capacity_splits_into_two_packets() {
        let io = FakeEndpoint::new();
        let btag = BTag::new();
        let params = WriteParams {
            bulk_out_addr: 0x01,
            timeout: Duration::from_secs(1),
            auto_abort: false,
            rem_nl_on_write: false,
        };
        let capacity = misc::IOBUFFER - misc::USBTMC_HEADER_SIZE;
        let data = vec![0x41u8; capacity + 1];
        let n = write_message(&io, &btag, &data, &params).unwrap();
        assert_eq!(n, capacity + 1);
        let log = io.bulk_out_log.lock().unwrap();
        assert_eq!(log.len(), 2);

        let first = decode_header(&log[0]);
        assert_eq!(first.transfer_size as usize, capacity);
        assert_eq!(first.bm_transfer_attributes & 1, 0);
        assert_eq!(log[0].len(), capacity + misc::USBTMC_HEADER_SIZE);

        let second = decode_header(&log[1]);
        assert_eq!(second.transfer_size, 1);
        assert_eq!(second.bm_transfer_attributes & 1, 1);
        assert_eq!(log[1].len(), 16); // 12 header + 1 payload + 3 pad
        assert!(second.btag > first.btag);
    }

    #[test]
    fn rem_nl_on_write_trims_trailing_newline_but_reports_full_length() {
        let io = FakeEndpoint::new();
        let btag = BTag::new();
        let params = WriteParams {
            bulk_out_addr: 0x01,
            timeout: Duration::from_secs(1),
            auto_abort: false,
            rem_nl_on_write: true,
        };
        let n = write_message(&io, &btag, b"ABC\n", &params).unwrap();
        assert_eq!(n, 4);
        let log = io.bulk_out_log.lock().unwrap();
        let header = decode_header(&log[0]);
        assert_eq!(header.transfer_size, 3);
        assert_eq!(&log[0][12..15], b"ABC");
    }

    #[test]
    fn idn_query_write_then_read_advances_btag_across_the_request() {
        let io = FakeEndpoint::new();
        let btag = BTag::new();
        let write_params = WriteParams {
            bulk_out_addr: 0x01,
            timeout: Duration::from_secs(1),
            auto_abort: false,
            rem_nl_on_write: false,
        };
        write_message(&io, &btag, b"*IDN?\n", &write_params).unwrap();

        let out_log = io.bulk_out_log.lock().unwrap();
        assert_eq!(out_log.len(), 1);
        let write_header = decode_header(&out_log[0]);
        assert_eq!(write_header.msg_id, bulk_msg_id::DEVICE_DEPENDENT_MSG_OUT);
        assert_eq!(write_header.btag, 1);
        assert_eq!(write_header.transfer_size, 6);
        assert_eq!(write_header.bm_transfer_attributes & 1, 1);
        assert_eq!(&out_log[0][12..18], b"*IDN?\n");
        assert_eq!(out_log[0].len(), 20); // 12 header + 6 payload + 2 pad
        drop(out_log);

        io.push_bulk_in(in_response(2, b"ACME,SCOPE1\n"));
        let mut scratch = vec![0u8; misc::IOBUFFER];
        let mut eof_sticky = false;
        let mut out = vec![0u8; 128];
        let read_params = read_params();
        let n = read_message(
            &io,
            &btag,
            &mut scratch,
            &mut eof_sticky,
            ReadMode::Fread,
            &mut out,
            &read_params,
        )
        .unwrap();
        assert_eq!(n, 12);
        assert_eq!(&out[..n], b"ACME,SCOPE1\n");

        let out_log = io.bulk_out_log.lock().unwrap();
        let request_header = decode_header(&out_log[1]);
        assert_eq!(
            request_header.msg_id,
            bulk_msg_id::REQUEST_DEVICE_DEPENDENT_MSG_IN
        );
        assert!(request_header.btag > write_header.btag);
    }

    fn in_response(btag: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; misc::USBTMC_HEADER_SIZE + payload.len()];
        buf[0] = bulk_msg_id::DEVICE_DEPENDENT_MSG_IN;
        buf[1] = btag;
        buf[2] = !btag;
        buf[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        buf[12..].copy_from_slice(payload);
        buf
    }

    fn read_params() -> ReadParams {
        ReadParams {
            bulk_in_addr: 0x82,
            bulk_out_addr: 0x01,
            bulk_in_max_packet: 64,
            timeout: Duration::from_secs(1),
            term_char_enabled: false,
            term_char: b'\n',
            add_nl_on_read: false,
            auto_abort: false,
        }
    }

    #[test]
    fn short_read_returns_exact_length_then_fread_eof() {
        let io = FakeEndpoint::new();
        io.push_bulk_in(in_response(2, b"hello"));
        let btag = BTag::new();
        let mut scratch = vec![0u8; misc::IOBUFFER];
        let mut eof_sticky = false;
        let mut out = vec![0u8; 128];
        let params = read_params();
        let done = read_message(
            &io,
            &btag,
            &mut scratch,
            &mut eof_sticky,
            ReadMode::Fread,
            &mut out,
            &params,
        )
        .unwrap();
        assert_eq!(done, 5);
        assert_eq!(&out[..5], b"hello");
        assert!(eof_sticky);

        let mut out2 = vec![0u8; 128];
        let done2 = read_message(
            &io,
            &btag,
            &mut scratch,
            &mut eof_sticky,
            ReadMode::Fread,
            &mut out2,
            &params,
        )
        .unwrap();
        assert_eq!(done2, 0);
        assert!(!eof_sticky);
    }

    #[test]
    fn add_nl_on_read_appends_newline_and_counts_it() {
        let io = FakeEndpoint::new();
        io.push_bulk_in(in_response(2, b"1.23"));
        let btag = BTag::new();
        let mut scratch = vec![0u8; misc::IOBUFFER];
        let mut eof_sticky = false;
        let mut out = vec![0u8; 8];
        let mut params = read_params();
        params.add_nl_on_read = true;
        let done = read_message(
            &io,
            &btag,
            &mut scratch,
            &mut eof_sticky,
            ReadMode::Fread,
            &mut out,
            &params,
        )
        .unwrap();
        assert_eq!(done, 5);
        assert_eq!(&out[..5], b"1.23\n");
    }
}
