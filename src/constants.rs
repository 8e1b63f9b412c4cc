//! ## Constants
//!
//! Various constants used throughout the project.
//!

#[allow(unused)]
pub mod usb {
    /// The class code for usbtmc
    pub const USBTMC_CLASS_CODE: u8 = 0xFE;
    /// The subclass code for usbtmc
    pub const USBTMC_SUBCLASS_CODE: u8 = 0x03;
    /// The protocol code for the USB488 subclass of usbtmc
    pub const USBTMC_PROTOCOL_CODE: u8 = 0x01;
}

#[allow(unused)]
pub mod misc {
    use std::time::Duration;

    /// The default timeout duration
    pub const DEFAULT_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
    /// Default timeout, in milliseconds, surfaced through the DEFAULT_TIMEOUT attribute
    pub const DEFAULT_TIMEOUT_MS: i32 = 5000;
    /// The size in bytes of a USBTMC header in a bulk transfer
    pub const USBTMC_HEADER_SIZE: usize = 12;
    /// Size of the per-session scratch buffer used to stage one framed message chunk
    pub const IOBUFFER: usize = 2048;
    /// Capacity of the process-wide minor-number registry
    pub const MINOR_NUMBERS: usize = 16;
    /// Iteration cap for abort/clear status-polling and drain loops
    pub const MAX_READS_TO_CLEAR_BULK_IN: usize = 10;
    /// Default termination character to use (using NI-VISA default '\n')
    pub const DEFAULT_TERM_CHAR: u8 = b'\n';
    /// Integer driver version surfaced through the VERSION attribute (1.1 -> 110)
    pub const DRIVER_VERSION: i32 = 110;
}

#[allow(unused)]
pub mod usbtmc_status {
    /// Success
    pub const STATUS_SUCCESS: u8 = 0x01;
    /// The device has received a split transaction CHECK_STATUS request and the request is being processed
    pub const STATUS_PENDING: u8 = 0x02;
    /// Failure; for ABORT_BULK_IN this specifically signals the FIFO was already empty
    pub const STATUS_FAILED: u8 = 0x81;
}

#[allow(unused)]
pub mod control_requests {
    pub const INITIATE_ABORT_BULK_OUT: u8 = 0x01;
    pub const CHECK_ABORT_BULK_OUT_STATUS: u8 = 0x02;
    pub const INITIATE_ABORT_BULK_IN: u8 = 0x03;
    pub const CHECK_ABORT_BULK_IN_STATUS: u8 = 0x04;
    pub const INITIATE_CLEAR: u8 = 0x05;
    pub const CHECK_CLEAR_STATUS: u8 = 0x06;
    pub const GET_CAPABILITIES: u8 = 0x07;
    pub const INDICATOR_PULSE: u8 = 0x40;
}

#[allow(unused)]
pub mod bulk_msg_id {
    pub const DEVICE_DEPENDENT_MSG_OUT: u8 = 1;
    pub const REQUEST_DEVICE_DEPENDENT_MSG_IN: u8 = 2;
    pub const DEVICE_DEPENDENT_MSG_IN: u8 = 2;
}
