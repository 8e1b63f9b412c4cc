//! ## Attribute store
//!
//! Named tunables a host can get/set on a [`crate::Session`], plus derived
//! read-only values. Replaces an ioctl-style untyped switch with a tagged
//! variant the caller constructs and the session matches on directly.
//!

use crate::constants::misc;
use crate::error::Error;
use crate::registry;
use crate::types::ReadMode;

/// The closed set of attribute identifiers a [`crate::Session`] understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeId {
    AutoAbortOnError,
    ReadMode,
    Timeout,
    TermCharEnabled,
    TermChar,
    AddNlOnRead,
    RemNlOnWrite,
    NumInstruments,
    MinorNumbers,
    SizeIoBuffer,
    DefaultTimeout,
    DebugMode,
    Version,
}

impl AttributeId {
    fn is_writable(self) -> bool {
        matches!(
            self,
            AttributeId::AutoAbortOnError
                | AttributeId::ReadMode
                | AttributeId::Timeout
                | AttributeId::TermCharEnabled
                | AttributeId::TermChar
                | AttributeId::AddNlOnRead
                | AttributeId::RemNlOnWrite
        )
    }
}

/// Attribute values are signed 32-bit integers on the wire; booleans and
/// enums are encoded as 0/1 at the session boundary.
pub type AttributeValue = i32;

const ON: AttributeValue = 1;
const OFF: AttributeValue = 0;

/// Mutable session fields the attribute store reads and writes. Lives
/// behind a single mutex on [`crate::Session`] so get/set cannot race the
/// message engine's use of the same fields mid-transfer.
#[derive(Debug, Clone)]
pub struct SessionAttributes {
    pub auto_abort: bool,
    pub read_mode: ReadMode,
    pub timeout_ms: i32,
    pub term_char_enabled: bool,
    pub term_char: u8,
    pub add_nl_on_read: bool,
    pub rem_nl_on_write: bool,
}

impl Default for SessionAttributes {
    fn default() -> Self {
        SessionAttributes {
            auto_abort: false,
            read_mode: ReadMode::Fread,
            timeout_ms: misc::DEFAULT_TIMEOUT_MS,
            term_char_enabled: false,
            term_char: misc::DEFAULT_TERM_CHAR,
            add_nl_on_read: false,
            rem_nl_on_write: false,
        }
    }
}

fn bool_value(flag: bool) -> AttributeValue {
    if flag {
        ON
    } else {
        OFF
    }
}

fn parse_bool(value: AttributeValue) -> Result<bool, Error> {
    match value {
        ON => Ok(true),
        OFF => Ok(false),
        _ => Err(Error::InvalidArgument(format!(
            "expected 0 or 1, got {value}"
        ))),
    }
}

/// Read `id` from `attrs`. Read-only derived attributes don't need session
/// state at all; `num_instruments` comes straight from the registry.
pub fn get(attrs: &SessionAttributes, id: AttributeId) -> AttributeValue {
    match id {
        AttributeId::AutoAbortOnError => bool_value(attrs.auto_abort),
        AttributeId::ReadMode => match attrs.read_mode {
            ReadMode::Fread => 0,
            ReadMode::Read => 1,
        },
        AttributeId::Timeout => attrs.timeout_ms,
        AttributeId::TermCharEnabled => bool_value(attrs.term_char_enabled),
        AttributeId::TermChar => attrs.term_char as AttributeValue,
        AttributeId::AddNlOnRead => bool_value(attrs.add_nl_on_read),
        AttributeId::RemNlOnWrite => bool_value(attrs.rem_nl_on_write),
        AttributeId::NumInstruments => registry::instrument_count() as AttributeValue,
        AttributeId::MinorNumbers => misc::MINOR_NUMBERS as AttributeValue,
        AttributeId::SizeIoBuffer => misc::IOBUFFER as AttributeValue,
        AttributeId::DefaultTimeout => misc::DEFAULT_TIMEOUT_MS,
        AttributeId::DebugMode => 0,
        AttributeId::Version => misc::DRIVER_VERSION,
    }
}

/// Write `value` to `id` in `attrs`. Rejects read-only ids and out-of-range
/// values with `InvalidArgument`, matching the attribute store's contract.
pub fn set(
    attrs: &mut SessionAttributes,
    id: AttributeId,
    value: AttributeValue,
) -> Result<(), Error> {
    if !id.is_writable() {
        return Err(Error::InvalidArgument(format!("{id:?} is read-only")));
    }

    match id {
        AttributeId::AutoAbortOnError => attrs.auto_abort = parse_bool(value)?,
        AttributeId::ReadMode => {
            attrs.read_mode = match value {
                0 => ReadMode::Fread,
                1 => ReadMode::Read,
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "read mode must be 0 (FREAD) or 1 (READ), got {value}"
                    )))
                }
            }
        }
        AttributeId::Timeout => {
            if value < 0 {
                return Err(Error::InvalidArgument(format!(
                    "timeout must be non-negative, got {value}"
                )));
            }
            attrs.timeout_ms = value;
        }
        AttributeId::TermCharEnabled => attrs.term_char_enabled = parse_bool(value)?,
        AttributeId::TermChar => {
            if !(0..=255).contains(&value) {
                return Err(Error::InvalidArgument(format!(
                    "term char must be 0..255, got {value}"
                )));
            }
            attrs.term_char = value as u8;
        }
        AttributeId::AddNlOnRead => attrs.add_nl_on_read = parse_bool(value)?,
        AttributeId::RemNlOnWrite => attrs.rem_nl_on_write = parse_bool(value)?,
        _ => unreachable!("read-only ids rejected above"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_timeout() {
        let mut attrs = SessionAttributes::default();
        set(&mut attrs, AttributeId::Timeout, 2500).unwrap();
        assert_eq!(get(&attrs, AttributeId::Timeout), 2500);
    }

    #[test]
    fn set_rejects_out_of_range_term_char() {
        let mut attrs = SessionAttributes::default();
        let err = set(&mut attrs, AttributeId::TermChar, 300).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn set_rejects_write_to_read_only_attribute() {
        let mut attrs = SessionAttributes::default();
        let err = set(&mut attrs, AttributeId::Version, 999).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn set_rejects_non_boolean_flag() {
        let mut attrs = SessionAttributes::default();
        let err = set(&mut attrs, AttributeId::AutoAbortOnError, 5).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn read_only_derived_attributes_report_constants() {
        let attrs = SessionAttributes::default();
        assert_eq!(
            get(&attrs, AttributeId::SizeIoBuffer),
            misc::IOBUFFER as i32
        );
        assert_eq!(get(&attrs, AttributeId::Version), misc::DRIVER_VERSION);
    }
}
