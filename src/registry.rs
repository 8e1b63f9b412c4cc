//! ## Registry
//!
//! A process-wide table mapping small integer "minor numbers" to attached
//! instrument sessions, mirroring the reference driver's minor-number
//! table without a kernel character device backing it. Populated at
//! [`crate::Session`] open and emptied at close; readers see a snapshot.
//!

use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};

use crate::constants::misc;
use crate::error::Error;

/// Identifying strings the registry keeps for enumeration and
/// `INSTRUMENT_DATA`, read once at attach time.
#[derive(Debug, Clone, Default)]
pub struct InstrumentMeta {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

fn table() -> &'static Mutex<BTreeMap<u32, InstrumentMeta>> {
    static TABLE: OnceLock<Mutex<BTreeMap<u32, InstrumentMeta>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(BTreeMap::new()))
}

/// Claim the lowest free minor number below [`misc::MINOR_NUMBERS`] and
/// record `meta` under it. Fails with `Error::Resource` when the table is
/// full.
pub fn attach(meta: InstrumentMeta) -> Result<u32, Error> {
    let mut table = table().lock().unwrap();
    let minor = (0..misc::MINOR_NUMBERS as u32).find(|n| !table.contains_key(n));
    match minor {
        Some(minor) => {
            table.insert(minor, meta);
            Ok(minor)
        }
        None => Err(Error::Resource),
    }
}

/// Remove `minor` from the registry, typically called from a session's
/// `Drop` impl.
pub fn detach(minor: u32) {
    table().lock().unwrap().remove(&minor);
}

/// Count of currently attached sessions, backing `NUM_INSTRUMENTS`.
pub fn instrument_count() -> usize {
    table().lock().unwrap().len()
}

/// The manufacturer/product/serial strings for `minor`, truncated to 199
/// bytes each as `INSTRUMENT_DATA` promises.
pub fn instrument_data(minor: u32) -> Result<(String, String, String), Error> {
    let table = table().lock().unwrap();
    let meta = table.get(&minor).ok_or_else(|| {
        Error::InvalidArgument(format!("no instrument attached at minor {minor}"))
    })?;
    Ok((
        truncate199(&meta.manufacturer),
        truncate199(&meta.product),
        truncate199(&meta.serial),
    ))
}

fn truncate199(s: &str) -> String {
    if s.len() <= 199 {
        s.to_string()
    } else {
        // Truncate on a char boundary at or before byte 199.
        let mut end = 199;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

/// Render the tab-separated enumeration table spec'd for the shared
/// registry session: a header row followed by one row per attached
/// instrument, ordered by minor number.
pub fn enumeration_table() -> String {
    let table = table().lock().unwrap();
    let mut out = String::from("Minor Number\tManufacturer\tProduct\tSerial Number\n");
    for (minor, meta) in table.iter() {
        out.push_str(&format!(
            "{minor:03}\t{}\t{}\t{}\n",
            meta.manufacturer, meta.product, meta.serial
        ));
    }
    out
}

/// One-shot-then-EOF reader over a snapshot of the enumeration table, per
/// the enumeration surface's read contract: a fresh snapshot is taken at
/// construction, and every read after the table has been fully drained
/// returns 0 until the consumer reopens (constructs a new session).
#[derive(Debug)]
pub struct EnumerationSession {
    remaining: Vec<u8>,
}

impl EnumerationSession {
    pub fn open() -> EnumerationSession {
        EnumerationSession {
            remaining: enumeration_table().into_bytes(),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&self.remaining[..n]);
        self.remaining.drain(..n);
        n
    }

    /// Writes to the enumeration session are never permitted.
    pub fn write(&mut self, _buf: &[u8]) -> Result<usize, Error> {
        Err(Error::NotPermitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Registry state is process-wide, so serialize these tests.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn reset() {
        table().lock().unwrap().clear();
    }

    #[test]
    fn attach_assigns_lowest_free_minor_and_detach_frees_it() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        let a = attach(InstrumentMeta {
            manufacturer: "Acme".into(),
            product: "Scope".into(),
            serial: "SN1".into(),
        })
        .unwrap();
        assert_eq!(a, 0);
        let b = attach(InstrumentMeta::default()).unwrap();
        assert_eq!(b, 1);
        detach(a);
        let c = attach(InstrumentMeta::default()).unwrap();
        assert_eq!(c, a);
        detach(b);
        detach(c);
    }

    #[test]
    fn enumeration_table_lists_attached_instruments_by_minor() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        attach(InstrumentMeta {
            manufacturer: "Acme".into(),
            product: "Scope".into(),
            serial: "SN1".into(),
        })
        .unwrap();
        let table_text = enumeration_table();
        assert!(table_text.starts_with("Minor Number\tManufacturer\tProduct\tSerial Number\n"));
        assert!(table_text.contains("000\tAcme\tScope\tSN1\n"));
        reset();
    }

    #[test]
    fn enumeration_session_reads_snapshot_then_returns_eof() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        attach(InstrumentMeta {
            manufacturer: "Acme".into(),
            product: "Scope".into(),
            serial: "SN1".into(),
        })
        .unwrap();
        let mut session = EnumerationSession::open();
        let mut buf = vec![0u8; 1024];
        let n = session.read(&mut buf);
        assert!(n > 0);
        let n2 = session.read(&mut buf);
        assert_eq!(n2, 0);
        assert!(matches!(session.write(b"x"), Err(Error::NotPermitted)));
        reset();
    }

    #[test]
    fn instrument_data_uses_each_string_own_length() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        let minor = attach(InstrumentMeta {
            manufacturer: "Acme".into(),
            product: "P".into(),
            serial: "SerialNumberLongerThanProduct".into(),
        })
        .unwrap();
        let (mfr, prod, serial) = instrument_data(minor).unwrap();
        assert_eq!(mfr, "Acme");
        assert_eq!(prod, "P");
        assert_eq!(serial, "SerialNumberLongerThanProduct");
        reset();
    }
}
