//! Slot state record format
//!
//! One slot is stored as a single fixed-size record, written and read as one
//! contiguous block:
//!
//! ```text
//! offset  size  field
//! ------  ----  -----------------------------------------------
//!      0     4  magic            (SLOT_MAGIC)
//!      4     4  version          (SLOT_FORMAT_VERSION)
//!      8     4  length           (payload size, SLOT_PAYLOAD_SIZE)
//!     12     4  checksum         (CRC32 over the payload)
//!     16    64  name             (NUL padded)
//!     80     4  database         (0 = physical slot)
//!     84     4  persistency
//!     88     8  xmin
//!     96     8  catalog_xmin
//!    104     8  restart_lsn
//!    112     1  is_dummy_standby
//!    113     7  padding          (zero)
//! ```
//!
//! All integers are little-endian.

use byteorder::{ByteOrder, LittleEndian};
use replslot_core::types::NAME_DATA_LEN;
use replslot_core::{DatabaseId, Lsn, SlotData, SlotName, SlotPersistency, TransactionId};
use thiserror::Error;

/// Magic number identifying a slot state file
pub const SLOT_MAGIC: u32 = 0x0105_1CA1;

/// Current record format version
pub const SLOT_FORMAT_VERSION: u32 = 1;

/// Size of the version-independent header
pub const SLOT_HEADER_SIZE: usize = 16;

/// Size of the checksummed payload
pub const SLOT_PAYLOAD_SIZE: usize = NAME_DATA_LEN + 4 + 4 + 8 + 8 + 8 + 8;

/// Total record size
pub const SLOT_RECORD_SIZE: usize = SLOT_HEADER_SIZE + SLOT_PAYLOAD_SIZE;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_LENGTH: usize = 8;
const OFF_CHECKSUM: usize = 12;

// Payload offsets, relative to SLOT_HEADER_SIZE
const OFF_NAME: usize = 0;
const OFF_DATABASE: usize = NAME_DATA_LEN;
const OFF_PERSISTENCY: usize = OFF_DATABASE + 4;
const OFF_XMIN: usize = OFF_PERSISTENCY + 4;
const OFF_CATALOG_XMIN: usize = OFF_XMIN + 8;
const OFF_RESTART_LSN: usize = OFF_CATALOG_XMIN + 8;
const OFF_DUMMY: usize = OFF_RESTART_LSN + 8;

/// Record validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotRecordError {
    /// Buffer is not exactly one record long
    #[error("record has {0} bytes, expected one full record")]
    WrongSize(usize),

    /// Stored checksum does not match the payload
    #[error("checksum mismatch, is {computed}, should be {stored}")]
    ChecksumMismatch {
        /// Checksum found in the header
        stored: u32,
        /// Checksum computed over the payload
        computed: u32,
    },

    /// Header does not start with [`SLOT_MAGIC`]
    #[error("wrong magic {0:#x}")]
    BadMagic(u32),

    /// Declared payload length is not [`SLOT_PAYLOAD_SIZE`]
    #[error("corrupted length {0}")]
    BadLength(u32),

    /// Unknown format version
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),

    /// Payload passed the checksum but holds impossible values
    #[error("invalid payload: {0}")]
    BadPayload(String),
}

/// Encode a slot's persistent fields into a record.
pub fn encode_slot_record(data: &SlotData) -> Vec<u8> {
    let mut buf = vec![0u8; SLOT_RECORD_SIZE];

    {
        let payload = &mut buf[SLOT_HEADER_SIZE..];
        let name = data.name.as_str().as_bytes();
        // SlotName guarantees at most NAME_DATA_LEN - 1 bytes, leaving a NUL.
        payload[OFF_NAME..OFF_NAME + name.len()].copy_from_slice(name);
        LittleEndian::write_u32(
            &mut payload[OFF_DATABASE..],
            data.database.map(|db| db.raw()).unwrap_or(0),
        );
        LittleEndian::write_u32(&mut payload[OFF_PERSISTENCY..], data.persistency.to_raw());
        LittleEndian::write_u64(&mut payload[OFF_XMIN..], data.xmin.0);
        LittleEndian::write_u64(&mut payload[OFF_CATALOG_XMIN..], data.catalog_xmin.0);
        LittleEndian::write_u64(&mut payload[OFF_RESTART_LSN..], data.restart_lsn.0);
        payload[OFF_DUMMY] = u8::from(data.is_dummy_standby);
    }

    let checksum = crc32fast::hash(&buf[SLOT_HEADER_SIZE..]);
    LittleEndian::write_u32(&mut buf[OFF_MAGIC..], SLOT_MAGIC);
    LittleEndian::write_u32(&mut buf[OFF_VERSION..], SLOT_FORMAT_VERSION);
    LittleEndian::write_u32(&mut buf[OFF_LENGTH..], SLOT_PAYLOAD_SIZE as u32);
    LittleEndian::write_u32(&mut buf[OFF_CHECKSUM..], checksum);
    buf
}

/// Decode and validate a record.
///
/// Checks run in a fixed order: checksum, magic, length, version, then the
/// payload fields themselves.
pub fn decode_slot_record(bytes: &[u8]) -> Result<SlotData, SlotRecordError> {
    if bytes.len() != SLOT_RECORD_SIZE {
        return Err(SlotRecordError::WrongSize(bytes.len()));
    }

    let payload = &bytes[SLOT_HEADER_SIZE..];
    let stored = LittleEndian::read_u32(&bytes[OFF_CHECKSUM..]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(SlotRecordError::ChecksumMismatch { stored, computed });
    }

    let magic = LittleEndian::read_u32(&bytes[OFF_MAGIC..]);
    if magic != SLOT_MAGIC {
        return Err(SlotRecordError::BadMagic(magic));
    }

    let length = LittleEndian::read_u32(&bytes[OFF_LENGTH..]);
    if length as usize != SLOT_PAYLOAD_SIZE {
        return Err(SlotRecordError::BadLength(length));
    }

    let version = LittleEndian::read_u32(&bytes[OFF_VERSION..]);
    if version != SLOT_FORMAT_VERSION {
        return Err(SlotRecordError::UnsupportedVersion(version));
    }

    decode_payload(payload)
}

fn decode_payload(payload: &[u8]) -> Result<SlotData, SlotRecordError> {
    let name_field = &payload[OFF_NAME..OFF_NAME + NAME_DATA_LEN];
    let name_len = name_field
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| SlotRecordError::BadPayload("name is not terminated".into()))?;
    let name = std::str::from_utf8(&name_field[..name_len])
        .map_err(|_| SlotRecordError::BadPayload("name is not UTF-8".into()))?;
    let name = SlotName::new(name).map_err(|e| SlotRecordError::BadPayload(e.to_string()))?;

    let raw_persistency = LittleEndian::read_u32(&payload[OFF_PERSISTENCY..]);
    let persistency = SlotPersistency::from_raw(raw_persistency).ok_or_else(|| {
        SlotRecordError::BadPayload(format!("unknown persistency {}", raw_persistency))
    })?;

    let is_dummy_standby = match payload[OFF_DUMMY] {
        0 => false,
        1 => true,
        other => {
            return Err(SlotRecordError::BadPayload(format!(
                "dummy standby flag {}",
                other
            )))
        }
    };

    Ok(SlotData {
        name,
        persistency,
        database: DatabaseId::new(LittleEndian::read_u32(&payload[OFF_DATABASE..])),
        xmin: TransactionId(LittleEndian::read_u64(&payload[OFF_XMIN..])),
        catalog_xmin: TransactionId(LittleEndian::read_u64(&payload[OFF_CATALOG_XMIN..])),
        restart_lsn: Lsn(LittleEndian::read_u64(&payload[OFF_RESTART_LSN..])),
        is_dummy_standby,
    })
}
