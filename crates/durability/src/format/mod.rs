//! On-disk byte formats.
//!
//! Serialization lives here, apart from the code that decides when and where
//! records are written, so the format can evolve on its own.
//!
//! # Module Structure
//!
//! - `slot_record`: fixed-size checksummed record holding one slot's
//!   persistent fields

pub mod slot_record;

pub use slot_record::{
    decode_slot_record, encode_slot_record, SlotRecordError, SLOT_FORMAT_VERSION,
    SLOT_HEADER_SIZE, SLOT_MAGIC, SLOT_PAYLOAD_SIZE, SLOT_RECORD_SIZE,
};
