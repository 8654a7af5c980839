//! Stock transactions domain module (event-sourced).
//!
//! Stock-in / stock-out records with a draft/submit lifecycle. On-hand
//! quantities are materialized by a projection from `RecordSubmitted` events;
//! nothing in this crate mutates stock levels directly.

pub mod code;
pub mod record;

pub use code::{StockDirection, TransactionCode};
pub use record::{
    DeleteRecord, DraftUpdated, OpenRecord, RecordDeleted, RecordOpened, RecordRestored,
    RecordStatus, RecordSubmitted, RestoreRecord, StockLine, StockRecord, StockRecordCommand,
    StockRecordEvent, StockRecordId, SubmitRecord, UpdateDraft,
};
