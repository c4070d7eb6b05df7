pub mod allocator;
pub mod backend;
pub mod clock;
pub mod error;
pub mod pattern;
pub mod store;
pub mod testing;

pub use allocator::{DEFAULT_MAX_ATTEMPTS, ID_ALPHABET, ID_LENGTH, IdAllocator};
pub use backend::{Backend, WriteTxn};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use pattern::{Pattern, SearchFilter};
pub use store::{DEFAULT_LOCK_TIMEOUT, RecordStore, RecordStoreBuilder, StoreConfig};

pub use imgup_core::{NewRecord, Record};
