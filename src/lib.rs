//! BLE calendar sync library
//! Discovers nearby peers over Bluetooth LE, keeps their identities stable
//! despite noisy names and signal readings, and exchanges a small calendar
//! payload over a hand-rolled chunked transfer protocol.

// Module declarations
pub mod bluetooth;
pub mod calendar;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod state;
pub mod transfer;
pub mod utils;

// Commonly used types at the crate root
pub use bluetooth::{PeerSnapshot, ScanState, SyncManager};
pub use calendar::{CalendarEntry, CalendarPayload, EntryStore, JsonFileStore};
pub use config::SyncConfig;
pub use error::SyncError;
pub use events::{BroadcastSink, CoreEvent, EventSink, LogSink};
pub use state::AppState;
pub use transfer::{TransferOutcome, TransferStatus};
