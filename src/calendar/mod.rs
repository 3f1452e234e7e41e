//! Calendar data model: entries, the shareable payload, the wire codec and
//! the persistence collaborator.

pub mod codec;
pub mod entry;
pub mod payload;
pub mod store;

pub use codec::{decode, encode};
pub use entry::CalendarEntry;
pub use payload::CalendarPayload;
pub use store::{EntryStore, JsonFileStore, MemoryStore};
