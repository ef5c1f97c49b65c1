mod animal;
mod entity_id;
mod journal_entry;
mod metadata;
mod record;
mod sync_status;

pub use animal::{AnimalFilter, AnimalPatch, AnimalRecord, Species};
pub use entity_id::{EntityId, LOCAL_PREFIX};
pub use journal_entry::{JournalCategory, JournalEntry, JournalEntryPatch, JournalFilter};
pub use metadata::{Location, Metadata, Weather};
pub use record::{Record, RemoteRecord};
pub use sync_status::SyncStatus;
