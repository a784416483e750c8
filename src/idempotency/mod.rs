pub mod cleanup;
pub mod clock;
pub mod key_generator;
pub mod records;
pub mod session;
pub mod stats;
pub mod store;

pub use cleanup::IdempotencyCleanupJob;
pub use clock::{Clock, ManualClock, SystemClock};
pub use key_generator::{KeyGenerator, KeyGeneratorConfig, RequestAttributes, UuidKeyGenerator};
pub use records::{KeyRecord, RecordKind, ResponseRecord};
pub use session::IdempotencySession;
pub use stats::{IdempotencyStats, StatsSnapshot};
pub use store::{IdempotencyStore, SweepReport, DEFAULT_RESPONSE_THRESHOLD_MS};
