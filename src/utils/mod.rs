pub mod clock;
pub mod command;
pub mod crypto;
pub mod manifest;

// Trait-based abstractions for testability
pub mod executor;
pub mod database_ops;
pub mod redis_ops;
pub mod storage_ops;

// Re-export commonly used types and traits (used by test crate)
#[allow(unused_imports)]
pub use clock::{Clock, SystemClock};
#[allow(unused_imports)]
pub use executor::{CommandExecutor, RealExecutor};
#[allow(unused_imports)]
pub use database_ops::{DatabaseOperations, RealDatabaseOps};
#[allow(unused_imports)]
pub use redis_ops::{KeyValueOperations, RealRedisOps};
#[allow(unused_imports)]
pub use storage_ops::{ObjectStorageOperations, RealS3Ops};
