pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{driver, driver_with, policy, seeded_bytes, upload_config};
#[allow(unused_imports)]
pub use mocks::MemoryObjectApi;
