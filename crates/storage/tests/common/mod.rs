pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::seeded_bytes;
#[allow(unused_imports)]
pub use mocks::InstrumentedStore;
