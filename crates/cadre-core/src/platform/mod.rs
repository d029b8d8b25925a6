//! Platform Provider: the contract-only interface to the tracker/PR
//! platform (§6), and a fake test double.

pub mod fake;
pub mod trait_def;

pub use fake::FakePlatformProvider;
pub use trait_def::PlatformProvider;
