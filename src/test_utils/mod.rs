//! Test doubles, compiled for unit tests and behind the `test-utils` feature.

pub mod mocks;

pub use mocks::{MockAccountSource, MockRewardsClient, RecordedCall};
