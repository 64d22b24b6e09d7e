//! Test doubles for the domain traits.

pub mod mocks;

pub use mocks::{
    MockChainClient, MockConfig, MockEventFilter, MockOracle, MockSettlementSink, MockTipStore,
    MockWorld, SentTransaction,
};
