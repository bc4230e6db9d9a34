//! Core data model shared by the fetchers and the aggregator.

pub mod conversions;
pub mod token;

pub use token::{
    BalanceEntry, BalanceResult, InvalidSet, NetworkMode, QueryPayload, QueryTarget, Registry,
    TokenDescriptor,
};
