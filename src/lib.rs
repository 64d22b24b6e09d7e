//! Reverse-tip settlement relayer.
//!
//! Social interactions (likes, replies, recasts, quotes, follows) arrive as
//! webhooks, are checked against the author's tip configuration, queued, and
//! paid out on-chain in batches.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
