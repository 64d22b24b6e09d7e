//! Which account pulls author funds.

use alloy::primitives::Address;

/// The account that is `msg.sender` of every `transferFrom`, and so the
/// address authors must approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRoute {
    /// Executor-restricted batch contract. Every strategy calls through it.
    Contract(Address),
    /// The executor account itself. Only direct per-tip transfers work.
    Executor(Address),
}

impl TransferRoute {
    /// The batch contract when one is configured, the executor otherwise.
    /// With neither, the zero address stands in and no approval can match.
    #[must_use]
    pub fn resolve(batch_contract: Option<Address>, executor: Option<Address>) -> Self {
        match batch_contract {
            Some(contract) => Self::Contract(contract),
            None => Self::Executor(executor.unwrap_or(Address::ZERO)),
        }
    }

    /// Address that authors approve
    #[must_use]
    pub fn spender(&self) -> Address {
        match self {
            Self::Contract(address) | Self::Executor(address) => *address,
        }
    }

    #[must_use]
    pub fn contract(&self) -> Option<Address> {
        match self {
            Self::Contract(address) => Some(*address),
            Self::Executor(_) => None,
        }
    }
}

impl std::fmt::Display for TransferRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contract(address) => write!(f, "batch contract {address:#x}"),
            Self::Executor(address) => write!(f, "executor {address:#x}"),
        }
    }
}
