//! Solidity interfaces used by the settlement executor.

use alloy::primitives::{Address, address};

/// Canonical Multicall3 deployment (same address on every major EVM chain)
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

alloy::sol! {
    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
    }

    /// Batch payment contract and the address authors approve. Each `batchTip`
    /// leg is wrapped in try/catch on-chain, so a single failing transfer does
    /// not revert the call. It also exposes Multicall3's `aggregate3` ABI,
    /// callable only by executors, so strict aggregation spends the same
    /// approvals.
    interface ITipBatcher {
        function batchTip(
            address[] calldata froms,
            address[] calldata tos,
            address[] calldata tokens,
            uint256[] calldata amounts
        ) external;
        function isExecutor(address account) external view returns (bool);
    }

    /// Used as-is for read-only aggregation. The batch contract implements
    /// the same `aggregate3` selector for executor-only writes.
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Call3Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external
            payable
            returns (Call3Result[] memory returnData);
    }
}
