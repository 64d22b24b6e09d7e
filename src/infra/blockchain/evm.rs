//! EVM JSON-RPC chain client built on alloy.
//!
//! Each method performs one logical RPC interaction. Pacing and retries are
//! applied by wrapping this client in a
//! [`GovernedChainClient`](super::governor::GovernedChainClient).

use std::str::FromStr;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument};

use super::contracts::{IERC20, IMulticall3, MULTICALL3_ADDRESS};
use crate::domain::{ChainClient, ChainError, ConfigError, ReceiptStatus};

/// Configuration for the EVM client
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Multicall3 deployment used for read-only aggregation
    pub multicall_address: Address,
    /// Headroom added on top of `eth_estimateGas`, in percent
    pub gas_limit_buffer_pct: u64,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 8453,
            multicall_address: MULTICALL3_ADDRESS,
            gas_limit_buffer_pct: 20,
        }
    }
}

/// Parse a hex private key (with or without `0x`) into a signer
pub fn signer_from_secret(secret: &SecretString) -> Result<PrivateKeySigner, ConfigError> {
    let raw = secret.expose_secret().trim();
    let clean = raw.strip_prefix("0x").unwrap_or(raw);
    if clean.len() != 64 {
        return Err(ConfigError::Invalid {
            key: "EXECUTOR_PRIVATE_KEY".to_string(),
            message: format!("expected 32 hex bytes, got {} characters", clean.len()),
        });
    }
    PrivateKeySigner::from_str(clean).map_err(|e| ConfigError::Invalid {
        key: "EXECUTOR_PRIVATE_KEY".to_string(),
        message: e.to_string(),
    })
}

/// HTTP chain client for a single RPC endpoint
pub struct EvmChainClient {
    provider: RootProvider<Http<Client>>,
    signer: Option<PrivateKeySigner>,
    config: EvmClientConfig,
    provider_name: String,
}

impl EvmChainClient {
    pub fn new(
        config: EvmClientConfig,
        signer: Option<PrivateKeySigner>,
    ) -> Result<Self, ConfigError> {
        let url = reqwest::Url::parse(&config.rpc_url).map_err(|e| ConfigError::Invalid {
            key: "RPC_URL".to_string(),
            message: e.to_string(),
        })?;
        let provider = ProviderBuilder::new().on_http(url);
        let provider_name = provider_label(&config.rpc_url);

        info!(
            provider = %provider_name,
            chain_id = config.chain_id,
            executor = ?signer.as_ref().map(|s| s.address()),
            "EVM chain client configured"
        );

        Ok(Self {
            provider,
            signer,
            config,
            provider_name,
        })
    }

    fn signer(&self) -> Result<&PrivateKeySigner, ChainError> {
        self.signer
            .as_ref()
            .ok_or_else(|| ChainError::Signing("no executor key configured".to_string()))
    }

    async fn eth_call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let mut tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata);
        if let Some(signer) = &self.signer {
            tx.from = Some(signer.address());
        }
        self.provider.call(&tx).await.map_err(rpc_error)
    }
}

/// Host part of the RPC URL, used as the provider label in logs.
/// Paths often carry API keys, so they are dropped.
fn provider_label(rpc_url: &str) -> String {
    reqwest::Url::parse(rpc_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "rpc".to_string())
}

fn rpc_error(err: impl std::fmt::Display) -> ChainError {
    ChainError::from_rpc_message(err.to_string())
}

fn decode_error(err: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(format!("failed to decode call result: {err}"))
}

/// Read legs for `allowance(owner, spender)` and `balanceOf(owner)`
fn funding_reads(token: Address, owner: Address, spender: Address) -> Vec<IMulticall3::Call3> {
    vec![
        IMulticall3::Call3 {
            target: token,
            allowFailure: false,
            callData: IERC20::allowanceCall { owner, spender }.abi_encode().into(),
        },
        IMulticall3::Call3 {
            target: token,
            allowFailure: false,
            callData: IERC20::balanceOfCall { owner }.abi_encode().into(),
        },
    ]
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn executor_address(&self) -> Option<Address> {
        self.signer.as_ref().map(PrivateKeySigner::address)
    }

    async fn health_check(&self) -> Result<(), ChainError> {
        self.provider.get_block_number().await.map_err(rpc_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn decimals(&self, token: Address) -> Result<u8, ChainError> {
        let raw = self
            .eth_call(token, IERC20::decimalsCall {}.abi_encode().into())
            .await?;
        let decoded = IERC20::decimalsCall::abi_decode_returns(&raw, true).map_err(decode_error)?;
        Ok(decoded._0)
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let call = IERC20::allowanceCall { owner, spender };
        let raw = self.eth_call(token, call.abi_encode().into()).await?;
        let decoded = IERC20::allowanceCall::abi_decode_returns(&raw, true).map_err(decode_error)?;
        Ok(decoded._0)
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        let raw = self
            .eth_call(token, IERC20::balanceOfCall { owner }.abi_encode().into())
            .await?;
        let decoded = IERC20::balanceOfCall::abi_decode_returns(&raw, true).map_err(decode_error)?;
        Ok(decoded._0)
    }

    /// Allowance and balance in one read-only `aggregate3` call
    async fn allowance_and_balance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<(U256, U256), ChainError> {
        let calls = funding_reads(token, owner, spender);
        let raw = self
            .eth_call(
                self.config.multicall_address,
                IMulticall3::aggregate3Call { calls }.abi_encode().into(),
            )
            .await?;
        let decoded =
            IMulticall3::aggregate3Call::abi_decode_returns(&raw, true).map_err(decode_error)?;

        let [allowance, balance] = decoded.returnData.as_slice() else {
            return Err(ChainError::Rpc(format!(
                "aggregate3 returned {} results, expected 2",
                decoded.returnData.len()
            )));
        };
        let allowance = IERC20::allowanceCall::abi_decode_returns(&allowance.returnData, true)
            .map_err(decode_error)?
            ._0;
        let balance = IERC20::balanceOfCall::abi_decode_returns(&balance.returnData, true)
            .map_err(decode_error)?
            ._0;
        Ok((allowance, balance))
    }

    async fn simulate(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        self.signer()?;
        self.eth_call(to, calldata).await
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        let executor = self.signer()?.address();
        self.provider
            .get_transaction_count(executor)
            .pending()
            .await
            .map_err(rpc_error)
    }

    #[instrument(skip(self, calldata), fields(to = %to, nonce))]
    async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
        nonce: u64,
    ) -> Result<B256, ChainError> {
        let signer = self.signer()?;
        let gas_price = self.provider.get_gas_price().await.map_err(rpc_error)?;
        let priority_fee = (gas_price / 10).max(1);

        let mut tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata)
            .with_chain_id(self.config.chain_id)
            .with_nonce(nonce)
            .with_max_priority_fee_per_gas(priority_fee)
            .with_max_fee_per_gas(gas_price.saturating_mul(2).max(priority_fee));
        tx.from = Some(signer.address());

        let estimated = self.provider.estimate_gas(&tx).await.map_err(rpc_error)?;
        let gas_limit = estimated.saturating_mul(100 + self.config.gas_limit_buffer_pct) / 100;
        let tx = tx.with_gas_limit(gas_limit);

        let wallet = EthereumWallet::from(signer.clone());
        let envelope = tx
            .build(&wallet)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let pending = self
            .provider
            .send_raw_transaction(&envelope.encoded_2718())
            .await
            .map_err(rpc_error)?;
        let hash = *pending.tx_hash();

        debug!(tx_hash = %hash, gas_limit, "Transaction broadcast");
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(rpc_error)?;
        Ok(receipt.map(|r| {
            if r.status() {
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Reverted
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    #[test]
    fn test_signer_from_secret_accepts_prefixed_and_bare_hex() {
        let prefixed = signer_from_secret(&SecretString::from(TEST_KEY.to_string())).unwrap();
        let bare = signer_from_secret(&SecretString::from(TEST_KEY[2..].to_string())).unwrap();
        assert_eq!(prefixed.address(), bare.address());
    }

    #[test]
    fn test_signer_from_secret_rejects_wrong_length() {
        let err = signer_from_secret(&SecretString::from("0xdeadbeef".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_provider_label_hides_path() {
        assert_eq!(
            provider_label("https://base-mainnet.g.alchemy.com/v2/secret-key"),
            "base-mainnet.g.alchemy.com"
        );
        assert_eq!(provider_label("not a url"), "rpc");
    }

    #[test]
    fn test_executor_address_follows_signer() {
        let signer = signer_from_secret(&SecretString::from(TEST_KEY.to_string())).unwrap();
        let executor = signer.address();
        let client = EvmChainClient::new(EvmClientConfig::default(), Some(signer)).unwrap();
        assert_eq!(client.executor_address(), Some(executor));

        let client = EvmChainClient::new(EvmClientConfig::default(), None).unwrap();
        assert_eq!(client.executor_address(), None);
    }

    #[test]
    fn test_funding_reads_ask_about_the_given_spender() {
        let token = Address::repeat_byte(0x0c);
        let owner = Address::repeat_byte(0xa1);
        let spender = Address::repeat_byte(0xbc);

        let calls = funding_reads(token, owner, spender);

        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.target == token && !c.allowFailure));
        let allowance = IERC20::allowanceCall::abi_decode(&calls[0].callData, true).unwrap();
        assert_eq!(allowance.owner, owner);
        assert_eq!(allowance.spender, spender);
        let balance = IERC20::balanceOfCall::abi_decode(&calls[1].callData, true).unwrap();
        assert_eq!(balance.owner, owner);
    }
}
