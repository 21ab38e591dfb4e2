//! Alloy-backed bridge gateway

use std::borrow::Cow;
use std::str::FromStr;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, B256, U256, U64},
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionReceipt,
    signers::local::PrivateKeySigner,
    sol,
    transports::http::Http,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{BridgedToken, ChainConfig, ChainContracts};
use crate::error::{BonderResult, ConfigError, GatewayError, TransactionError};
use crate::gateway::{BridgeGateway, CommitOutcome, SendRequest};
use crate::types::{BondedRoot, ChainSlug, CommittedRoot, TransferBondInfo, TxOutcome};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract L1Bridge {
        event TransferRootBonded(bytes32 indexed root, uint256 amount);

        function governance() external view returns (address);
        function getIsBonder(address maybeBonder) external view returns (bool);
        function getCredit(address bonder) external view returns (uint256);
        function minBonderBps() external view returns (uint256);
        function minBonderFeeAbsolute() external view returns (uint256);
        function challengePeriod() external view returns (uint256);
        function challengeResolutionPeriod() external view returns (uint256);
        function getChallengeAmountForTransferAmount(uint256 amount) external view returns (uint256);
        function getBondForTransferAmount(uint256 amount) external view returns (uint256);
        function getTransferRootId(bytes32 rootHash, uint256 totalAmount) external pure returns (bytes32);
        function transferRootCommittedAt(bytes32 transferRootId) external view returns (uint256);
        function transferBonds(bytes32 transferRootId) external view returns (
            address bonder,
            uint256 createdAt,
            uint256 totalAmount,
            uint256 challengeStartTime,
            address challenger,
            bool challengeResolved
        );
        function isChainIdPaused(uint256 chainId) external view returns (bool);
        function crossDomainMessengerWrappers(uint256 chainId) external view returns (address);

        function sendToL2(
            uint256 chainId,
            address recipient,
            uint256 amount,
            uint256 amountOutMin,
            uint256 deadline,
            address relayer,
            uint256 relayerFee
        ) external payable;
        function bondTransferRoot(bytes32 rootHash, uint256 destinationChainId, uint256 totalAmount) external;
        function challengeTransferBond(bytes32 rootHash, uint256 originalAmount) external payable;
        function resolveChallenge(bytes32 rootHash, uint256 originalAmount) external;
        function stake(address bonder, uint256 amount) external payable;
        function setChallengePeriodAndTimeSlotSize(uint256 challengePeriod, uint256 timeSlotSize) external;
        function setChallengeResolutionPeriod(uint256 challengeResolutionPeriod) external;
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract L2Bridge {
        event TransfersCommitted(
            uint256 indexed destinationChainId,
            bytes32 indexed rootHash,
            uint256 totalAmount,
            uint256 rootCommittedAt
        );

        function l1Governance() external view returns (address);
        function getIsBonder(address maybeBonder) external view returns (bool);
        function getCredit(address bonder) external view returns (uint256);
        function minBonderBps() external view returns (uint256);
        function minBonderFeeAbsolute() external view returns (uint256);
        function maxPendingTransfers() external view returns (uint256);
        function pendingTransferIdsForChainId(uint256 chainId, uint256 index) external view returns (bytes32);
        function pendingAmountForChainId(uint256 chainId) external view returns (uint256);

        function commitTransfers(uint256 destinationChainId) external;
        function stake(address bonder, uint256 amount) external payable;
        function setMaxPendingTransfers(uint256 maxPendingTransfers) external;
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract L2AmmWrapper {
        function swapAndSend(
            uint256 chainId,
            address recipient,
            uint256 amount,
            uint256 bonderFee,
            uint256 amountOutMin,
            uint256 deadline,
            uint256 destinationAmountOutMin,
            uint256 destinationDeadline
        ) external payable;
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract ERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

type HttpTransport = Http<reqwest::Client>;

/// Send a contract call, wait for its receipt and check the status.
macro_rules! submit {
    ($gateway:expr, $call:expr, $builder:expr) => {{
        let pending = $builder
            .send()
            .await
            .map_err(|e| TransactionError::SubmissionFailed(format!("{}: {e}", $call)))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| TransactionError::Dropped(format!("{}: {e}", $call)))?;
        $gateway.check_receipt($call, receipt)?
    }};
}

/// Contract handles for one chain, shaped by the chain's role
enum BridgeContracts<P> {
    Home(L1Bridge::L1BridgeInstance<HttpTransport, P>),
    Secondary {
        bridge: L2Bridge::L2BridgeInstance<HttpTransport, P>,
        amm_wrapper: L2AmmWrapper::L2AmmWrapperInstance<HttpTransport, P>,
    },
}

/// Gateway to one chain's bridge over JSON-RPC
pub struct AlloyGateway<P> {
    chain: ChainSlug,
    chain_id: u64,
    identity: Address,
    contracts: BridgeContracts<P>,
    /// `None` when the bridged token is the native coin
    token: Option<ERC20::ERC20Instance<HttpTransport, P>>,
    spender: Address,
    provider: P,
}

/// Only the fields of `eth_getBlockByNumber` we use
#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: U64,
}

impl<P: Provider<HttpTransport> + Clone> AlloyGateway<P> {
    pub fn new(config: &ChainConfig, identity: Address, provider: P) -> Self {
        // sends leave a secondary chain through the wrapper, which pulls the tokens
        let spender = match config.contracts {
            ChainContracts::Home { bridge } => bridge,
            ChainContracts::Secondary { amm_wrapper, .. } => amm_wrapper,
        };
        let token = match config.token {
            BridgedToken::Native => None,
            BridgedToken::Erc20(address) => Some(ERC20::new(address, provider.clone())),
        };
        let contracts = match config.contracts {
            ChainContracts::Home { bridge } => {
                BridgeContracts::Home(L1Bridge::new(bridge, provider.clone()))
            }
            ChainContracts::Secondary {
                bridge,
                amm_wrapper,
            } => BridgeContracts::Secondary {
                bridge: L2Bridge::new(bridge, provider.clone()),
                amm_wrapper: L2AmmWrapper::new(amm_wrapper, provider.clone()),
            },
        };

        Self {
            chain: config.slug,
            chain_id: config.chain_id,
            identity,
            contracts,
            token,
            spender,
            provider,
        }
    }

    /// Call value for a write moving `amount`: the amount itself for the
    /// native coin, nothing for an ERC20.
    fn call_value(&self, amount: U256) -> U256 {
        if self.token.is_some() {
            U256::ZERO
        } else {
            amount
        }
    }

    fn home(&self, call: &'static str) -> BonderResult<&L1Bridge::L1BridgeInstance<HttpTransport, P>> {
        match &self.contracts {
            BridgeContracts::Home(bridge) => Ok(bridge),
            BridgeContracts::Secondary { .. } => Err(self.unsupported(call)),
        }
    }

    fn secondary(
        &self,
        call: &'static str,
    ) -> BonderResult<&L2Bridge::L2BridgeInstance<HttpTransport, P>> {
        match &self.contracts {
            BridgeContracts::Secondary { bridge, .. } => Ok(bridge),
            BridgeContracts::Home(_) => Err(self.unsupported(call)),
        }
    }

    fn unsupported(&self, call: &'static str) -> crate::error::BonderError {
        GatewayError::Unsupported {
            chain: self.chain.to_string(),
            call,
        }
        .into()
    }

    /// Map a failed contract call. A JSON-RPC error response is a revert;
    /// everything else is a transport problem.
    fn call_error(&self, call: &'static str, err: alloy::contract::Error) -> crate::error::BonderError {
        match &err {
            alloy::contract::Error::TransportError(e) if e.is_error_resp() => {
                GatewayError::CallReverted {
                    chain: self.chain.to_string(),
                    call,
                    message: err.to_string(),
                }
                .into()
            }
            alloy::contract::Error::AbiError(_) => GatewayError::Decode {
                call,
                message: err.to_string(),
            }
            .into(),
            _ => self.rpc_error(err),
        }
    }

    fn rpc_error(&self, err: impl std::fmt::Display) -> crate::error::BonderError {
        GatewayError::Rpc {
            chain: self.chain.to_string(),
            message: err.to_string(),
        }
        .into()
    }

    /// Check the status of a mined write.
    fn check_receipt(
        &self,
        call: &'static str,
        receipt: TransactionReceipt,
    ) -> BonderResult<TransactionReceipt> {
        if !receipt.status() {
            return Err(TransactionError::Reverted {
                tx_hash: receipt.transaction_hash,
            }
            .into());
        }

        info!(
            chain = %self.chain,
            call,
            tx_hash = %receipt.transaction_hash,
            block_number = receipt.block_number.unwrap_or(0),
            gas_used = receipt.gas_used as u64,
            "Transaction confirmed"
        );
        Ok(receipt)
    }
}

fn outcome(receipt: &TransactionReceipt) -> TxOutcome {
    TxOutcome {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number.unwrap_or(0),
        gas_used: receipt.gas_used as u64,
    }
}

fn to_u64(call: &'static str, value: U256) -> BonderResult<u64> {
    u64::try_from(value).map_err(|e| {
        GatewayError::Decode {
            call,
            message: e.to_string(),
        }
        .into()
    })
}

#[async_trait]
impl<P> BridgeGateway for AlloyGateway<P>
where
    P: Provider<HttpTransport> + Clone + 'static,
{
    fn chain(&self) -> ChainSlug {
        self.chain
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn identity(&self) -> Address {
        self.identity
    }

    fn native_token(&self) -> bool {
        self.token.is_none()
    }

    fn token_spender(&self) -> Address {
        self.spender
    }

    async fn gas_price(&self) -> BonderResult<U256> {
        let price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| self.rpc_error(e))?;
        Ok(U256::from(price))
    }

    async fn block_number(&self) -> BonderResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| self.rpc_error(e))
    }

    async fn block_timestamp(&self) -> BonderResult<u64> {
        let block: Option<BlockHeader> = self
            .provider
            .raw_request(Cow::Borrowed("eth_getBlockByNumber"), ("latest", false))
            .await
            .map_err(|e| self.rpc_error(e))?;
        let block = block.ok_or_else(|| self.rpc_error("latest block not available"))?;
        Ok(block.timestamp.to::<u64>())
    }

    async fn min_bonder_bps(&self) -> BonderResult<U256> {
        const CALL: &str = "minBonderBps";
        let result = match &self.contracts {
            BridgeContracts::Home(bridge) => bridge.minBonderBps().call().await.map(|r| r._0),
            BridgeContracts::Secondary { bridge, .. } => {
                bridge.minBonderBps().call().await.map(|r| r._0)
            }
        };
        result.map_err(|e| self.call_error(CALL, e))
    }

    async fn min_bonder_fee_absolute(&self) -> BonderResult<U256> {
        const CALL: &str = "minBonderFeeAbsolute";
        let result = match &self.contracts {
            BridgeContracts::Home(bridge) => {
                bridge.minBonderFeeAbsolute().call().await.map(|r| r._0)
            }
            BridgeContracts::Secondary { bridge, .. } => {
                bridge.minBonderFeeAbsolute().call().await.map(|r| r._0)
            }
        };
        result.map_err(|e| self.call_error(CALL, e))
    }

    async fn challenge_period(&self) -> BonderResult<u64> {
        const CALL: &str = "challengePeriod";
        let period = self
            .home(CALL)?
            .challengePeriod()
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0;
        to_u64(CALL, period)
    }

    async fn challenge_resolution_period(&self) -> BonderResult<u64> {
        const CALL: &str = "challengeResolutionPeriod";
        let period = self
            .home(CALL)?
            .challengeResolutionPeriod()
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0;
        to_u64(CALL, period)
    }

    async fn challenge_amount_for_transfer_amount(&self, amount: U256) -> BonderResult<U256> {
        const CALL: &str = "getChallengeAmountForTransferAmount";
        Ok(self
            .home(CALL)?
            .getChallengeAmountForTransferAmount(amount)
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0)
    }

    async fn credit(&self, bonder: Address) -> BonderResult<U256> {
        const CALL: &str = "getCredit";
        let result = match &self.contracts {
            BridgeContracts::Home(bridge) => bridge.getCredit(bonder).call().await.map(|r| r._0),
            BridgeContracts::Secondary { bridge, .. } => {
                bridge.getCredit(bonder).call().await.map(|r| r._0)
            }
        };
        result.map_err(|e| self.call_error(CALL, e))
    }

    async fn bond_for_transfer_amount(&self, amount: U256) -> BonderResult<U256> {
        const CALL: &str = "getBondForTransferAmount";
        Ok(self
            .home(CALL)?
            .getBondForTransferAmount(amount)
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0)
    }

    async fn transfer_root_committed_at(&self, transfer_root_id: B256) -> BonderResult<u64> {
        const CALL: &str = "transferRootCommittedAt";
        let at = self
            .home(CALL)?
            .transferRootCommittedAt(transfer_root_id)
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0;
        to_u64(CALL, at)
    }

    async fn transfer_root_id(&self, root_hash: B256, total_amount: U256) -> BonderResult<B256> {
        const CALL: &str = "getTransferRootId";
        Ok(self
            .home(CALL)?
            .getTransferRootId(root_hash, total_amount)
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0)
    }

    async fn transfer_bond(&self, transfer_root_id: B256) -> BonderResult<TransferBondInfo> {
        const CALL: &str = "transferBonds";
        let bond = self
            .home(CALL)?
            .transferBonds(transfer_root_id)
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?;

        Ok(TransferBondInfo {
            bonder: bond.bonder,
            created_at: to_u64(CALL, bond.createdAt)?,
            total_amount: bond.totalAmount,
            challenge_start_time: to_u64(CALL, bond.challengeStartTime)?,
            challenger: bond.challenger,
            challenge_resolved: bond.challengeResolved,
        })
    }

    async fn max_pending_transfers(&self) -> BonderResult<u64> {
        const CALL: &str = "maxPendingTransfers";
        let max = self
            .secondary(CALL)?
            .maxPendingTransfers()
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0;
        to_u64(CALL, max)
    }

    async fn pending_transfer_id(
        &self,
        destination_chain_id: u64,
        index: u64,
    ) -> BonderResult<B256> {
        const CALL: &str = "pendingTransferIdsForChainId";
        Ok(self
            .secondary(CALL)?
            .pendingTransferIdsForChainId(U256::from(destination_chain_id), U256::from(index))
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0)
    }

    async fn pending_amount(&self, destination_chain_id: u64) -> BonderResult<U256> {
        const CALL: &str = "pendingAmountForChainId";
        Ok(self
            .secondary(CALL)?
            .pendingAmountForChainId(U256::from(destination_chain_id))
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0)
    }

    async fn is_chain_id_paused(&self, chain_id: u64) -> BonderResult<bool> {
        const CALL: &str = "isChainIdPaused";
        Ok(self
            .home(CALL)?
            .isChainIdPaused(U256::from(chain_id))
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0)
    }

    async fn cross_domain_messenger_wrapper(&self, chain_id: u64) -> BonderResult<Address> {
        const CALL: &str = "crossDomainMessengerWrappers";
        Ok(self
            .home(CALL)?
            .crossDomainMessengerWrappers(U256::from(chain_id))
            .call()
            .await
            .map_err(|e| self.call_error(CALL, e))?
            ._0)
    }

    async fn is_bonder(&self, address: Address) -> BonderResult<bool> {
        const CALL: &str = "getIsBonder";
        let result = match &self.contracts {
            BridgeContracts::Home(bridge) => bridge.getIsBonder(address).call().await.map(|r| r._0),
            BridgeContracts::Secondary { bridge, .. } => {
                bridge.getIsBonder(address).call().await.map(|r| r._0)
            }
        };
        result.map_err(|e| self.call_error(CALL, e))
    }

    async fn governance(&self) -> BonderResult<Address> {
        match &self.contracts {
            BridgeContracts::Home(bridge) => bridge
                .governance()
                .call()
                .await
                .map(|r| r._0)
                .map_err(|e| self.call_error("governance", e)),
            BridgeContracts::Secondary { bridge, .. } => bridge
                .l1Governance()
                .call()
                .await
                .map(|r| r._0)
                .map_err(|e| self.call_error("l1Governance", e)),
        }
    }

    async fn token_balance(&self, owner: Address) -> BonderResult<U256> {
        match &self.token {
            Some(token) => Ok(token
                .balanceOf(owner)
                .call()
                .await
                .map_err(|e| self.call_error("balanceOf", e))?
                ._0),
            None => self
                .provider
                .get_balance(owner)
                .await
                .map_err(|e| self.rpc_error(e)),
        }
    }

    async fn allowance(&self, owner: Address, spender: Address) -> BonderResult<U256> {
        let Some(token) = &self.token else {
            return Ok(U256::MAX);
        };
        Ok(token
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| self.call_error("allowance", e))?
            ._0)
    }

    async fn committed_roots(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> BonderResult<Vec<CommittedRoot>> {
        const CALL: &str = "TransfersCommitted";
        let events = self
            .secondary(CALL)?
            .TransfersCommitted_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query()
            .await
            .map_err(|e| self.call_error(CALL, e))?;

        events
            .into_iter()
            .map(|(event, log)| {
                Ok(CommittedRoot {
                    root_hash: event.rootHash,
                    destination_chain_id: to_u64(CALL, event.destinationChainId)?,
                    total_amount: event.totalAmount,
                    committed_at: to_u64(CALL, event.rootCommittedAt)?,
                    block_number: log.block_number.unwrap_or(from_block),
                })
            })
            .collect()
    }

    async fn bonded_roots(&self, from_block: u64, to_block: u64) -> BonderResult<Vec<BondedRoot>> {
        const CALL: &str = "TransferRootBonded";
        let events = self
            .home(CALL)?
            .TransferRootBonded_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query()
            .await
            .map_err(|e| self.call_error(CALL, e))?;

        Ok(events
            .into_iter()
            .map(|(event, log)| BondedRoot {
                root_hash: event.root,
                total_amount: event.amount,
                block_number: log.block_number.unwrap_or(from_block),
            })
            .collect())
    }

    async fn commitments_of(&self, root_hash: B256) -> BonderResult<Vec<CommittedRoot>> {
        const CALL: &str = "TransfersCommitted";
        let events = self
            .secondary(CALL)?
            .TransfersCommitted_filter()
            .topic2(root_hash)
            .from_block(0u64)
            .query()
            .await
            .map_err(|e| self.call_error(CALL, e))?;

        events
            .into_iter()
            .map(|(event, log)| {
                Ok(CommittedRoot {
                    root_hash: event.rootHash,
                    destination_chain_id: to_u64(CALL, event.destinationChainId)?,
                    total_amount: event.totalAmount,
                    committed_at: to_u64(CALL, event.rootCommittedAt)?,
                    block_number: log.block_number.unwrap_or(0),
                })
            })
            .collect()
    }

    async fn approve(&self, spender: Address, amount: U256) -> BonderResult<TxOutcome> {
        const CALL: &str = "approve";
        let Some(token) = &self.token else {
            return Err(self.unsupported(CALL));
        };
        let call = token.approve(spender, amount);
        let receipt = submit!(self, CALL, call);
        Ok(outcome(&receipt))
    }

    async fn send(&self, request: &SendRequest) -> BonderResult<TxOutcome> {
        let receipt = match (&self.contracts, request) {
            (
                BridgeContracts::Home(bridge),
                SendRequest::ToSecondary {
                    destination_chain_id,
                    recipient,
                    amount,
                    amount_out_min,
                    deadline,
                    relayer,
                    relayer_fee,
                },
            ) => {
                let call = bridge
                    .sendToL2(
                        U256::from(*destination_chain_id),
                        *recipient,
                        *amount,
                        *amount_out_min,
                        U256::from(*deadline),
                        *relayer,
                        *relayer_fee,
                    )
                    .value(self.call_value(*amount));
                submit!(self, "sendToL2", call)
            }
            (
                BridgeContracts::Secondary { amm_wrapper, .. },
                SendRequest::SwapAndSend {
                    destination_chain_id,
                    recipient,
                    amount,
                    bonder_fee,
                    amount_out_min,
                    deadline,
                    destination_amount_out_min,
                    destination_deadline,
                },
            ) => {
                let call = amm_wrapper
                    .swapAndSend(
                        U256::from(*destination_chain_id),
                        *recipient,
                        *amount,
                        *bonder_fee,
                        *amount_out_min,
                        U256::from(*deadline),
                        *destination_amount_out_min,
                        U256::from(*destination_deadline),
                    )
                    .value(self.call_value(*amount));
                submit!(self, "swapAndSend", call)
            }
            (BridgeContracts::Home(_), SendRequest::SwapAndSend { .. }) => {
                return Err(self.unsupported("swapAndSend"))
            }
            (BridgeContracts::Secondary { .. }, SendRequest::ToSecondary { .. }) => {
                return Err(self.unsupported("sendToL2"))
            }
        };
        Ok(outcome(&receipt))
    }

    async fn commit_transfers(&self, destination_chain_id: u64) -> BonderResult<CommitOutcome> {
        const CALL: &str = "commitTransfers";
        let call = self
            .secondary(CALL)?
            .commitTransfers(U256::from(destination_chain_id));
        let receipt = submit!(self, CALL, call);

        let root = receipt
            .inner
            .logs()
            .iter()
            .find_map(|log| log.log_decode::<L2Bridge::TransfersCommitted>().ok())
            .map(|log| {
                let event = log.inner.data;
                Ok::<_, crate::error::BonderError>(CommittedRoot {
                    root_hash: event.rootHash,
                    destination_chain_id: to_u64(CALL, event.destinationChainId)?,
                    total_amount: event.totalAmount,
                    committed_at: to_u64(CALL, event.rootCommittedAt)?,
                    block_number: receipt.block_number.unwrap_or(0),
                })
            })
            .transpose()?;

        debug!(chain = %self.chain, found_root = root.is_some(), "Commit receipt decoded");
        Ok(CommitOutcome {
            tx: outcome(&receipt),
            root,
        })
    }

    async fn bond_transfer_root(
        &self,
        root_hash: B256,
        destination_chain_id: u64,
        total_amount: U256,
    ) -> BonderResult<TxOutcome> {
        const CALL: &str = "bondTransferRoot";
        let call = self.home(CALL)?.bondTransferRoot(
            root_hash,
            U256::from(destination_chain_id),
            total_amount,
        );
        let receipt = submit!(self, CALL, call);
        Ok(outcome(&receipt))
    }

    async fn challenge_transfer_bond(
        &self,
        root_hash: B256,
        total_amount: U256,
        stake: U256,
    ) -> BonderResult<TxOutcome> {
        const CALL: &str = "challengeTransferBond";
        let call = self
            .home(CALL)?
            .challengeTransferBond(root_hash, total_amount)
            .value(self.call_value(stake));
        let receipt = submit!(self, CALL, call);
        Ok(outcome(&receipt))
    }

    async fn resolve_challenge(
        &self,
        root_hash: B256,
        total_amount: U256,
    ) -> BonderResult<TxOutcome> {
        const CALL: &str = "resolveChallenge";
        let call = self.home(CALL)?.resolveChallenge(root_hash, total_amount);
        let receipt = submit!(self, CALL, call);
        Ok(outcome(&receipt))
    }

    async fn stake(&self, bonder: Address, amount: U256) -> BonderResult<TxOutcome> {
        const CALL: &str = "stake";
        let receipt = match &self.contracts {
            BridgeContracts::Home(bridge) => {
                let call = bridge.stake(bonder, amount).value(self.call_value(amount));
                submit!(self, CALL, call)
            }
            // burns hop tokens on the secondary chain, never paid in value
            BridgeContracts::Secondary { bridge, .. } => {
                let call = bridge.stake(bonder, amount);
                submit!(self, CALL, call)
            }
        };
        Ok(outcome(&receipt))
    }

    async fn set_max_pending_transfers(&self, max: u64) -> BonderResult<TxOutcome> {
        const CALL: &str = "setMaxPendingTransfers";
        let call = self.secondary(CALL)?.setMaxPendingTransfers(U256::from(max));
        let receipt = submit!(self, CALL, call);
        Ok(outcome(&receipt))
    }

    async fn set_challenge_period_and_time_slot_size(
        &self,
        challenge_period: u64,
        time_slot_size: u64,
    ) -> BonderResult<TxOutcome> {
        const CALL: &str = "setChallengePeriodAndTimeSlotSize";
        let call = self.home(CALL)?.setChallengePeriodAndTimeSlotSize(
            U256::from(challenge_period),
            U256::from(time_slot_size),
        );
        let receipt = submit!(self, CALL, call);
        Ok(outcome(&receipt))
    }

    async fn set_challenge_resolution_period(&self, period: u64) -> BonderResult<TxOutcome> {
        const CALL: &str = "setChallengeResolutionPeriod";
        let call = self
            .home(CALL)?
            .setChallengeResolutionPeriod(U256::from(period));
        let receipt = submit!(self, CALL, call);
        Ok(outcome(&receipt))
    }
}

/// Create a provider with signer for the given chain
pub fn create_provider(
    rpc_url: &str,
    private_key: &str,
) -> Result<impl Provider<HttpTransport> + Clone, ConfigError> {
    let signer = signer_from_key(private_key)?;
    let wallet = EthereumWallet::from(signer);
    let url = rpc_url
        .parse()
        .map_err(|_| ConfigError::InvalidUrl(rpc_url.to_string()))?;

    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(wallet)
        .on_http(url);

    Ok(provider)
}

pub fn signer_from_key(private_key: &str) -> Result<PrivateKeySigner, ConfigError> {
    PrivateKeySigner::from_str(private_key.trim_start_matches("0x"))
        .map_err(|_| ConfigError::InvalidPrivateKey)
}

/// Connect a gateway for `config`, signing as the owner of `private_key`.
pub fn connect(
    config: &ChainConfig,
    private_key: &str,
) -> Result<AlloyGateway<impl Provider<HttpTransport> + Clone>, ConfigError> {
    let identity = signer_from_key(private_key)?.address();
    let provider = create_provider(&config.rpc_url, private_key)?;
    Ok(AlloyGateway::new(config, identity, provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_signer_from_key_accepts_prefix() {
        let with = signer_from_key(KEY).unwrap();
        let without = signer_from_key(KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(with.address(), without.address());
    }

    #[test]
    fn test_signer_from_key_rejects_garbage() {
        assert!(matches!(
            signer_from_key("not-a-key"),
            Err(ConfigError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn test_create_provider_rejects_bad_url() {
        assert!(matches!(
            create_provider("not a url", KEY),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    fn gateway(token: BridgedToken) -> AlloyGateway<impl Provider<HttpTransport> + Clone> {
        let config = ChainConfig {
            slug: ChainSlug::Optimism,
            chain_id: 420,
            rpc_url: "http://localhost:8545".into(),
            contracts: ChainContracts::Secondary {
                bridge: Address::repeat_byte(0x11),
                amm_wrapper: Address::repeat_byte(0x22),
            },
            token,
        };
        connect(&config, KEY).unwrap()
    }

    #[test]
    fn test_erc20_writes_carry_no_value() {
        let erc20 = gateway(BridgedToken::Erc20(Address::repeat_byte(0x33)));
        assert!(!erc20.native_token());
        assert_eq!(erc20.call_value(U256::from(500)), U256::ZERO);
        assert_eq!(erc20.token_spender(), Address::repeat_byte(0x22));

        let native = gateway(BridgedToken::Native);
        assert!(native.native_token());
        assert_eq!(native.call_value(U256::from(500)), U256::from(500));
    }

    #[test]
    fn test_to_u64_overflow_is_decode_error() {
        let err = to_u64("challengePeriod", U256::MAX).unwrap_err();
        assert_eq!(err.error_code(), "GATEWAY_ERROR");
        assert_eq!(to_u64("challengePeriod", U256::from(86_400)).unwrap(), 86_400);
    }
}
