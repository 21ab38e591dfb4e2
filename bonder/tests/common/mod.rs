//! Common test utilities for integration tests

pub mod mock_bridge;

use std::sync::Arc;

use alloy::primitives::Address;

use hop_bonder::{AccountQueue, BridgeGateway, ChainSlug, Settlement};

pub use mock_bridge::{MockBridge, Submitted, SPENDER};

pub const BONDER: Address = Address::new([0xb0; 20]);
pub const RECIPIENT: Address = Address::new([0x42; 20]);

fn engine(home: &Arc<MockBridge>, optimism: &Arc<MockBridge>, arbitrum: &Arc<MockBridge>) -> Arc<Settlement> {
    let gateways = vec![
        home.clone() as Arc<dyn BridgeGateway>,
        optimism.clone() as Arc<dyn BridgeGateway>,
        arbitrum.clone() as Arc<dyn BridgeGateway>,
    ];
    let settlement = Settlement::new(gateways, AccountQueue::new(), "DAI", 300)
        .expect("home chain is configured");
    Arc::new(settlement)
}

/// Home chain plus two secondaries, all signing as [`BONDER`].
pub struct Harness {
    pub home: Arc<MockBridge>,
    pub optimism: Arc<MockBridge>,
    pub arbitrum: Arc<MockBridge>,
    pub settlement: Arc<Settlement>,
}

impl Harness {
    pub fn new() -> Self {
        let home = Arc::new(MockBridge::new(ChainSlug::Ethereum, BONDER));
        let optimism = Arc::new(MockBridge::new(ChainSlug::Optimism, BONDER));
        let arbitrum = Arc::new(MockBridge::new(ChainSlug::Arbitrum, BONDER));

        {
            let mut state = home.state.lock();
            state.bonders.insert(BONDER);
            for chain in [ChainSlug::Optimism, ChainSlug::Arbitrum] {
                state
                    .wrappers
                    .insert(chain.default_chain_id(), Address::repeat_byte(0x77));
            }
        }

        let settlement = engine(&home, &optimism, &arbitrum);
        Self {
            home,
            optimism,
            arbitrum,
            settlement,
        }
    }

    /// A fresh engine over the same chains, as after a process restart
    pub fn restarted(&self) -> Arc<Settlement> {
        engine(&self.home, &self.optimism, &self.arbitrum)
    }

    /// Total number of writes across every chain
    pub fn total_submitted(&self) -> usize {
        self.home.submitted().len()
            + self.optimism.submitted().len()
            + self.arbitrum.submitted().len()
    }
}
