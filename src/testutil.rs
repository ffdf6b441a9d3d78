//! Shared test doubles: a scriptable in-memory ledger and transfer engine.

use alloy::primitives::{Address, Bytes, LogData, TxHash, B256, U256};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::{SolEvent, SolValue};
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::bridge::{TransferEngine, TransferPlan, TransferRef, TransferStatus};
use crate::contracts::TakeawayDeposit::Deposit;
use crate::contracts::TakeawayFactory::DepositContractCreated;
use crate::ledger::{LedgerClient, ReceiptStatus, TxReceipt};
use crate::relay::RelayError;

/// In-memory chain: a fixed set of logs, scripted `eth_call` responses, and
/// a record of every range queried and transaction sent.
pub struct FakeLedger {
    height: AtomicU64,
    logs: Mutex<Vec<Log>>,
    queried: Mutex<Vec<(u64, u64)>>,
    fail_logs: AtomicBool,
    calls: Mutex<HashMap<(Address, Vec<u8>), Vec<u8>>>,
    sent: Mutex<Vec<(Address, Bytes, U256)>>,
    revert_next: AtomicBool,
    tx_counter: AtomicU64,
}

impl FakeLedger {
    pub fn new(height: u64) -> Self {
        Self {
            height: AtomicU64::new(height),
            logs: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
            fail_logs: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            revert_next: AtomicBool::new(false),
            tx_counter: AtomicU64::new(0),
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Same logs and height, fresh query/send records.
    pub fn clone_logs(&self) -> Self {
        let clone = Self::new(self.height.load(Ordering::SeqCst));
        *clone.logs.lock().unwrap() = self.logs.lock().unwrap().clone();
        *clone.calls.lock().unwrap() = self.calls.lock().unwrap().clone();
        clone
    }

    pub fn push_contract_created(
        &self,
        block: u64,
        factory: Address,
        contract: Address,
        node: B256,
    ) {
        self.push_log(
            block,
            factory,
            vec![DepositContractCreated::SIGNATURE_HASH, contract.into_word()],
            node.as_slice().to_vec(),
        );
    }

    pub fn push_deposit(&self, block: u64, contract: Address, from: Address, amount: U256) {
        self.push_log(
            block,
            contract,
            vec![Deposit::SIGNATURE_HASH, from.into_word()],
            amount.to_be_bytes::<32>().to_vec(),
        );
    }

    fn push_log(&self, block: u64, address: Address, topics: Vec<B256>, data: Vec<u8>) {
        let mut logs = self.logs.lock().unwrap();
        let log_index = logs.len() as u64;
        logs.push(Log {
            inner: alloy::primitives::Log {
                address,
                data: LogData::new_unchecked(topics, Bytes::from(data)),
            },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(block),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0xcc)),
            transaction_index: Some(0),
            log_index: Some(log_index),
            removed: false,
        });
    }

    /// Every `[from, to]` range passed to `get_logs`, in call order.
    pub fn queried_ranges(&self) -> Vec<(u64, u64)> {
        self.queried.lock().unwrap().clone()
    }

    pub fn fail_get_logs(&self) {
        self.fail_logs.store(true, Ordering::SeqCst);
    }

    pub fn restore_get_logs(&self) {
        self.fail_logs.store(false, Ordering::SeqCst);
    }

    /// Script the return data for an `eth_call` to `to` with `calldata`.
    /// Calls with no scripted response fail.
    pub fn script_call(&self, to: Address, calldata: Vec<u8>, ret: Vec<u8>) {
        self.calls.lock().unwrap().insert((to, calldata), ret);
    }

    pub fn sent_transactions(&self) -> Vec<(Address, Bytes, U256)> {
        self.sent.lock().unwrap().clone()
    }

    /// The next sent transaction's receipt reports a revert.
    pub fn revert_next_transaction(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let from = filter.get_from_block().unwrap_or(0);
        let to = filter.get_to_block().unwrap_or(u64::MAX);
        self.queried.lock().unwrap().push((from, to));

        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(eyre!("scripted log query failure"));
        }

        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or(0);
                if block < from || block > to {
                    return false;
                }
                if !filter.address.matches(&log.inner.address) {
                    return false;
                }
                match log.inner.data.topics().first() {
                    Some(topic0) => filter.topics[0].matches(topic0),
                    None => filter.topics[0].is_empty(),
                }
            })
            .cloned()
            .collect())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let calls = self.calls.lock().unwrap();
        match calls.get(&(to, data.to_vec())) {
            Some(ret) => Ok(Bytes::from(ret.clone())),
            None => Err(eyre!("no scripted response for call to {to}")),
        }
    }

    async fn send_transaction(&self, to: Address, data: Bytes, value: U256) -> Result<TxHash> {
        self.sent.lock().unwrap().push((to, data, value));
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(B256::from(U256::from(n)))
    }

    async fn wait_for_receipt(&self, _tx_hash: TxHash) -> Result<TxReceipt> {
        let status = if self.revert_next.swap(false, Ordering::SeqCst) {
            ReceiptStatus::Reverted
        } else {
            ReceiptStatus::Included
        };
        Ok(TxReceipt {
            status,
            block_number: self.height.load(Ordering::SeqCst),
        })
    }
}

/// Scriptable transfer engine: routes exist only for scripted chain pairs,
/// and status queries replay a scripted sequence (empty means forever
/// pending).
#[derive(Default)]
pub struct FakeEngine {
    routes: Mutex<HashSet<(u64, u64)>>,
    statuses: Mutex<VecDeque<TransferStatus>>,
    plan_calls: AtomicU32,
    submit_calls: AtomicU32,
}

impl FakeEngine {
    pub fn script_plan(&self, from_chain_id: u64, to_chain_id: u64) {
        self.routes
            .lock()
            .unwrap()
            .insert((from_chain_id, to_chain_id));
    }

    pub fn script_statuses(&self, statuses: &[TransferStatus]) {
        self.statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    pub fn plan_calls(&self) -> u32 {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferEngine for FakeEngine {
    async fn plan(
        &self,
        from_chain_id: u64,
        to_chain_id: u64,
        amount: U256,
        to_address: Address,
    ) -> Result<Option<TransferPlan>> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        if !self
            .routes
            .lock()
            .unwrap()
            .contains(&(from_chain_id, to_chain_id))
        {
            return Ok(None);
        }
        Ok(Some(TransferPlan {
            tool: "fakebridge".to_string(),
            from_chain_id,
            to_chain_id,
            tx_to: to_address,
            tx_data: Bytes::new(),
            tx_value: amount,
        }))
    }

    async fn submit(&self, plan: &TransferPlan) -> Result<TransferRef, RelayError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransferRef {
            tx_hash: B256::repeat_byte(0xfe),
            tool: plan.tool.clone(),
            from_chain_id: plan.from_chain_id,
            to_chain_id: plan.to_chain_id,
        })
    }

    async fn status(&self, _transfer: &TransferRef) -> Result<TransferStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TransferStatus::Pending))
    }
}

pub fn encode_b256(value: B256) -> Vec<u8> {
    value.abi_encode()
}

pub fn encode_address(value: Address) -> Vec<u8> {
    value.abi_encode()
}

pub fn encode_string(value: &str) -> Vec<u8> {
    value.to_string().abi_encode()
}
