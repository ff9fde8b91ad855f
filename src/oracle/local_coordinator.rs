//! In-process verifiable randomness coordinator
//!
//! Mirrors the subscription model of an on-chain VRF coordinator: a consumer
//! registered on a funded subscription submits a request, receives an id
//! immediately and gets its words later through a [`Fulfillment`]. Words
//! come from the schnorrkel [`VrfEngine`], so every delivered word carries a
//! publicly verifiable proof.

use crate::errors::OracleError;
use crate::oracle::vrf_engine::{VrfEngine, VrfProof};
use crate::raffle::coordinator::{Fulfillment, RandomnessOracle, RandomnessRequest};
use crate::raffle::types::{Address, Amount, RandomWord, RequestId};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::Notify;

pub const MAX_NUM_WORDS: u32 = 500;
pub const MAX_CALLBACK_GAS_LIMIT: u32 = 2_500_000;
/// Flat fee charged per fulfillment (0.25 LINK)
pub const BASE_FEE: Amount = 250_000_000_000_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub balance: Amount,
    pub consumers: Vec<Address>,
}

/// Request waiting for fulfillment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    pub request_id: RequestId,
    pub subscription_id: u64,
    pub consumer: Address,
    pub key_hash: [u8; 32],
    pub num_words: u32,
    pub callback_gas_limit: u32,
}

/// Words delivered for a request, with their proofs
#[derive(Debug, Clone)]
pub struct VerifiedFulfillment {
    pub fulfillment: Fulfillment,
    pub proofs: Vec<VrfProof>,
}

#[derive(Clone)]
pub struct LocalCoordinator {
    address: Address,
    vrf: VrfEngine,
    base_fee: Amount,
    subscriptions: Arc<DashMap<u64, Subscription>>,
    requests: Arc<DashMap<RequestId, RequestRecord>>,
    prepared: Arc<DashMap<RequestId, VerifiedFulfillment>>,
    next_subscription_id: Arc<AtomicU64>,
    next_request_id: Arc<AtomicU64>,
    request_notify: Arc<Notify>,
}

impl LocalCoordinator {
    pub fn new(address: Address, vrf: VrfEngine) -> Self {
        Self {
            address,
            vrf,
            base_fee: BASE_FEE,
            subscriptions: Arc::new(DashMap::new()),
            requests: Arc::new(DashMap::new()),
            prepared: Arc::new(DashMap::new()),
            next_subscription_id: Arc::new(AtomicU64::new(1)),
            next_request_id: Arc::new(AtomicU64::new(1)),
            request_notify: Arc::new(Notify::new()),
        }
    }

    pub fn with_base_fee(mut self, base_fee: Amount) -> Self {
        self.base_fee = base_fee;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn base_fee(&self) -> Amount {
        self.base_fee
    }

    pub fn vrf_public_key(&self) -> String {
        self.vrf.public_key_hex()
    }

    pub fn create_subscription(&self) -> u64 {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(id, Subscription::default());
        tracing::debug!(subscription_id = id, "subscription created");
        id
    }

    /// Add `amount` to a subscription, returning the new balance
    pub fn fund_subscription(
        &self,
        subscription_id: u64,
        amount: Amount,
    ) -> Result<Amount, OracleError> {
        let mut sub = self
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or(OracleError::InvalidSubscription(subscription_id))?;
        sub.balance = sub.balance.saturating_add(amount);
        Ok(sub.balance)
    }

    pub fn add_consumer(&self, subscription_id: u64, consumer: Address) -> Result<(), OracleError> {
        let mut sub = self
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or(OracleError::InvalidSubscription(subscription_id))?;
        if !sub.consumers.contains(&consumer) {
            sub.consumers.push(consumer);
        }
        Ok(())
    }

    pub fn remove_consumer(
        &self,
        subscription_id: u64,
        consumer: Address,
    ) -> Result<(), OracleError> {
        let mut sub = self
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or(OracleError::InvalidSubscription(subscription_id))?;
        let before = sub.consumers.len();
        sub.consumers.retain(|c| *c != consumer);
        if sub.consumers.len() == before {
            return Err(OracleError::InvalidConsumer {
                subscription_id,
                consumer,
            });
        }
        Ok(())
    }

    pub fn subscription(&self, subscription_id: u64) -> Option<Subscription> {
        self.subscriptions
            .get(&subscription_id)
            .map(|s| s.value().clone())
    }

    /// Validate and register a request
    pub fn submit_request(&self, request: &RandomnessRequest) -> Result<RequestId, OracleError> {
        let subscription_id = request.subscription_id;
        {
            let sub = self
                .subscriptions
                .get(&subscription_id)
                .ok_or(OracleError::InvalidSubscription(subscription_id))?;
            if !sub.consumers.contains(&request.consumer) {
                return Err(OracleError::InvalidConsumer {
                    subscription_id,
                    consumer: request.consumer,
                });
            }
            if sub.balance == 0 {
                return Err(OracleError::InsufficientBalance { subscription_id });
            }
        }
        if request.num_words == 0 || request.num_words > MAX_NUM_WORDS {
            return Err(OracleError::NumWordsTooLarge {
                have: request.num_words,
                want: MAX_NUM_WORDS,
            });
        }
        if request.callback_gas_limit > MAX_CALLBACK_GAS_LIMIT {
            return Err(OracleError::GasLimitTooBig {
                have: request.callback_gas_limit,
                want: MAX_CALLBACK_GAS_LIMIT,
            });
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        self.requests.insert(
            request_id,
            RequestRecord {
                request_id,
                subscription_id,
                consumer: request.consumer,
                key_hash: request.key_hash,
                num_words: request.num_words,
                callback_gas_limit: request.callback_gas_limit,
            },
        );
        self.request_notify.notify_one();

        tracing::info!(
            request_id,
            subscription_id,
            consumer = %request.consumer,
            "random words requested"
        );
        Ok(request_id)
    }

    pub fn request(&self, request_id: RequestId) -> Option<RequestRecord> {
        self.requests.get(&request_id).map(|r| r.value().clone())
    }

    /// Ids of unfulfilled requests, oldest first
    pub fn pending_requests(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.requests.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    /// Wait until a new request is submitted
    pub async fn wait_for_request(&self) {
        self.request_notify.notified().await;
    }

    /// Produce VRF words for a pending request and charge the subscription.
    ///
    /// The request stays pending if the subscription cannot pay.
    pub fn fulfill(&self, request_id: RequestId) -> Result<VerifiedFulfillment, OracleError> {
        let verified = self.prepare_fulfillment(request_id)?;
        self.mark_delivered(request_id)?;
        Ok(verified)
    }

    /// Proved words for a pending request, without consuming it.
    ///
    /// Words are generated once and cached, so every delivery attempt for
    /// the same request carries the same words. Fails if the subscription
    /// cannot cover the fee.
    pub fn prepare_fulfillment(
        &self,
        request_id: RequestId,
    ) -> Result<VerifiedFulfillment, OracleError> {
        let record = self
            .request(request_id)
            .ok_or(OracleError::NonexistentRequest(request_id))?;
        self.ensure_funded(record.subscription_id)?;

        if let Some(cached) = self.prepared.get(&request_id) {
            return Ok(cached.value().clone());
        }

        let proofs = self.vrf.generate_words(
            request_id,
            record.subscription_id,
            &record.key_hash,
            record.num_words,
        );
        let words = proofs
            .iter()
            .map(VrfProof::word)
            .collect::<Result<Vec<_>, _>>()?;

        let verified = VerifiedFulfillment {
            fulfillment: Fulfillment {
                caller: self.address,
                request_id,
                words,
            },
            proofs,
        };
        self.prepared.insert(request_id, verified.clone());
        Ok(verified)
    }

    /// Charge the subscription and retire a request whose words reached
    /// the consumer
    pub fn mark_delivered(&self, request_id: RequestId) -> Result<(), OracleError> {
        let record = self
            .request(request_id)
            .ok_or(OracleError::NonexistentRequest(request_id))?;
        self.charge_and_remove(&record)?;
        self.prepared.remove(&request_id);
        Ok(())
    }

    /// Fulfill with caller-chosen words.
    ///
    /// An empty `words` is replaced by `num_words` deterministic words
    /// derived from the request id.
    pub fn fulfill_with_words(
        &self,
        request_id: RequestId,
        words: Vec<RandomWord>,
    ) -> Result<Fulfillment, OracleError> {
        let record = self
            .request(request_id)
            .ok_or(OracleError::NonexistentRequest(request_id))?;

        let words = if words.is_empty() {
            (0..record.num_words)
                .map(|i| {
                    let mut hasher = Sha256::new();
                    hasher.update(request_id.to_be_bytes());
                    hasher.update(i.to_be_bytes());
                    RandomWord::from_bytes(hasher.finalize().into())
                })
                .collect()
        } else {
            words
        };

        self.charge_and_remove(&record)?;
        self.prepared.remove(&request_id);
        Ok(Fulfillment {
            caller: self.address,
            request_id,
            words,
        })
    }

    fn ensure_funded(&self, subscription_id: u64) -> Result<(), OracleError> {
        let sub = self
            .subscriptions
            .get(&subscription_id)
            .ok_or(OracleError::InvalidSubscription(subscription_id))?;
        if sub.balance < self.base_fee {
            return Err(OracleError::InsufficientBalance { subscription_id });
        }
        Ok(())
    }

    fn charge_and_remove(&self, record: &RequestRecord) -> Result<(), OracleError> {
        {
            let mut sub = self
                .subscriptions
                .get_mut(&record.subscription_id)
                .ok_or(OracleError::InvalidSubscription(record.subscription_id))?;
            if sub.balance < self.base_fee {
                return Err(OracleError::InsufficientBalance {
                    subscription_id: record.subscription_id,
                });
            }
            sub.balance -= self.base_fee;
        }

        if self.requests.remove(&record.request_id).is_none() {
            return Err(OracleError::NonexistentRequest(record.request_id));
        }
        tracing::debug!(request_id = record.request_id, "request fulfilled");
        Ok(())
    }
}

impl RandomnessOracle for LocalCoordinator {
    fn coordinator(&self) -> Address {
        self.address
    }

    fn request_random_words(
        &mut self,
        request: &RandomnessRequest,
    ) -> Result<RequestId, OracleError> {
        self.submit_request(request)
    }
}
