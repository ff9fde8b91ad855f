//! Randomness coordinator
//!
//! Issues randomness requests through the oracle capability, tracks the
//! single outstanding request and validates the asynchronous callback that
//! answers it. Request and response are correlated by `RequestId` only; the
//! callback arrives as a [`Fulfillment`] message on whatever transport the
//! host uses.

use crate::errors::{OracleError, RaffleError};
use crate::raffle::types::{Address, RandomWord, RequestId};
use async_trait::async_trait;
use serde::Serialize;

/// Number of random words the raffle asks for per round
pub const NUM_WORDS: u32 = 1;

/// Parameters sent with every randomness request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RandomnessRequest {
    /// Gas lane: identifies the oracle proving key
    pub key_hash: [u8; 32],
    pub subscription_id: u64,
    pub request_confirmations: u16,
    pub callback_gas_limit: u32,
    pub num_words: u32,
    /// Account the oracle calls back
    pub consumer: Address,
}

/// Oracle capability used to ask for randomness.
///
/// A successful call only registers the request; the words arrive later
/// as a [`Fulfillment`] sent by the coordinator returned from
/// [`RandomnessOracle::coordinator`].
pub trait RandomnessOracle: Send {
    /// Address fulfillments must originate from
    fn coordinator(&self) -> Address;

    fn request_random_words(&mut self, request: &RandomnessRequest)
        -> Result<RequestId, OracleError>;
}

/// Callback message from the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fulfillment {
    /// Account that sent the callback
    pub caller: Address,
    pub request_id: RequestId,
    pub words: Vec<RandomWord>,
}

/// Receiving end of fulfillments
#[async_trait]
pub trait RandomnessConsumer: Send + Sync {
    fn address(&self) -> Address;

    async fn deliver(&self, fulfillment: Fulfillment) -> Result<(), OracleError>;
}

/// The request currently awaiting fulfillment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub requested_at: u64,
    /// Word from a fulfillment whose payout failed, kept for retry
    pub received_word: Option<RandomWord>,
}

/// Owns the oracle handle and the pending request slot
pub struct RandomnessCoordinator {
    oracle: Box<dyn RandomnessOracle>,
    request: RandomnessRequest,
    pending: Option<PendingRequest>,
}

impl RandomnessCoordinator {
    pub fn new(oracle: Box<dyn RandomnessOracle>, request: RandomnessRequest) -> Self {
        Self {
            oracle,
            request,
            pending: None,
        }
    }

    /// Ask the oracle for randomness and record the pending request.
    ///
    /// Nothing is recorded when the oracle refuses the request.
    pub fn request(&mut self, now: u64) -> Result<RequestId, RaffleError> {
        let request_id = self.oracle.request_random_words(&self.request)?;
        self.pending = Some(PendingRequest {
            request_id,
            requested_at: now,
            received_word: None,
        });
        tracing::debug!(request_id, "randomness requested");
        Ok(request_id)
    }

    /// Validate a callback and return the word to settle with.
    ///
    /// The caller must be the coordinator and `request_id` must match the
    /// pending request. Once a word has been received for the request it is
    /// final: a repeat delivery of the same word is a retry, any other word
    /// is rejected. Rejections leave the pending request untouched.
    pub fn accept(
        &mut self,
        caller: Address,
        request_id: RequestId,
        words: &[RandomWord],
    ) -> Result<RandomWord, RaffleError> {
        let coordinator = self.oracle.coordinator();
        if caller != coordinator {
            return Err(RaffleError::OnlyCoordinatorCanFulfill {
                have: caller,
                want: coordinator,
            });
        }

        let pending = match self.pending.as_mut() {
            Some(pending) if pending.request_id == request_id => pending,
            _ => return Err(RaffleError::UnknownRequestId { request_id }),
        };

        let word = *words
            .first()
            .ok_or(RaffleError::MissingRandomWords { request_id })?;
        match pending.received_word {
            Some(drawn) if drawn != word => Err(RaffleError::UnknownRequestId { request_id }),
            Some(drawn) => Ok(drawn),
            None => {
                pending.received_word = Some(word);
                Ok(word)
            }
        }
    }

    /// Word retained from a fulfillment whose settlement failed
    pub fn retained_word(&self) -> Option<(RequestId, RandomWord)> {
        self.pending
            .as_ref()
            .and_then(|p| p.received_word.map(|w| (p.request_id, w)))
    }

    /// Consume the pending request once the round has settled
    pub(crate) fn complete(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn coordinator(&self) -> Address {
        self.oracle.coordinator()
    }

    pub fn request_params(&self) -> &RandomnessRequest {
        &self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOracle {
        address: Address,
        next_id: RequestId,
        fail: Option<OracleError>,
    }

    impl RandomnessOracle for FixedOracle {
        fn coordinator(&self) -> Address {
            self.address
        }

        fn request_random_words(
            &mut self,
            _request: &RandomnessRequest,
        ) -> Result<RequestId, OracleError> {
            if let Some(err) = self.fail.clone() {
                return Err(err);
            }
            self.next_id += 1;
            Ok(self.next_id)
        }
    }

    fn request() -> RandomnessRequest {
        RandomnessRequest {
            key_hash: [7u8; 32],
            subscription_id: 1,
            request_confirmations: 3,
            callback_gas_limit: 500_000,
            num_words: NUM_WORDS,
            consumer: Address::from_low_u64(0xaa),
        }
    }

    fn coordinator(fail: Option<OracleError>) -> RandomnessCoordinator {
        RandomnessCoordinator::new(
            Box::new(FixedOracle {
                address: Address::from_low_u64(0xc0),
                next_id: 0,
                fail,
            }),
            request(),
        )
    }

    #[test]
    fn test_request_records_pending() {
        let mut coord = coordinator(None);
        let id = coord.request(100).unwrap();
        assert_eq!(id, 1);
        let pending = coord.pending().unwrap();
        assert_eq!(pending.request_id, 1);
        assert_eq!(pending.requested_at, 100);
    }

    #[test]
    fn test_failed_request_records_nothing() {
        let mut coord = coordinator(Some(OracleError::InvalidSubscription(1)));
        let err = coord.request(100).unwrap_err();
        assert_eq!(
            err,
            RaffleError::RandomnessRequestFailed(OracleError::InvalidSubscription(1))
        );
        assert!(coord.pending().is_none());
    }

    #[test]
    fn test_accept_checks_caller_then_id() {
        let mut coord = coordinator(None);
        let id = coord.request(0).unwrap();
        let word = RandomWord::from_u64(5);

        let stranger = Address::from_low_u64(0xbad);
        assert!(matches!(
            coord.accept(stranger, id, &[word]),
            Err(RaffleError::OnlyCoordinatorCanFulfill { .. })
        ));

        let oracle = coord.coordinator();
        assert_eq!(
            coord.accept(oracle, id + 1, &[word]).unwrap_err(),
            RaffleError::UnknownRequestId { request_id: id + 1 }
        );
        assert_eq!(
            coord.accept(oracle, id, &[]).unwrap_err(),
            RaffleError::MissingRandomWords { request_id: id }
        );
        assert!(coord.retained_word().is_none());

        assert_eq!(coord.accept(oracle, id, &[word]).unwrap(), word);
        assert_eq!(coord.retained_word(), Some((id, word)));
    }

    #[test]
    fn test_received_word_is_final() {
        let mut coord = coordinator(None);
        let id = coord.request(0).unwrap();
        let oracle = coord.coordinator();
        let drawn = RandomWord::from_u64(1);

        assert_eq!(coord.accept(oracle, id, &[drawn]).unwrap(), drawn);
        assert_eq!(
            coord
                .accept(oracle, id, &[RandomWord::from_u64(0)])
                .unwrap_err(),
            RaffleError::UnknownRequestId { request_id: id }
        );
        assert_eq!(coord.retained_word(), Some((id, drawn)));
        assert_eq!(coord.accept(oracle, id, &[drawn]).unwrap(), drawn);
    }

    #[test]
    fn test_accept_without_pending_request() {
        let mut coord = coordinator(None);
        let oracle = coord.coordinator();
        assert_eq!(
            coord
                .accept(oracle, 1, &[RandomWord::from_u64(1)])
                .unwrap_err(),
            RaffleError::UnknownRequestId { request_id: 1 }
        );
    }

    #[test]
    fn test_complete_consumes_request_once() {
        let mut coord = coordinator(None);
        let id = coord.request(0).unwrap();
        assert_eq!(coord.complete().map(|p| p.request_id), Some(id));
        assert!(coord.complete().is_none());
    }
}
