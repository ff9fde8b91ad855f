//! Local verifiable randomness oracle.

pub mod local_coordinator;
pub mod node;
pub mod vrf_engine;

pub use local_coordinator::{
    LocalCoordinator, RequestRecord, Subscription, VerifiedFulfillment, BASE_FEE,
    MAX_CALLBACK_GAS_LIMIT, MAX_NUM_WORDS,
};
pub use node::OracleNode;
pub use vrf_engine::{VrfEngine, VrfProof};
