//! Per-message authorization for the Harbor P2P layer.
//!
//! Every message a node sends is wrapped in an authorized envelope whose
//! token is minted by an [`AuthorizationService`]. The receiving node
//! validates the token before the message reaches any listener.
//!
//! [`ProofOfWorkAuthorization`] is the default service: a lightweight
//! hashcash-style cost per message that makes flooding a peer expensive
//! while keeping ordinary traffic cheap.

pub mod error;
pub mod generator;
pub mod proof_of_work;
pub mod service;
pub mod thresholds;
pub mod validator;

pub use error::AuthorizationError;
pub use generator::WorkGenerator;
pub use proof_of_work::{PowProof, ProofOfWorkAuthorization};
pub use service::AuthorizationService;
pub use thresholds::KindThresholds;
pub use validator::{validate_work, work_value};

/// A nonce that satisfies some difficulty for a given work input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkNonce(pub u64);
