use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("work difficulty {actual} below minimum {minimum}")]
    InsufficientDifficulty { actual: u64, minimum: u64 },

    #[error("malformed authorization proof ({0} bytes)")]
    MalformedProof(usize),

    #[error("token was issued for {token} but message is {message}")]
    KindMismatch { token: String, message: String },

    #[error("token generation cancelled")]
    Cancelled,

    #[error("token generation failed: {0}")]
    GenerationFailed(String),
}
