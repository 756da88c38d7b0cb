//! Unified error type for circle trust operations
//!
//! Every crate in the workspace reports failures through [`ConcordError`].
//! Variants map onto the protocol's error kinds; recoverable verdicts of the
//! concordance evaluator are not errors and never appear here.

use serde::{Deserialize, Serialize};

/// Unified error type for all Concord operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ConcordError {
    /// The supplied password does not derive the trusted user key
    #[error("Wrong password")]
    WrongPassword,

    /// No cached user private key is available
    #[error("Private key absent: {message}")]
    PrivateKeyAbsent {
        /// Operation that needed the private key
        message: String,
    },

    /// No trusted user public key is available
    #[error("Public key absent: {message}")]
    PublicKeyAbsent {
        /// Operation that needed the public key
        message: String,
    },

    /// The named circle is not known to the account
    #[error("No circle: {message}")]
    NoCircle {
        /// Circle name or context
        message: String,
    },

    /// Circle data could not be understood
    #[error("Incompatible circle: {message}")]
    IncompatibleCircle {
        /// Decoder diagnostic
        message: String,
    },

    /// Peer is not present where it was expected
    #[error("Peer not found: {message}")]
    PeerNotFound {
        /// Peer identifier or context
        message: String,
    },

    /// Application signature does not verify under the user key
    #[error("Bad application signature: {message}")]
    BadApplicationSignature {
        /// Peer identifier or context
        message: String,
    },

    /// Decoded circle name differs from the expected name
    #[error("Name mismatch: expected {expected}, found {found}")]
    NameMismatch {
        /// Name the caller asked for
        expected: String,
        /// Name carried by the data
        found: String,
    },

    /// Persisted or wire data had the wrong shape
    #[error("Unexpected type: {message}")]
    UnexpectedType {
        /// Decoder diagnostic
        message: String,
    },

    /// Serialization or encoding failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Signature or key handling failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Error message describing the cryptographic failure
        message: String,
    },

    /// Password-based key derivation failed
    #[error("Key derivation failed: {message}")]
    KeyDerivation {
        /// Error message from the derivation backend
        message: String,
    },

    /// Transport adapter reported a failure
    #[error("Transport error: {message}")]
    Transport {
        /// Error message from the transport adapter
        message: String,
    },

    /// Configuration is invalid
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message describing the invalid setting
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl ConcordError {
    /// Create a private-key-absent error
    pub fn private_key_absent(message: impl Into<String>) -> Self {
        Self::PrivateKeyAbsent {
            message: message.into(),
        }
    }

    /// Create a public-key-absent error
    pub fn public_key_absent(message: impl Into<String>) -> Self {
        Self::PublicKeyAbsent {
            message: message.into(),
        }
    }

    /// Create a no-circle error
    pub fn no_circle(message: impl Into<String>) -> Self {
        Self::NoCircle {
            message: message.into(),
        }
    }

    /// Create an incompatible-circle error
    pub fn incompatible_circle(message: impl Into<String>) -> Self {
        Self::IncompatibleCircle {
            message: message.into(),
        }
    }

    /// Create a peer-not-found error
    pub fn peer_not_found(message: impl Into<String>) -> Self {
        Self::PeerNotFound {
            message: message.into(),
        }
    }

    /// Create a bad-application-signature error
    pub fn bad_application_signature(message: impl Into<String>) -> Self {
        Self::BadApplicationSignature {
            message: message.into(),
        }
    }

    /// Create a name mismatch error
    pub fn name_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::NameMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an unexpected-type error
    pub fn unexpected_type(message: impl Into<String>) -> Self {
        Self::UnexpectedType {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a key derivation error
    pub fn key_derivation(message: impl Into<String>) -> Self {
        Self::KeyDerivation {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Standard Result type for Concord operations
pub type Result<T> = std::result::Result<T, ConcordError>;

impl From<ed25519_dalek::SignatureError> for ConcordError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        Self::crypto(err.to_string())
    }
}
