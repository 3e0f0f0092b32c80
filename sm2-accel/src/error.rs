//! Error types.

use thiserror::Error;

/// Result type with the `sm2-accel` crate's [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised while dispatching, packing or accelerating SM2 operations.
///
/// Initialization errors are cached by the lifecycle controller and handed
/// to every caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The plugin path could not be resolved or the module could not be opened.
    #[error("failed to load accelerator plugin {path:?}: {reason}")]
    PluginLoadFailed {
        /// Path as supplied by the caller.
        path: String,
        /// Loader diagnostic.
        reason: String,
    },

    /// A required entry point is missing from the plugin.
    #[error("accelerator plugin does not export `{symbol}`: {reason}")]
    SymbolResolutionFailed {
        /// Name of the missing entry point.
        symbol: &'static str,
        /// Loader diagnostic.
        reason: String,
    },

    /// The plugin initializer reported a nonzero status.
    #[error("accelerator initializer returned status {0}")]
    AcceleratorInitFailed(i32),

    /// A self-test vector did not verify on the accelerator.
    #[error(
        "accelerator unavailable or below required capability: \
         self-test vector {index} returned status {status}"
    )]
    SelfTestFailed {
        /// Index of the first failing vector.
        index: usize,
        /// Status byte reported by the accelerator.
        status: u8,
    },

    /// Batch verification was requested but no accelerator is active.
    #[error("accelerator is not enabled")]
    AcceleratorDisabled,

    /// The signature encoding could not be split into two integers.
    #[error("malformed signature")]
    MalformedSignature,

    /// An integer does not fit in the 256-bit packing width.
    #[error("value does not fit in 256 bits")]
    ValueOutOfRange,

    /// Batch input collections have different lengths.
    #[error(
        "batch inputs have mismatched lengths: {signatures} signatures, \
         {digests} digests, {public_keys} public keys"
    )]
    InputLengthMismatch {
        /// Number of signatures.
        signatures: usize,
        /// Number of digests.
        digests: usize,
        /// Number of public keys.
        public_keys: usize,
    },

    /// The output buffer cannot hold the packed batch.
    #[error("packed batch needs {needed} words but the buffer holds {available}")]
    BufferTooSmall {
        /// Words required.
        needed: usize,
        /// Words available.
        available: usize,
    },

    /// The batch is too large to hand to the accelerator in a single call.
    #[error("batch of {0} signatures exceeds the accelerator call limit")]
    BatchTooLarge(usize),

    /// Digest is not 32 bytes long.
    #[error("digest must be 32 bytes")]
    InvalidDigest,

    /// Public key is not a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Secret key is zero, not reduced, or of the wrong length.
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// The x-coordinate has no corresponding point on the curve.
    #[error("x-coordinate is not on the curve")]
    PointNotOnCurve,

    /// A signature in a batch failed to verify.
    #[error("signature {index} in batch failed to verify")]
    VerificationFailed {
        /// Position of the first failing signature.
        index: usize,
    },

    /// A strategy family is already bound for this process.
    #[error("strategy already bound to the {0} family")]
    StrategyAlreadyBound(&'static str),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}
