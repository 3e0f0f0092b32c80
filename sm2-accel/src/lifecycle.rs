//! Once-only accelerator initialization and batch verification.
//!
//! A [`Lifecycle`] moves through three states:
//!
//! ```text
//! Uninitialized --initialize--> Active
//!               \-------------> Disabled
//! ```
//!
//! The first call to [`Lifecycle::initialize`] loads the accelerator, runs
//! its initializer and a self-test over [`SELF_TEST_VECTORS`]. Whatever the
//! outcome, it is final: later calls return the cached result without doing
//! any work, and concurrent callers block until the first one finishes.
//!
//! The free functions in this module operate on a process-wide instance.

use crate::{
    Error, Result,
    config::{Config, PLUGIN_PATH_VAR},
    gateway::{Accelerator, Plugin, STATUS_FAILED, STATUS_OK},
    pack::{check_lengths, pack_batch},
    pool::{BufferPool, DEFAULT_CAPACITY},
};
use hex_literal::hex;
use log::{info, trace, warn};
use std::{path::Path, sync::{LazyLock, OnceLock, atomic::{AtomicBool, Ordering}}};

/// Known-good signature used to check an accelerator before enabling it.
#[derive(Clone, Copy, Debug)]
pub struct SelfTestVector {
    /// DER encoded signature.
    pub signature: &'static [u8],
    /// Message digest `e`.
    pub digest: [u8; 32],
    /// x-coordinate of the signer's public key.
    pub public_key_x: [u8; 32],
}

/// Vectors every accelerator must verify during initialization.
pub const SELF_TEST_VECTORS: [SelfTestVector; 3] = [
    SelfTestVector {
        signature: &hex!(
            "3045022000d6258f35b3496a23db918df7206ef555fc228fc6dcf1b44c3dcc87260cdc55"
            "022100ab97953db95ec59764fe10af21f3adb9f5cb6624eee957fc3b5f9f9cb8086ae2"
        ),
        digest: hex!("02f78613d3d4503262be1ca5752fe7fa1cb5d251bce89b73ff204c1748a433b3"),
        public_key_x: hex!("77075f12e11b2d2c567ea9b030ec77565e6f15b00cff42578127b7b03c31af63"),
    },
    SelfTestVector {
        signature: &hex!(
            "3046022100f387de0024c82cb24fb4d3544077ab5d8be8d772195fdca7ebe78e85704d47c0"
            "022100e7a899a163a4ade625e62629109c3b135da4ea795f33c50f021301bd21473ed5"
        ),
        digest: hex!("60459d4ccd6b3895a7d1e08260d9168e76ef52f242095337a72d6a841ef0e879"),
        public_key_x: hex!("ebf87ef0d6dcc06fd0d6c4e7674a35609376b084bbc034db19c80d799446f4f3"),
    },
    SelfTestVector {
        signature: &hex!(
            "3045022100b23a6ee2bcda5dd64a0c76297011bc91a144ba9dec52ea9056f602298df91b13"
            "02202f87ab0cd5597c8a03fcca82b83b7b8200a106484239aebe0f6ad8e4b7c7deac"
        ),
        digest: hex!("20e9a148d71cdec0613fc780ff7a71bfbc54f94c0c017d0e106aaa8c6d8d1690"),
        public_key_x: hex!("86ed193adc4deda749752ff1a29d5816221c28919e3e3948c57a7b1f4bba87e4"),
    },
];

/// Observable state of a [`Lifecycle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// No initialization attempt has completed.
    Uninitialized,
    /// The accelerator passed its self-test and serves batches.
    Active,
    /// Initialization failed; the accelerator stays off for good.
    Disabled,
}

type Outcome = Result<Box<dyn Accelerator>>;

/// Owner of a single accelerator and the buffers used to feed it.
pub struct Lifecycle {
    outcome: OnceLock<Outcome>,
    enabled: AtomicBool,
    pool: BufferPool,
}

impl Lifecycle {
    /// Create an uninitialized controller with a default sized buffer pool.
    pub const fn new() -> Self {
        Self::with_pool(BufferPool::new())
    }

    /// Create an uninitialized controller feeding batches from `pool`.
    pub const fn with_pool(pool: BufferPool) -> Self {
        Self {
            outcome: OnceLock::new(),
            enabled: AtomicBool::new(false),
            pool,
        }
    }

    /// Create an uninitialized controller sized from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::with_pool(BufferPool::with_capacity(config.pool_capacity))
    }

    /// Load the plugin at `path`, initialize it and run the self-test.
    pub fn initialize(&self, path: impl AsRef<Path>) -> Result<()> {
        self.initialize_with(|| Ok(Box::new(Plugin::load(path)?)))
    }

    /// Initialize with an accelerator produced by `load`.
    ///
    /// `load` runs at most once per controller, no matter how many threads
    /// race to initialize it.
    pub fn initialize_with<F>(&self, load: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn Accelerator>>,
    {
        let outcome = self.outcome.get_or_init(|| {
            let outcome = load().and_then(|accelerator| {
                accelerator.initialize()?;
                self_test(&*accelerator, &self.pool)?;
                Ok(accelerator)
            });
            match &outcome {
                Ok(_) => {
                    // published before any waiter observes the outcome
                    self.enabled.store(true, Ordering::Release);
                    info!("SM2 batch accelerator enabled");
                }
                Err(err) => warn!("SM2 batch accelerator disabled: {err}"),
            }
            outcome
        });

        outcome.as_ref().map(|_| ()).map_err(Clone::clone)
    }

    /// Whether an accelerator passed initialization. Never blocks.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Current state of the controller.
    pub fn state(&self) -> State {
        match self.outcome.get() {
            Some(Ok(_)) => State::Active,
            Some(Err(_)) => State::Disabled,
            None => State::Uninitialized,
        }
    }

    /// Verify a batch on the accelerator.
    ///
    /// Returns one status byte per signature: `0` for a signature that
    /// verified and nonzero otherwise. Malformed inputs fail the whole batch
    /// before anything is sent to the accelerator.
    pub fn verify_batch<S, D, P>(
        &self,
        signatures: &[S],
        digests: &[D],
        public_key_xs: &[P],
    ) -> Result<Vec<u8>>
    where
        S: AsRef<[u8]>,
        D: AsRef<[u8]>,
        P: AsRef<[u8]>,
    {
        check_lengths(signatures.len(), digests.len(), public_key_xs.len())?;
        let accelerator = self.active().ok_or(Error::AcceleratorDisabled)?;

        let mut status = vec![STATUS_FAILED; signatures.len()];
        if status.is_empty() {
            return Ok(status);
        }

        let mut words = self.pool.acquire(signatures.len())?;
        pack_batch(signatures, digests, public_key_xs, &mut words)?;
        accelerator.batch_verify(&words, &mut status)?;
        trace!("accelerated batch of {} signatures", status.len());
        Ok(status)
    }

    fn active(&self) -> Option<&dyn Accelerator> {
        if !self.is_enabled() {
            return None;
        }
        match self.outcome.get() {
            Some(Ok(accelerator)) => Some(&**accelerator),
            _ => None,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .field("pool", &self.pool)
            .finish()
    }
}

fn self_test(accelerator: &dyn Accelerator, pool: &BufferPool) -> Result<()> {
    let signatures = SELF_TEST_VECTORS.map(|vector| vector.signature);
    let digests = SELF_TEST_VECTORS.map(|vector| vector.digest);
    let public_key_xs = SELF_TEST_VECTORS.map(|vector| vector.public_key_x);

    let mut words = pool.acquire(SELF_TEST_VECTORS.len())?;
    pack_batch(&signatures, &digests, &public_key_xs, &mut words)?;

    let mut status = [STATUS_FAILED; SELF_TEST_VECTORS.len()];
    accelerator.batch_verify(&words, &mut status)?;

    match status.iter().position(|&status| status != STATUS_OK) {
        Some(index) => Err(Error::SelfTestFailed {
            index,
            status: status[index],
        }),
        None => Ok(()),
    }
}

static GLOBAL: LazyLock<Lifecycle> = LazyLock::new(|| {
    let capacity = match Config::from_env() {
        Ok(config) => config.pool_capacity,
        Err(err) => {
            warn!("ignoring accelerator configuration: {err}");
            DEFAULT_CAPACITY
        }
    };
    Lifecycle::with_pool(BufferPool::with_capacity(capacity))
});

/// Initialize the process-wide accelerator from the plugin at `path`.
///
/// Only the first call does any work; every call returns its outcome.
pub fn initialize_accelerator(path: impl AsRef<Path>) -> Result<()> {
    GLOBAL.initialize(path)
}

/// Initialize the process-wide accelerator from the plugin named by the
/// `SM2_ACCEL_PLUGIN` environment variable.
pub fn initialize_accelerator_from_env() -> Result<()> {
    let path = Config::from_env()?
        .plugin_path
        .ok_or_else(|| Error::Config(format!("{PLUGIN_PATH_VAR} is not set")))?;
    initialize_accelerator(path)
}

/// Whether the process-wide accelerator is active.
pub fn is_accelerator_enabled() -> bool {
    GLOBAL.is_enabled()
}

/// Verify a batch on the process-wide accelerator.
///
/// See [`Lifecycle::verify_batch`].
pub fn verify_batch_on_accelerator<S, D, P>(
    signatures: &[S],
    digests: &[D],
    public_key_xs: &[P],
) -> Result<Vec<u8>>
where
    S: AsRef<[u8]>,
    D: AsRef<[u8]>,
    P: AsRef<[u8]>,
{
    GLOBAL.verify_batch(signatures, digests, public_key_xs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SoftwareAccelerator;
    use assert_matches::assert_matches;
    use std::{sync::{Barrier, atomic::AtomicUsize}, thread};

    /// Accelerator reporting a fixed status for every record.
    struct Constant(u8);

    impl Accelerator for Constant {
        fn initialize(&self) -> Result<()> {
            Ok(())
        }

        fn batch_verify(&self, _words: &[u32], status: &mut [u8]) -> Result<()> {
            status.fill(self.0);
            Ok(())
        }
    }

    /// Accelerator whose initializer always fails.
    struct Broken;

    impl Accelerator for Broken {
        fn initialize(&self) -> Result<()> {
            Err(Error::AcceleratorInitFailed(-3))
        }

        fn batch_verify(&self, _words: &[u32], _status: &mut [u8]) -> Result<()> {
            unreachable!("never initialized")
        }
    }

    fn software() -> Result<Box<dyn Accelerator>> {
        Ok(Box::new(SoftwareAccelerator::new()))
    }

    fn vector_columns() -> (Vec<&'static [u8]>, Vec<[u8; 32]>, Vec<[u8; 32]>) {
        (
            SELF_TEST_VECTORS.iter().map(|v| v.signature).collect(),
            SELF_TEST_VECTORS.iter().map(|v| v.digest).collect(),
            SELF_TEST_VECTORS.iter().map(|v| v.public_key_x).collect(),
        )
    }

    #[test]
    fn starts_uninitialized() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_enabled());
        assert_eq!(lifecycle.state(), State::Uninitialized);
        assert_matches!(
            lifecycle.verify_batch(&[[0u8; 8]], &[[0u8; 32]], &[[0u8; 32]]),
            Err(Error::AcceleratorDisabled)
        );
    }

    #[test]
    fn software_accelerator_activates() {
        let lifecycle = Lifecycle::new();
        lifecycle.initialize_with(software).unwrap();
        assert!(lifecycle.is_enabled());
        assert_eq!(lifecycle.state(), State::Active);

        let (signatures, digests, xs) = vector_columns();
        let status = lifecycle.verify_batch(&signatures, &digests, &xs).unwrap();
        assert_eq!(status, [STATUS_OK; 3]);

        let mut digests = digests;
        digests[1][0] ^= 1;
        let status = lifecycle.verify_batch(&signatures, &digests, &xs).unwrap();
        assert_eq!(status[0], STATUS_OK);
        assert_ne!(status[1], STATUS_OK);
        assert_eq!(status[2], STATUS_OK);
    }

    #[test]
    fn empty_batch() {
        let lifecycle = Lifecycle::new();
        lifecycle.initialize_with(software).unwrap();
        let none: [&[u8]; 0] = [];
        assert_eq!(lifecycle.verify_batch(&none, &none, &none).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn input_errors() {
        let lifecycle = Lifecycle::new();
        lifecycle.initialize_with(software).unwrap();
        let (signatures, digests, xs) = vector_columns();

        assert_matches!(
            lifecycle.verify_batch(&signatures, &digests[..2], &xs),
            Err(Error::InputLengthMismatch { signatures: 3, digests: 2, public_keys: 3 })
        );

        let mut signatures = signatures;
        signatures[2] = SELF_TEST_VECTORS[2].signature.get(..5).unwrap();
        assert_matches!(
            lifecycle.verify_batch(&signatures, &digests, &xs),
            Err(Error::MalformedSignature)
        );
    }

    #[test]
    fn failed_initializer_disables() {
        let lifecycle = Lifecycle::new();
        let err = lifecycle.initialize_with(|| Ok(Box::new(Broken))).unwrap_err();
        assert_eq!(err, Error::AcceleratorInitFailed(-3));
        assert!(!lifecycle.is_enabled());
        assert_eq!(lifecycle.state(), State::Disabled);

        // the outcome is final, even with a working accelerator on offer
        assert_eq!(lifecycle.initialize_with(software), Err(err));
        assert!(!lifecycle.is_enabled());
    }

    #[test]
    fn failed_self_test_disables() {
        let lifecycle = Lifecycle::new();
        assert_eq!(
            lifecycle.initialize_with(|| Ok(Box::new(Constant(7)))),
            Err(Error::SelfTestFailed { index: 0, status: 7 })
        );
        assert!(!lifecycle.is_enabled());
        assert_matches!(
            lifecycle.verify_batch(&[[0u8; 8]], &[[0u8; 32]], &[[0u8; 32]]),
            Err(Error::AcceleratorDisabled)
        );
    }

    #[test]
    fn missing_plugin_disables() {
        let lifecycle = Lifecycle::new();
        assert_matches!(
            lifecycle.initialize("/nonexistent/sm2-accel-plugin.so"),
            Err(Error::PluginLoadFailed { .. })
        );
        assert_eq!(lifecycle.state(), State::Disabled);
    }

    #[test]
    fn concurrent_initialization_loads_once() {
        const THREADS: usize = 8;
        let lifecycle = Lifecycle::new();
        let loads = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    barrier.wait();
                    let result = lifecycle.initialize_with(|| {
                        loads.fetch_add(1, Ordering::SeqCst);
                        software()
                    });
                    assert_eq!(result, Ok(()));
                    assert!(lifecycle.is_enabled());
                });
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sized_from_config() {
        let config = Config {
            pool_capacity: 16,
            ..Config::default()
        };
        let lifecycle = Lifecycle::from_config(&config);
        assert_eq!(lifecycle.pool.capacity(), 16);
    }
}
