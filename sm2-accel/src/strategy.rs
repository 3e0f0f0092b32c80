//! Host-capability strategy dispatch.
//!
//! Every SM2 operation the crate offers is implemented twice:
//!
//! - [`Native`]: constant-time arithmetic over the native 64-bit limbs of
//!   the [`sm2`] crate;
//! - [`Portable`]: generic big-integer arithmetic built on [`num_bigint`].
//!
//! A process binds exactly one family, the first time [`current`] or
//! [`install`] is called, and keeps it for its whole life. All operations of
//! a binding come from the same family.

mod native;
mod portable;

pub use self::{native::Native, portable::Portable};

use crate::{
    Error, Result,
    codec::decode_signature,
    config::{Config, StrategyPreference},
    curve::{self, CurveParams, FIELD_BYTES},
    pack::check_lengths,
};
use core::fmt;
use log::{debug, warn};
use rand_core::CryptoRngCore;
use std::sync::{Mutex, OnceLock, PoisonError};

/// Uniform SM2 API implemented by each strategy family.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Short family name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Descriptor of the curve this family operates on.
    fn curve(&self) -> &'static CurveParams;

    /// Sign a 32-byte message digest `e` with `secret_key`.
    ///
    /// The nonce is drawn from `rng`.
    fn sign(
        &self,
        digest: &[u8],
        rng: &mut dyn CryptoRngCore,
        secret_key: &[u8],
    ) -> Result<SignedDigest>;

    /// Verify `signature` over the 32-byte `digest` against the public key
    /// with affine coordinates `(x, y)`.
    ///
    /// Malformed encodings are errors; a well-formed signature that does not
    /// verify is `Ok(false)`.
    fn verify(&self, signature: &[u8], digest: &[u8], x: &[u8], y: &[u8]) -> Result<bool>;

    /// Take a scratch heap for batch verification.
    fn get_batch_heap(&self) -> BatchHeap;

    /// Give a heap obtained from [`Strategy::get_batch_heap`] back.
    fn put_batch_heap(&self, heap: BatchHeap);

    /// Load a batch into `heap`.
    ///
    /// `public_keys` are SEC1 encoded; compressed keys are expanded with
    /// [`Strategy::complement_coordinates`].
    fn batch_verify_init(
        &self,
        heap: &mut BatchHeap,
        public_keys: &[&[u8]],
        signatures: &[&[u8]],
        digests: &[&[u8]],
    ) -> Result<()>;

    /// Verify the batch loaded into `heap`, then empty it.
    ///
    /// Fails with [`Error::VerificationFailed`] naming the first signature
    /// that did not verify.
    fn batch_verify_end(&self, heap: &mut BatchHeap) -> Result<()>;

    /// Verify a batch in one call using a pooled heap.
    fn batch_verify(
        &self,
        public_keys: &[&[u8]],
        signatures: &[&[u8]],
        digests: &[&[u8]],
    ) -> Result<()> {
        let mut heap = self.get_batch_heap();
        let result = self
            .batch_verify_init(&mut heap, public_keys, signatures, digests)
            .and_then(|()| self.batch_verify_end(&mut heap));
        self.put_batch_heap(heap);
        result
    }

    /// Recover the y-coordinate with parity `y_parity` for `x`.
    ///
    /// Fails with [`Error::PointNotOnCurve`] when no such point exists.
    fn complement_coordinates(&self, x: &[u8], y_parity: u8) -> Result<[u8; FIELD_BYTES]>;
}

/// Output of [`Strategy::sign`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedDigest {
    /// DER encoded `(r, s)`.
    pub signature: Vec<u8>,
    /// Parity of the y-coordinate of the ephemeral point `k·G`.
    pub y_parity: u8,
}

/// Scratch storage for one batch verification.
#[derive(Clone, Debug, Default)]
pub struct BatchHeap {
    entries: Vec<BatchEntry>,
}

#[derive(Clone, Debug)]
struct BatchEntry {
    x: [u8; FIELD_BYTES],
    y: [u8; FIELD_BYTES],
    r: [u8; FIELD_BYTES],
    s: [u8; FIELD_BYTES],
    e: [u8; FIELD_BYTES],
}

impl BatchHeap {
    /// Create an empty heap.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of loaded signatures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no signature is loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replace the heap contents with a parsed batch.
    ///
    /// On error the heap is left empty.
    fn load<F>(
        &mut self,
        public_keys: &[&[u8]],
        signatures: &[&[u8]],
        digests: &[&[u8]],
        complement: F,
    ) -> Result<()>
    where
        F: Fn(&[u8], u8) -> Result<[u8; FIELD_BYTES]>,
    {
        self.clear();
        check_lengths(signatures.len(), digests.len(), public_keys.len())?;
        self.entries.reserve(signatures.len());

        for ((public_key, signature), digest) in public_keys.iter().zip(signatures).zip(digests) {
            match parse_entry(public_key, signature, digest, &complement) {
                Ok(entry) => self.entries.push(entry),
                Err(err) => {
                    self.clear();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Check every entry with `verify`, then empty the heap.
    fn finish<F>(&mut self, verify: F) -> Result<()>
    where
        F: Fn(&BatchEntry) -> bool,
    {
        let failed = self.entries.iter().position(|entry| !verify(entry));
        self.clear();
        match failed {
            Some(index) => Err(Error::VerificationFailed { index }),
            None => Ok(()),
        }
    }
}

fn parse_entry<F>(
    public_key: &[u8],
    signature: &[u8],
    digest: &[u8],
    complement: &F,
) -> Result<BatchEntry>
where
    F: Fn(&[u8], u8) -> Result<[u8; FIELD_BYTES]>,
{
    let (x, y) = match public_key {
        [0x04, coordinates @ ..] if coordinates.len() == 2 * FIELD_BYTES => {
            let (x, y) = coordinates.split_at(FIELD_BYTES);
            (field_bytes(x)?, field_bytes(y)?)
        }
        [tag @ (0x02 | 0x03), x @ ..] if x.len() == FIELD_BYTES => {
            (field_bytes(x)?, complement(x, tag & 1)?)
        }
        _ => return Err(Error::InvalidPublicKey),
    };

    let (r, s) = decode_signature(signature)?;
    Ok(BatchEntry {
        x,
        y,
        r: curve::to_field_bytes(r).ok_or(Error::MalformedSignature)?,
        s: curve::to_field_bytes(s).ok_or(Error::MalformedSignature)?,
        e: digest_bytes(digest)?,
    })
}

fn field_bytes(bytes: &[u8]) -> Result<[u8; FIELD_BYTES]> {
    curve::to_field_bytes(bytes).ok_or(Error::InvalidPublicKey)
}

fn digest_bytes(digest: &[u8]) -> Result<[u8; FIELD_BYTES]> {
    digest.try_into().map_err(|_| Error::InvalidDigest)
}

fn secret_bytes(secret_key: &[u8]) -> Result<[u8; FIELD_BYTES]> {
    secret_key.try_into().map_err(|_| Error::InvalidSecretKey)
}

/// Idle batch heaps of one family.
struct HeapPool {
    idle: Mutex<Vec<BatchHeap>>,
}

impl HeapPool {
    /// Heaps kept beyond this count are dropped on return.
    const MAX_IDLE: usize = 16;

    const fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> BatchHeap {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    fn give(&self, mut heap: BatchHeap) {
        heap.clear();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < Self::MAX_IDLE {
            idle.push(heap);
        }
    }
}

/// Instruction set extensions relevant to family selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostFeatures {
    /// x86 SSE2.
    pub sse2: bool,
    /// x86 SSE4.1.
    pub sse41: bool,
    /// x86 SSE4.2.
    pub sse42: bool,
    /// x86 BMI2.
    pub bmi2: bool,
    /// aarch64 AES.
    pub aes: bool,
}

impl HostFeatures {
    /// Probe the running CPU.
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub fn detect() -> Self {
        Self {
            sse2: std::is_x86_feature_detected!("sse2"),
            sse41: std::is_x86_feature_detected!("sse4.1"),
            sse42: std::is_x86_feature_detected!("sse4.2"),
            bmi2: std::is_x86_feature_detected!("bmi2"),
            aes: false,
        }
    }

    /// Probe the running CPU.
    #[cfg(target_arch = "aarch64")]
    pub fn detect() -> Self {
        Self {
            aes: std::arch::is_aarch64_feature_detected!("aes"),
            ..Self::default()
        }
    }

    /// Probe the running CPU.
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    pub fn detect() -> Self {
        Self::default()
    }
}

/// Decides whether a host qualifies for the [`Native`] family.
pub type CapabilityPredicate = fn(&HostFeatures) -> bool;

/// Default capability requirement: SSE2, SSE4.1, SSE4.2 and BMI2 on x86, or
/// the AES extension on aarch64.
pub fn default_predicate(features: &HostFeatures) -> bool {
    (features.sse2 && features.bmi2 && features.sse42 && features.sse41) || features.aes
}

static NATIVE: Native = Native;
static PORTABLE: Portable = Portable;

/// Pick a family without binding it.
pub fn select(
    preference: StrategyPreference,
    features: &HostFeatures,
    predicate: CapabilityPredicate,
) -> &'static dyn Strategy {
    match preference {
        StrategyPreference::Native => &NATIVE,
        StrategyPreference::Portable => &PORTABLE,
        StrategyPreference::Auto if predicate(features) => &NATIVE,
        StrategyPreference::Auto => &PORTABLE,
    }
}

static BOUND: OnceLock<&'static dyn Strategy> = OnceLock::new();

/// The family bound for this process.
///
/// Binds on first call rather than at process start, honoring the
/// `SM2_ACCEL_STRATEGY` environment variable and [`default_predicate`].
/// Once bound, the family never changes for the life of the process.
pub fn current() -> &'static dyn Strategy {
    *BOUND.get_or_init(|| {
        let preference = Config::from_env().map_or_else(
            |err| {
                warn!("ignoring strategy configuration: {err}");
                StrategyPreference::Auto
            },
            |config| config.strategy,
        );
        bind(preference, default_predicate)
    })
}

/// Bind a family explicitly.
///
/// Fails with [`Error::StrategyAlreadyBound`] if a family is already bound,
/// either by an earlier call or by [`current`].
pub fn install(
    preference: StrategyPreference,
    predicate: CapabilityPredicate,
) -> Result<&'static dyn Strategy> {
    let mut bound_here = false;
    let strategy = *BOUND.get_or_init(|| {
        bound_here = true;
        bind(preference, predicate)
    });

    if bound_here {
        Ok(strategy)
    } else {
        Err(Error::StrategyAlreadyBound(strategy.name()))
    }
}

fn bind(preference: StrategyPreference, predicate: CapabilityPredicate) -> &'static dyn Strategy {
    let features = HostFeatures::detect();
    let strategy = select(preference, &features, predicate);
    debug!(
        "bound {} strategy family (preference {preference}, host {features:?})",
        strategy.name()
    );
    strategy
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const ALL: HostFeatures = HostFeatures {
        sse2: true,
        sse41: true,
        sse42: true,
        bmi2: true,
        aes: false,
    };

    #[test]
    fn default_requirement() {
        assert!(default_predicate(&ALL));
        assert!(!default_predicate(&HostFeatures::default()));
        assert!(!default_predicate(&HostFeatures { bmi2: false, ..ALL }));
        assert!(!default_predicate(&HostFeatures { sse41: false, ..ALL }));
        assert!(default_predicate(&HostFeatures {
            aes: true,
            ..HostFeatures::default()
        }));
    }

    #[test]
    fn selection() {
        let none = HostFeatures::default();
        assert_eq!(select(StrategyPreference::Auto, &ALL, default_predicate).name(), "native");
        assert_eq!(select(StrategyPreference::Auto, &none, default_predicate).name(), "portable");
        assert_eq!(select(StrategyPreference::Native, &none, default_predicate).name(), "native");
        let forced = select(StrategyPreference::Portable, &ALL, default_predicate);
        assert_eq!(forced.name(), "portable");
        assert_eq!(select(StrategyPreference::Auto, &none, |_| true).name(), "native");
    }

    #[test]
    fn heap_pool_recycles_empty_heaps() {
        let pool = HeapPool::new();
        let mut heap = pool.take();
        heap.entries.push(BatchEntry {
            x: [1; 32],
            y: [2; 32],
            r: [3; 32],
            s: [4; 32],
            e: [5; 32],
        });
        pool.give(heap);

        let heap = pool.take();
        assert!(heap.is_empty());
        assert!(heap.entries.capacity() >= 1);
    }

    #[test]
    fn load_rejects_bad_inputs() {
        let no_complement = |_: &[u8], _: u8| -> Result<[u8; 32]> { Err(Error::PointNotOnCurve) };
        let key = [4u8; 65];
        let sig: &[u8] = &[0x30, 0x06, 0x02, 0x01, 0x05, 0x02, 0x01, 0x07];
        let digest = [0u8; 32];
        let mut heap = BatchHeap::new();

        assert_matches!(
            heap.load(&[&key], &[sig, sig], &[&digest], no_complement),
            Err(Error::InputLengthMismatch { signatures: 2, digests: 1, public_keys: 1 })
        );
        assert_matches!(
            heap.load(&[&key[..64]], &[sig], &[&digest], no_complement),
            Err(Error::InvalidPublicKey)
        );
        assert_matches!(
            heap.load(&[&key], &[sig], &[&digest[..31]], no_complement),
            Err(Error::InvalidDigest)
        );
        assert_matches!(
            heap.load(&[&key, &key[..33]], &[sig, sig], &[&digest, &digest], no_complement),
            Err(Error::InvalidPublicKey)
        );

        let mut compressed = [0u8; 33];
        compressed[0] = 3;
        assert_matches!(
            heap.load(&[&key, &compressed], &[sig, sig], &[&digest, &digest], no_complement),
            Err(Error::PointNotOnCurve)
        );
        assert!(heap.is_empty());

        heap.load(&[&key], &[sig], &[&digest], no_complement).unwrap();
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.entries[0].r[31], 5);
        assert_eq!(heap.finish(|_| false), Err(Error::VerificationFailed { index: 0 }));
        assert!(heap.is_empty());
    }
}
