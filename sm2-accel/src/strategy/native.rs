//! Native-word family backed by the `sm2` crate.

use super::{BatchEntry, BatchHeap, HeapPool, SignedDigest, Strategy, digest_bytes, secret_bytes};
use crate::{Error, Result, codec, curve::{self, CurveParams, FIELD_BYTES, SM2P256V1}};
use elliptic_curve::{
    PrimeField,
    group::Group,
    ops::Reduce,
    point::{AffineCoordinates, DecompressPoint},
    sec1::{FromEncodedPoint, ToEncodedPoint},
    subtle::Choice,
};
use rand_core::CryptoRngCore;
use sm2::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256};

static HEAPS: HeapPool = HeapPool::new();

/// Strategy family using the constant-time field and scalar arithmetic of
/// the [`sm2`] crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct Native;

impl Strategy for Native {
    fn name(&self) -> &'static str {
        "native"
    }

    fn curve(&self) -> &'static CurveParams {
        &SM2P256V1
    }

    fn sign(
        &self,
        digest: &[u8],
        rng: &mut dyn CryptoRngCore,
        secret_key: &[u8],
    ) -> Result<SignedDigest> {
        let e = reduce(&FieldBytes::from(digest_bytes(digest)?));
        let d = nonzero_scalar(&secret_bytes(secret_key)?).ok_or(Error::InvalidSecretKey)?;
        let d_plus_one_inv =
            Option::<Scalar>::from((d + Scalar::ONE).invert()).ok_or(Error::InvalidSecretKey)?;

        loop {
            let k = random_scalar(rng);
            let point = (ProjectivePoint::generator() * k).to_affine();

            let r = e + reduce(&point.x());
            if bool::from(r.is_zero()) || bool::from((r + k).is_zero()) {
                continue;
            }

            let s = d_plus_one_inv * (k - r * d);
            if bool::from(s.is_zero()) {
                continue;
            }

            return Ok(SignedDigest {
                signature: codec::encode_signature(&r.to_repr(), &s.to_repr())?,
                y_parity: point.y_is_odd().unwrap_u8(),
            });
        }
    }

    fn verify(&self, signature: &[u8], digest: &[u8], x: &[u8], y: &[u8]) -> Result<bool> {
        let x = curve::to_field_bytes(x).ok_or(Error::InvalidPublicKey)?;
        let y = curve::to_field_bytes(y).ok_or(Error::InvalidPublicKey)?;
        let public_key = affine_point(&x, &y).ok_or(Error::InvalidPublicKey)?;
        let (r, s) = codec::decode_signature(signature)?;
        let e = digest_bytes(digest)?;

        let (Some(r), Some(s)) = (curve::to_field_bytes(r), curve::to_field_bytes(s)) else {
            return Ok(false);
        };
        Ok(verify_prehashed(&public_key, &r, &s, &e))
    }

    fn get_batch_heap(&self) -> BatchHeap {
        HEAPS.take()
    }

    fn put_batch_heap(&self, heap: BatchHeap) {
        HEAPS.give(heap);
    }

    fn batch_verify_init(
        &self,
        heap: &mut BatchHeap,
        public_keys: &[&[u8]],
        signatures: &[&[u8]],
        digests: &[&[u8]],
    ) -> Result<()> {
        heap.load(public_keys, signatures, digests, |x, parity| {
            self.complement_coordinates(x, parity)
        })
    }

    fn batch_verify_end(&self, heap: &mut BatchHeap) -> Result<()> {
        heap.finish(verify_entry)
    }

    fn complement_coordinates(&self, x: &[u8], y_parity: u8) -> Result<[u8; FIELD_BYTES]> {
        let x = curve::to_field_bytes(x).ok_or(Error::PointNotOnCurve)?;
        let point = AffinePoint::decompress(&FieldBytes::from(x), Choice::from(y_parity & 1));
        let point = Option::<AffinePoint>::from(point).ok_or(Error::PointNotOnCurve)?;

        let encoded = point.to_encoded_point(false);
        let y = encoded.y().ok_or(Error::PointNotOnCurve)?;
        let mut out = [0u8; FIELD_BYTES];
        out.copy_from_slice(y);
        Ok(out)
    }
}

fn verify_entry(entry: &BatchEntry) -> bool {
    affine_point(&entry.x, &entry.y)
        .is_some_and(|public_key| verify_prehashed(&public_key, &entry.r, &entry.s, &entry.e))
}

/// `(e + x(s·G + (r + s)·P)) mod n == r`, with `r` and `s` in `[1, n)`.
fn verify_prehashed(
    public_key: &AffinePoint,
    r: &[u8; FIELD_BYTES],
    s: &[u8; FIELD_BYTES],
    e: &[u8; FIELD_BYTES],
) -> bool {
    let (Some(r), Some(s)) = (nonzero_scalar(r), nonzero_scalar(s)) else {
        return false;
    };
    let t = r + s;
    if bool::from(t.is_zero()) {
        return false;
    }

    let sum = ProjectivePoint::generator() * s + ProjectivePoint::from(*public_key) * t;
    if bool::from(sum.is_identity()) {
        return false;
    }
    reduce(&FieldBytes::from(*e)) + reduce(&sum.to_affine().x()) == r
}

fn affine_point(x: &[u8; FIELD_BYTES], y: &[u8; FIELD_BYTES]) -> Option<AffinePoint> {
    let encoded =
        EncodedPoint::from_affine_coordinates(&FieldBytes::from(*x), &FieldBytes::from(*y), false);
    AffinePoint::from_encoded_point(&encoded).into()
}

fn nonzero_scalar(bytes: &[u8; FIELD_BYTES]) -> Option<Scalar> {
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(*bytes)))
        .filter(|scalar| !bool::from(scalar.is_zero()))
}

fn reduce(bytes: &FieldBytes) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(bytes)
}

/// Draw a scalar in `[1, n)` by rejection sampling 32-byte strings.
fn random_scalar(rng: &mut dyn CryptoRngCore) -> Scalar {
    loop {
        let mut bytes = [0u8; FIELD_BYTES];
        rng.fill_bytes(&mut bytes);
        if let Some(k) = nonzero_scalar(&bytes) {
            return k;
        }
    }
}
