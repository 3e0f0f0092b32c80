//! Portable family on arbitrary-precision integers.
//!
//! Points are kept in Jacobian coordinates `(X, Y, Z)` representing the
//! affine point `(X/Z², Y/Z³)`; `Z = 0` is the point at infinity. Nothing
//! here is constant time.

use super::{BatchEntry, BatchHeap, HeapPool, SignedDigest, Strategy, digest_bytes, secret_bytes};
use crate::{Error, Result, codec, curve::{self, CurveParams, FIELD_BYTES, SM2P256V1}};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand_core::CryptoRngCore;
use std::sync::LazyLock;

static HEAPS: HeapPool = HeapPool::new();

static CURVE: LazyLock<Curve> = LazyLock::new(|| Curve::new(&SM2P256V1));

/// Strategy family using generic multi-precision arithmetic.
#[derive(Clone, Copy, Debug, Default)]
pub struct Portable;

impl Strategy for Portable {
    fn name(&self) -> &'static str {
        "portable"
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
        let curve = &*CURVE;
        let n = &curve.n;
        let e = BigUint::from_bytes_be(&digest_bytes(digest)?) % n;

        // d + 1 must be invertible, so d = n - 1 is excluded
        let d = BigUint::from_bytes_be(&secret_bytes(secret_key)?);
        if d.is_zero() || &d + 1u32 >= *n {
            return Err(Error::InvalidSecretKey);
        }
        let d_plus_one_inv = curve.invert_scalar(&(&d + 1u32));

        loop {
            let k = curve.random_scalar(rng);
            let Some((x1, y1)) = curve.to_affine(&curve.mul(&k, &curve.g)) else {
                continue;
            };

            let r = (&e + x1) % n;
            if r.is_zero() || &r + &k == *n {
                continue;
            }

            let rd = (&r * &d) % n;
            let s = (&d_plus_one_inv * ((&k + n - rd) % n)) % n;
            if s.is_zero() {
                continue;
            }

            return Ok(SignedDigest {
                signature: codec::encode_signature(&r.to_bytes_be(), &s.to_bytes_be())?,
                y_parity: u8::from(y1.bit(0)),
            });
        }
    }

    fn verify(&self, signature: &[u8], digest: &[u8], x: &[u8], y: &[u8]) -> Result<bool> {
        let curve = &*CURVE;
        let x = BigUint::from_bytes_be(&curve::to_field_bytes(x).ok_or(Error::InvalidPublicKey)?);
        let y = BigUint::from_bytes_be(&curve::to_field_bytes(y).ok_or(Error::InvalidPublicKey)?);
        if !curve.is_on_curve(&x, &y) {
            return Err(Error::InvalidPublicKey);
        }
        let (r, s) = codec::decode_signature(signature)?;
        let e = digest_bytes(digest)?;

        Ok(curve.verify(
            &Point::affine(x, y),
            &BigUint::from_bytes_be(r),
            &BigUint::from_bytes_be(s),
            &BigUint::from_bytes_be(&e),
        ))
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
        let curve = &*CURVE;
        heap.finish(|entry| curve.verify_entry(entry))
    }

    fn complement_coordinates(&self, x: &[u8], y_parity: u8) -> Result<[u8; FIELD_BYTES]> {
        let curve = &*CURVE;
        let x = BigUint::from_bytes_be(&curve::to_field_bytes(x).ok_or(Error::PointNotOnCurve)?);
        let y = curve.lift_x(&x, y_parity & 1 == 1).ok_or(Error::PointNotOnCurve)?;
        Ok(to_field_bytes(&y))
    }
}

#[derive(Clone, Debug)]
struct Point {
    x: BigUint,
    y: BigUint,
    z: BigUint,
}

impl Point {
    fn infinity() -> Self {
        Self {
            x: BigUint::one(),
            y: BigUint::one(),
            z: BigUint::zero(),
        }
    }

    fn affine(x: BigUint, y: BigUint) -> Self {
        Self {
            x,
            y,
            z: BigUint::one(),
        }
    }

    fn is_infinity(&self) -> bool {
        self.z.is_zero()
    }
}

/// Curve constants as big integers.
struct Curve {
    p: BigUint,
    n: BigUint,
    a: BigUint,
    b: BigUint,
    g: Point,
    /// `(p + 1) / 4`, the square root exponent for `p ≡ 3 (mod 4)`.
    sqrt_exp: BigUint,
}

impl Curve {
    fn new(params: &CurveParams) -> Self {
        let p = BigUint::from_bytes_be(&params.p);
        let sqrt_exp = (&p + 1u32) >> 2u32;
        Self {
            n: BigUint::from_bytes_be(&params.n),
            a: BigUint::from_bytes_be(&params.a),
            b: BigUint::from_bytes_be(&params.b),
            g: Point::affine(
                BigUint::from_bytes_be(&params.gx),
                BigUint::from_bytes_be(&params.gy),
            ),
            sqrt_exp,
            p,
        }
    }

    fn add_p(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + b) % &self.p
    }

    fn sub_p(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + &self.p - b) % &self.p
    }

    fn mul_p(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.p
    }

    fn invert_p(&self, a: &BigUint) -> BigUint {
        a.modpow(&(&self.p - 2u32), &self.p)
    }

    fn invert_scalar(&self, a: &BigUint) -> BigUint {
        a.modpow(&(&self.n - 2u32), &self.n)
    }

    /// `x³ + ax + b`
    fn rhs(&self, x: &BigUint) -> BigUint {
        let x2 = self.mul_p(x, x);
        let x3 = self.mul_p(&x2, x);
        let ax = self.mul_p(&self.a, x);
        self.add_p(&self.add_p(&x3, &ax), &self.b)
    }

    fn is_on_curve(&self, x: &BigUint, y: &BigUint) -> bool {
        x < &self.p && y < &self.p && self.mul_p(y, y) == self.rhs(x)
    }

    fn lift_x(&self, x: &BigUint, odd: bool) -> Option<BigUint> {
        if x >= &self.p {
            return None;
        }
        let rhs = self.rhs(x);
        let y = rhs.modpow(&self.sqrt_exp, &self.p);
        if self.mul_p(&y, &y) != rhs {
            return None;
        }
        if y.bit(0) == odd {
            Some(y)
        } else {
            Some((&self.p - y) % &self.p)
        }
    }

    fn double(&self, pt: &Point) -> Point {
        if pt.is_infinity() || pt.y.is_zero() {
            return Point::infinity();
        }
        let yy = self.mul_p(&pt.y, &pt.y);
        let zz = self.mul_p(&pt.z, &pt.z);
        let s = self.mul_p(&(&pt.x * 4u32), &yy);
        let xx = self.mul_p(&pt.x, &pt.x);
        let m = self.add_p(&(xx * 3u32), &self.mul_p(&self.a, &self.mul_p(&zz, &zz)));

        let x3 = self.sub_p(&self.mul_p(&m, &m), &((&s * 2u32) % &self.p));
        let y3 = self.sub_p(
            &self.mul_p(&m, &self.sub_p(&s, &x3)),
            &((self.mul_p(&yy, &yy) * 8u32) % &self.p),
        );
        let z3 = self.mul_p(&(&pt.y * 2u32), &pt.z);
        Point {
            x: x3,
            y: y3,
            z: z3,
        }
    }

    fn add(&self, p1: &Point, p2: &Point) -> Point {
        if p1.is_infinity() {
            return p2.clone();
        }
        if p2.is_infinity() {
            return p1.clone();
        }

        let z1z1 = self.mul_p(&p1.z, &p1.z);
        let z2z2 = self.mul_p(&p2.z, &p2.z);
        let u1 = self.mul_p(&p1.x, &z2z2);
        let u2 = self.mul_p(&p2.x, &z1z1);
        let s1 = self.mul_p(&p1.y, &self.mul_p(&p2.z, &z2z2));
        let s2 = self.mul_p(&p2.y, &self.mul_p(&p1.z, &z1z1));

        if u1 == u2 {
            return if s1 == s2 {
                self.double(p1)
            } else {
                Point::infinity()
            };
        }

        let h = self.sub_p(&u2, &u1);
        let r = self.sub_p(&s2, &s1);
        let hh = self.mul_p(&h, &h);
        let hhh = self.mul_p(&h, &hh);
        let v = self.mul_p(&u1, &hh);

        let x3 = self.sub_p(
            &self.sub_p(&self.mul_p(&r, &r), &hhh),
            &((&v * 2u32) % &self.p),
        );
        let y3 = self.sub_p(
            &self.mul_p(&r, &self.sub_p(&v, &x3)),
            &self.mul_p(&s1, &hhh),
        );
        let z3 = self.mul_p(&self.mul_p(&p1.z, &p2.z), &h);
        Point {
            x: x3,
            y: y3,
            z: z3,
        }
    }

    /// Left-to-right double-and-add.
    fn mul(&self, k: &BigUint, pt: &Point) -> Point {
        let mut acc = Point::infinity();
        for i in (0..k.bits()).rev() {
            acc = self.double(&acc);
            if k.bit(i) {
                acc = self.add(&acc, pt);
            }
        }
        acc
    }

    fn to_affine(&self, pt: &Point) -> Option<(BigUint, BigUint)> {
        if pt.is_infinity() {
            return None;
        }
        let z_inv = self.invert_p(&pt.z);
        let z_inv2 = self.mul_p(&z_inv, &z_inv);
        let x = self.mul_p(&pt.x, &z_inv2);
        let y = self.mul_p(&pt.y, &self.mul_p(&z_inv2, &z_inv));
        Some((x, y))
    }

    /// `(e + x(s·G + (r + s)·P)) mod n == r`, with `r` and `s` in `[1, n)`.
    fn verify(&self, public_key: &Point, r: &BigUint, s: &BigUint, e: &BigUint) -> bool {
        let n = &self.n;
        if r.is_zero() || s.is_zero() || r >= n || s >= n {
            return false;
        }
        let t = (r + s) % n;
        if t.is_zero() {
            return false;
        }

        let sum = self.add(&self.mul(s, &self.g), &self.mul(&t, public_key));
        let Some((x1, _)) = self.to_affine(&sum) else {
            return false;
        };
        (e + x1) % n == *r
    }

    fn verify_entry(&self, entry: &BatchEntry) -> bool {
        let x = BigUint::from_bytes_be(&entry.x);
        let y = BigUint::from_bytes_be(&entry.y);
        self.is_on_curve(&x, &y)
            && self.verify(
                &Point::affine(x, y),
                &BigUint::from_bytes_be(&entry.r),
                &BigUint::from_bytes_be(&entry.s),
                &BigUint::from_bytes_be(&entry.e),
            )
    }

    /// Draw a scalar in `[1, n)` by rejection sampling 32-byte strings.
    fn random_scalar(&self, rng: &mut dyn CryptoRngCore) -> BigUint {
        loop {
            let mut bytes = [0u8; FIELD_BYTES];
            rng.fill_bytes(&mut bytes);
            let k = BigUint::from_bytes_be(&bytes);
            if !k.is_zero() && k < self.n {
                return k;
            }
        }
    }
}

fn to_field_bytes(value: &BigUint) -> [u8; FIELD_BYTES] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; FIELD_BYTES];
    let offset = FIELD_BYTES.saturating_sub(bytes.len());
    out[offset..].copy_from_slice(&bytes[bytes.len().saturating_sub(FIELD_BYTES)..]);
    out
}
