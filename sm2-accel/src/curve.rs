//! SM2 curve descriptor.
//!
//! Curve parameters can be found in [draft-shen-sm2-ecdsa Appendix D]:
//! Recommended Parameters.
//!
//! [draft-shen-sm2-ecdsa Appendix D]: https://datatracker.ietf.org/doc/html/draft-shen-sm2-ecdsa-02#appendix-D

use hex_literal::hex;

/// Size in bytes of a serialized field element or scalar.
pub const FIELD_BYTES: usize = 32;

/// Order of SM2's elliptic curve group (i.e. scalar modulus), big endian.
pub const ORDER: [u8; FIELD_BYTES] =
    hex!("FFFFFFFEFFFFFFFFFFFFFFFFFFFFFFFF7203DF6B21C6052B53BBF40939D54123");

/// Parameters of a short Weierstrass curve `y² = x³ + ax + b` over `GF(p)`.
///
/// All values are big-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurveParams {
    /// Curve name.
    pub name: &'static str,
    /// Size of the base field in bits.
    pub bit_size: usize,
    /// Field modulus.
    pub p: [u8; FIELD_BYTES],
    /// Group order.
    pub n: [u8; FIELD_BYTES],
    /// Equation coefficient `a`.
    pub a: [u8; FIELD_BYTES],
    /// Equation coefficient `b`.
    pub b: [u8; FIELD_BYTES],
    /// Base point x-coordinate.
    pub gx: [u8; FIELD_BYTES],
    /// Base point y-coordinate.
    pub gy: [u8; FIELD_BYTES],
}

/// SM2 recommended curve.
pub const SM2P256V1: CurveParams = CurveParams {
    name: "SM2",
    bit_size: 256,
    p: hex!("FFFFFFFEFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF00000000FFFFFFFFFFFFFFFF"),
    n: ORDER,
    // a = -3
    a: hex!("FFFFFFFEFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF00000000FFFFFFFFFFFFFFFC"),
    b: hex!("28E9FA9E9D9F5E344D5A9E4BCF6509A7F39789F515AB8F92DDBCBD414D940E93"),
    gx: hex!("32C4AE2C1F1981195F9904466A39C9948FE30BBFF2660BE1715A4589334C74C7"),
    gy: hex!("BC3736A2F4F6779C59BDCEE36B692153D0A9877CC62A474002DF32E52139F0A0"),
};

/// Strip leading zero bytes from a big-endian integer.
///
/// Returns an empty slice for an empty or all-zero input.
pub(crate) fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Left-pad a big-endian integer to [`FIELD_BYTES`].
///
/// Returns `None` when the value has more than 256 significant bits.
pub(crate) fn to_field_bytes(bytes: &[u8]) -> Option<[u8; FIELD_BYTES]> {
    let bytes = trim_leading_zeros(bytes);
    let offset = FIELD_BYTES.checked_sub(bytes.len())?;
    let mut out = [0u8; FIELD_BYTES];
    out[offset..].copy_from_slice(bytes);
    Some(out)
}
