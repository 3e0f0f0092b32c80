//! Signature and public key encodings.
//!
//! Signatures travel as ASN.1 DER `SEQUENCE { INTEGER r, INTEGER s }`.
//! Decoding is lenient about the outer structure: only the
//! length octet of `r` is consulted, and `s` is everything after its own
//! two-octet header. Every slice bound is checked, so truncated input is a
//! [`Error::MalformedSignature`] rather than a panic.

use crate::{Error, Result, curve::{self, FIELD_BYTES}};
use der::{
    DecodeValue, Encode, EncodeValue, Header, Length, Reader, Sequence, Writer, asn1::UintRef,
};

/// Offset of the length octet of `r`.
const R_LENGTH_OFFSET: usize = 3;

/// Offset of the first octet of `r`.
const R_OFFSET: usize = 4;

/// Tag and length octets preceding `s`.
const S_HEADER_LEN: usize = 2;

/// Size of a SEC1 compressed point.
pub const COMPRESSED_POINT_SIZE: usize = FIELD_BYTES + 1;

/// Split an encoded signature into its big-endian `r` and `s` components.
///
/// Leading zero octets are removed from both components; a component made
/// only of zero octets decodes to the single octet `0x00`.
pub fn decode_signature(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let r_len = usize::from(*bytes.get(R_LENGTH_OFFSET).ok_or(Error::MalformedSignature)?);
    let r_end = R_OFFSET + r_len;
    let r = bytes.get(R_OFFSET..r_end).ok_or(Error::MalformedSignature)?;
    let s = bytes
        .get(r_end + S_HEADER_LEN..)
        .ok_or(Error::MalformedSignature)?;

    Ok((trim_component(r)?, trim_component(s)?))
}

/// Encode big-endian `r` and `s` components as a DER signature.
///
/// Each component is written in its minimal form; an empty component is
/// treated as zero.
pub fn encode_signature(r: &[u8], s: &[u8]) -> Result<Vec<u8>> {
    let sig = SignatureRef {
        r: uint_ref(r)?,
        s: uint_ref(s)?,
    };
    sig.to_der().map_err(|_| Error::MalformedSignature)
}

/// Encode an x-coordinate and the parity of its y-coordinate as a SEC1
/// compressed point.
pub fn compress_public_key(x: &[u8], y_parity: u8) -> Result<[u8; COMPRESSED_POINT_SIZE]> {
    let x = curve::to_field_bytes(x).ok_or(Error::ValueOutOfRange)?;
    let mut out = [0u8; COMPRESSED_POINT_SIZE];
    out[0] = 0x02 | (y_parity & 1);
    out[1..].copy_from_slice(&x);
    Ok(out)
}

fn trim_component(bytes: &[u8]) -> Result<&[u8]> {
    match bytes.iter().position(|&b| b != 0) {
        Some(start) => Ok(&bytes[start..]),
        None => bytes
            .len()
            .checked_sub(1)
            .map(|last| &bytes[last..])
            .ok_or(Error::MalformedSignature),
    }
}

fn uint_ref(bytes: &[u8]) -> Result<UintRef<'_>> {
    let bytes = match curve::trim_leading_zeros(bytes) {
        [] => &[0u8][..],
        trimmed => trimmed,
    };
    UintRef::new(bytes).map_err(|_| Error::MalformedSignature)
}

struct SignatureRef<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

impl EncodeValue for SignatureRef<'_> {
    fn value_len(&self) -> der::Result<Length> {
        self.r.encoded_len()? + self.s.encoded_len()?
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        self.r.encode(writer)?;
        self.s.encode(writer)?;
        Ok(())
    }
}

impl<'a> DecodeValue<'a> for SignatureRef<'a> {
    fn decode_value<R: Reader<'a>>(reader: &mut R, _header: Header) -> der::Result<Self> {
        Ok(Self {
            r: reader.decode()?,
            s: reader.decode()?,
        })
    }
}

impl<'a> Sequence<'a> for SignatureRef<'a> {}
