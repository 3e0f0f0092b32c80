//! Packing of verification records into the accelerator's word layout.
//!
//! Each signature becomes a 32-word record made of four 256-bit values:
//!
//! ```text
//! | s | t = (s + r) mod n | px | (r - e) mod n |
//! ```
//!
//! Every value is stored as eight 32-bit words, least significant word
//! first. Words are extracted from the big-endian encoding with shifts, so
//! the layout does not depend on the host's limb width.

use crate::{Error, Result, codec::decode_signature, curve::{self, FIELD_BYTES}};
use elliptic_curve::{PrimeField, ops::Reduce};
use sm2::{FieldBytes, Scalar, U256};

/// Number of 32-bit words holding one 256-bit value.
pub const WORDS_PER_VALUE: usize = 8;

/// Number of 32-bit words holding one verification record.
pub const WORDS_PER_RECORD: usize = 4 * WORDS_PER_VALUE;

/// Convert a big-endian integer of any length into eight little-endian
/// ordered words.
///
/// Fails with [`Error::ValueOutOfRange`] if the value needs more than 256 bits.
pub fn words_from_be_bytes(bytes: &[u8]) -> Result<[u32; WORDS_PER_VALUE]> {
    let bytes = curve::to_field_bytes(bytes).ok_or(Error::ValueOutOfRange)?;
    let mut words = [0u32; WORDS_PER_VALUE];
    write_words(&bytes, &mut words);
    Ok(words)
}

/// Convert eight little-endian ordered words back into a big-endian integer.
///
/// Missing trailing words are treated as zero.
pub fn be_bytes_from_words(words: &[u32]) -> [u8; FIELD_BYTES] {
    let mut bytes = [0u8; FIELD_BYTES];
    for (chunk, word) in bytes.rchunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    bytes
}

/// Pack a single verification record into `out`, which must hold exactly
/// [`WORDS_PER_RECORD`] words.
pub fn pack_record(
    signature: &[u8],
    digest: &[u8],
    public_key_x: &[u8],
    out: &mut [u32],
) -> Result<()> {
    if out.len() != WORDS_PER_RECORD {
        return Err(Error::BufferTooSmall {
            needed: WORDS_PER_RECORD,
            available: out.len(),
        });
    }

    let (r, s) = decode_signature(signature)?;
    let s = curve::to_field_bytes(s).ok_or(Error::ValueOutOfRange)?;
    let r = curve::to_field_bytes(r).ok_or(Error::ValueOutOfRange)?;
    let px = curve::to_field_bytes(public_key_x).ok_or(Error::ValueOutOfRange)?;
    let e = curve::to_field_bytes(digest).ok_or(Error::ValueOutOfRange)?;

    let r_scalar = reduce(&r);
    let t = (reduce(&s) + r_scalar).to_repr();
    let true_x = (r_scalar - reduce(&e)).to_repr();

    let (s_out, rest) = out.split_at_mut(WORDS_PER_VALUE);
    let (t_out, rest) = rest.split_at_mut(WORDS_PER_VALUE);
    let (px_out, x_out) = rest.split_at_mut(WORDS_PER_VALUE);
    write_words(&s, s_out);
    write_words(&t, t_out);
    write_words(&px, px_out);
    write_words(&true_x, x_out);
    Ok(())
}

/// Pack a batch of records into the front of `out`.
///
/// `out` must hold at least `WORDS_PER_RECORD * signatures.len()` words;
/// words past that extent are left untouched.
pub fn pack_batch<S, D, P>(
    signatures: &[S],
    digests: &[D],
    public_key_xs: &[P],
    out: &mut [u32],
) -> Result<()>
where
    S: AsRef<[u8]>,
    D: AsRef<[u8]>,
    P: AsRef<[u8]>,
{
    check_lengths(signatures.len(), digests.len(), public_key_xs.len())?;

    let needed = packed_len(signatures.len())?;
    let available = out.len();
    let out = out
        .get_mut(..needed)
        .ok_or(Error::BufferTooSmall { needed, available })?;

    for (((record, signature), digest), public_key_x) in out
        .chunks_exact_mut(WORDS_PER_RECORD)
        .zip(signatures)
        .zip(digests)
        .zip(public_key_xs)
    {
        pack_record(
            signature.as_ref(),
            digest.as_ref(),
            public_key_x.as_ref(),
            record,
        )?;
    }

    Ok(())
}

/// Number of words needed to pack `count` records.
pub fn packed_len(count: usize) -> Result<usize> {
    count
        .checked_mul(WORDS_PER_RECORD)
        .ok_or(Error::BatchTooLarge(count))
}

pub(crate) fn check_lengths(signatures: usize, digests: usize, public_keys: usize) -> Result<()> {
    if signatures == digests && digests == public_keys {
        Ok(())
    } else {
        Err(Error::InputLengthMismatch {
            signatures,
            digests,
            public_keys,
        })
    }
}

fn reduce(bytes: &[u8; FIELD_BYTES]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(*bytes))
}

fn write_words(bytes: &[u8], out: &mut [u32]) {
    for (word, chunk) in out.iter_mut().zip(bytes.rchunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}
