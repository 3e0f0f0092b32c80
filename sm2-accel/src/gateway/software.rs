//! CPU implementation of the packed-record kernel.

use super::{Accelerator, STATUS_FAILED, STATUS_OK, record_extent};
use crate::pack::{WORDS_PER_RECORD, WORDS_PER_VALUE, be_bytes_from_words};
use elliptic_curve::{
    PrimeField,
    group::Group,
    ops::Reduce,
    point::{AffineCoordinates, DecompressPoint},
    subtle::Choice,
};
use log::trace;
use sm2::{AffinePoint, FieldBytes, ProjectivePoint, Scalar, U256};

/// Accelerator evaluating packed records on the host CPU.
///
/// A record only carries the x-coordinate of the public key, so both of its
/// lifts are tried: a record verifies if `x(s·G + t·P) mod n` equals the
/// packed `(r - e) mod n` for either `P`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareAccelerator;

impl SoftwareAccelerator {
    /// Create the accelerator.
    pub const fn new() -> Self {
        Self
    }

    /// Evaluate one packed record, returning its status byte.
    pub fn verify_record(record: &[u32]) -> u8 {
        if record.len() == WORDS_PER_RECORD && check_record(record) {
            STATUS_OK
        } else {
            STATUS_FAILED
        }
    }
}

impl Accelerator for SoftwareAccelerator {
    fn initialize(&self) -> crate::Result<()> {
        Ok(())
    }

    fn batch_verify(&self, words: &[u32], status: &mut [u8]) -> crate::Result<()> {
        let words = record_extent(words, status)?;
        for (record, status) in words.chunks_exact(WORDS_PER_RECORD).zip(status.iter_mut()) {
            *status = Self::verify_record(record);
        }
        trace!("software kernel checked {} records", status.len());
        Ok(())
    }
}

fn check_record(record: &[u32]) -> bool {
    let mut values = record.chunks_exact(WORDS_PER_VALUE).map(be_bytes_from_words);
    let (Some(s), Some(t), Some(px), Some(true_x)) =
        (values.next(), values.next(), values.next(), values.next())
    else {
        return false;
    };

    let (Some(s), Some(t), Some(true_x)) = (nonzero(s), nonzero(t), canonical(true_x)) else {
        return false;
    };
    let px = FieldBytes::from(px);

    [0u8, 1].into_iter().any(|parity| {
        let point = AffinePoint::decompress(&px, Choice::from(parity));
        let Some(point) = Option::<AffinePoint>::from(point) else {
            return false;
        };
        let sum = ProjectivePoint::generator() * s + ProjectivePoint::from(point) * t;
        if bool::from(sum.is_identity()) {
            return false;
        }
        let x = <Scalar as Reduce<U256>>::reduce_bytes(&sum.to_affine().x());
        x == true_x
    })
}

fn canonical(bytes: [u8; 32]) -> Option<Scalar> {
    Scalar::from_repr(FieldBytes::from(bytes)).into()
}

fn nonzero(bytes: [u8; 32]) -> Option<Scalar> {
    canonical(bytes).filter(|scalar| !bool::from(scalar.is_zero()))
}
