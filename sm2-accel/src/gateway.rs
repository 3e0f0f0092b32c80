//! Accelerator backends.
//!
//! An [`Accelerator`] consumes the packed word layout produced by
//! [`crate::pack`] and reports one status byte per signature: `0` when the
//! signature verified, any other value when it did not.

mod plugin;
mod software;

pub use self::{plugin::{INIT_SYMBOL, Plugin, VERIFY_SYMBOL}, software::SoftwareAccelerator};

use crate::{Error, Result, pack::packed_len};

/// Status reported for a signature that verified.
pub const STATUS_OK: u8 = 0;

/// Status reported by [`SoftwareAccelerator`] for a signature that did not
/// verify. Other accelerators may use any nonzero value.
pub const STATUS_FAILED: u8 = 1;

/// Batch verification backend bound through the plugin ABI.
pub trait Accelerator: Send + Sync {
    /// Prepare the device. Called once before any batch.
    fn initialize(&self) -> Result<()>;

    /// Verify `status.len()` packed records held in `words`.
    ///
    /// `words` holds [`WORDS_PER_RECORD`](crate::pack::WORDS_PER_RECORD)
    /// words per record; words past `status.len()` records are ignored.
    /// `words` is never written to. The call blocks until every status is
    /// written.
    fn batch_verify(&self, words: &[u32], status: &mut [u8]) -> Result<()>;
}

impl<A: Accelerator + ?Sized> Accelerator for Box<A> {
    fn initialize(&self) -> Result<()> {
        (**self).initialize()
    }

    fn batch_verify(&self, words: &[u32], status: &mut [u8]) -> Result<()> {
        (**self).batch_verify(words, status)
    }
}

/// Slice the records covered by `status` out of `words`.
pub(crate) fn record_extent<'w>(words: &'w [u32], status: &[u8]) -> Result<&'w [u32]> {
    let needed = packed_len(status.len())?;
    words.get(..needed).ok_or(Error::BufferTooSmall {
        needed,
        available: words.len(),
    })
}
