#![doc = include_str!("../README.md")]
#![warn(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::unwrap_used,
    missing_docs,
    rust_2018_idioms,
    unused_qualifications
)]

use log::{error, trace};
use sm2_accel::{
    gateway::{Accelerator, STATUS_FAILED, SoftwareAccelerator},
    pack::WORDS_PER_RECORD,
};
use std::{ffi::c_int, slice};

static KERNEL: SoftwareAccelerator = SoftwareAccelerator::new();

/// Prepare the accelerator. Returns `0` on success.
#[unsafe(no_mangle)]
pub extern "C" fn init_sm2cuda() -> c_int {
    match KERNEL.initialize() {
        Ok(()) => 0,
        Err(err) => {
            error!("software accelerator failed to initialize: {err}");
            1
        }
    }
}

/// Verify `num` packed records.
///
/// Writes `0` to `ret[i]` when record `i` verified and a nonzero status
/// otherwise. A non-positive `num` or a null pointer is a no-op.
///
/// # Safety
///
/// `data` must be valid for reads of `32 * num` words and `ret` valid for
/// writes of `num` bytes. The two regions must not overlap.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sm2ver_cuda(data: *mut u32, num: c_int, ret: *mut u8) {
    let Ok(count) = usize::try_from(num) else {
        return;
    };
    let Some(len) = count.checked_mul(WORDS_PER_RECORD) else {
        return;
    };
    if count == 0 || data.is_null() || ret.is_null() {
        return;
    }

    // SAFETY: upheld by the caller.
    let (words, status) = unsafe {
        (
            slice::from_raw_parts(data.cast_const(), len),
            slice::from_raw_parts_mut(ret, count),
        )
    };

    if let Err(err) = KERNEL.batch_verify(words, status) {
        error!("software accelerator rejected batch: {err}");
        status.fill(STATUS_FAILED);
    }
    trace!("verified {count} records");
}
