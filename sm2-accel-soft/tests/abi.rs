//! Exercises the exported entry points directly and through the gateway.

use sm2_accel::{
    gateway::{Accelerator, Plugin, STATUS_FAILED, STATUS_OK},
    lifecycle::{Lifecycle, SELF_TEST_VECTORS, State},
    pack::{pack_batch, packed_len},
};
use sm2_accel_soft::{init_sm2cuda, sm2ver_cuda};
use std::{env, ffi::c_int, path::PathBuf};

fn packed_vectors() -> Vec<u32> {
    let signatures = SELF_TEST_VECTORS.map(|v| v.signature);
    let digests = SELF_TEST_VECTORS.map(|v| v.digest);
    let xs = SELF_TEST_VECTORS.map(|v| v.public_key_x);
    let mut words = vec![0; packed_len(SELF_TEST_VECTORS.len()).unwrap()];
    pack_batch(&signatures, &digests, &xs, &mut words).unwrap();
    words
}

fn verify(words: &mut [u32], count: usize) -> Vec<u8> {
    let mut status = vec![0xee; count];
    let num = c_int::try_from(count).unwrap();
    unsafe { sm2ver_cuda(words.as_mut_ptr(), num, status.as_mut_ptr()) };
    status
}

/// Locate the cdylib built alongside the test binary, if any.
fn built_plugin() -> Option<PathBuf> {
    let name = format!(
        "{}sm2_accel_soft{}",
        env::consts::DLL_PREFIX,
        env::consts::DLL_SUFFIX
    );
    let exe = env::current_exe().ok()?;
    // target/<profile>/deps/abi-<hash>
    let deps = exe.parent()?;
    [deps.join(&name), deps.parent()?.join(&name)]
        .into_iter()
        .find(|path| path.is_file())
}

#[test]
fn initializes() {
    assert_eq!(init_sm2cuda(), 0);
}

#[test]
fn verifies_self_test_vectors() {
    let mut words = packed_vectors();
    assert_eq!(verify(&mut words, 3), [STATUS_OK; 3]);
}

#[test]
fn reports_failures_per_record() {
    let mut words = packed_vectors();
    // corrupt (r - e) of the second record
    words[32 + 24] ^= 1;
    assert_eq!(verify(&mut words, 3), [STATUS_OK, STATUS_FAILED, STATUS_OK]);

    // only the requested prefix is evaluated
    let status = verify(&mut words, 1);
    assert_eq!(status, [STATUS_OK]);
}

#[test]
fn ignores_empty_and_null_calls() {
    let mut status = [0xee; 1];
    unsafe {
        sm2ver_cuda(std::ptr::null_mut(), 1, status.as_mut_ptr());
        sm2ver_cuda(packed_vectors().as_mut_ptr(), 0, status.as_mut_ptr());
        sm2ver_cuda(packed_vectors().as_mut_ptr(), -4, status.as_mut_ptr());
    }
    assert_eq!(status, [0xee]);
}

#[test]
fn loads_through_gateway() {
    let Some(path) = built_plugin() else {
        // cdylib artifacts are not always placed next to the test binary
        return;
    };

    let plugin = Plugin::load(&path).unwrap();
    plugin.initialize().unwrap();
    let mut status = [0xee; 3];
    plugin.batch_verify(&packed_vectors(), &mut status).unwrap();
    assert_eq!(status, [STATUS_OK; 3]);

    let lifecycle = Lifecycle::new();
    lifecycle.initialize(&path).unwrap();
    assert!(lifecycle.is_enabled());
    assert_eq!(lifecycle.state(), State::Active);
}
