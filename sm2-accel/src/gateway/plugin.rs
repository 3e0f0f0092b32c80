//! Dynamically loaded accelerator modules.

#![allow(unsafe_code)]

use super::{Accelerator, record_extent};
use crate::{Error, Result};
use libloading::Library;
use log::{debug, info};
use std::{ffi::c_int, path::{Path, PathBuf}};

/// Entry point preparing the device: `int init_sm2cuda(void)`.
///
/// Returns `0` on success.
pub const INIT_SYMBOL: &str = "init_sm2cuda";

/// Entry point verifying a packed batch:
/// `void sm2ver_cuda(uint32_t *words, int count, unsigned char *status)`.
pub const VERIFY_SYMBOL: &str = "sm2ver_cuda";

type InitFn = unsafe extern "C" fn() -> c_int;
type VerifyFn = unsafe extern "C" fn(*mut u32, c_int, *mut u8);

/// Accelerator backed by a shared library exporting [`INIT_SYMBOL`] and
/// [`VERIFY_SYMBOL`].
///
/// The library stays mapped for as long as the handle lives.
#[derive(Debug)]
pub struct Plugin {
    init: InitFn,
    verify: VerifyFn,
    path: PathBuf,
    // dropped last: the entry points above point into it
    _library: Library,
}

impl Plugin {
    /// Open the shared library at `path` and resolve both entry points.
    ///
    /// Relative paths are resolved against the current directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let load_failed = |reason: String| Error::PluginLoadFailed {
            path: path.display().to_string(),
            reason,
        };

        let resolved = path
            .canonicalize()
            .map_err(|err| load_failed(err.to_string()))?;
        debug!("opening accelerator plugin {}", resolved.display());

        // SAFETY: opening a library runs its initialization routines. The
        // plugin path is operator configuration and is trusted as such.
        let library =
            unsafe { Library::new(&resolved) }.map_err(|err| load_failed(err.to_string()))?;

        // SAFETY: both signatures are fixed by the plugin ABI.
        let init = unsafe { resolve::<InitFn>(&library, INIT_SYMBOL)? };
        let verify = unsafe { resolve::<VerifyFn>(&library, VERIFY_SYMBOL)? };

        info!("loaded accelerator plugin {}", resolved.display());
        Ok(Self {
            init,
            verify,
            path: resolved,
            _library: library,
        })
    }

    /// Canonical path of the loaded library.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Accelerator for Plugin {
    fn initialize(&self) -> Result<()> {
        // SAFETY: `init` was resolved from the library owned by `self`.
        match unsafe { (self.init)() } {
            0 => Ok(()),
            status => Err(Error::AcceleratorInitFailed(status)),
        }
    }

    fn batch_verify(&self, words: &[u32], status: &mut [u8]) -> Result<()> {
        let words = record_extent(words, status)?;
        if status.is_empty() {
            return Ok(());
        }
        let count = c_int::try_from(status.len()).map_err(|_| Error::BatchTooLarge(status.len()))?;

        // SAFETY: `words` holds `count` full records and `status` holds
        // `count` bytes, as checked above. The ABI takes a mutable pointer
        // but the plugin only reads the words.
        unsafe { (self.verify)(words.as_ptr().cast_mut(), count, status.as_mut_ptr()) };
        Ok(())
    }
}

/// Copy a function pointer out of `library`.
///
/// # Safety
///
/// `T` must match the type of the exported symbol.
unsafe fn resolve<T: Copy>(library: &Library, symbol: &'static str) -> Result<T> {
    unsafe { library.get::<T>(symbol.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|err| Error::SymbolResolutionFailed {
            symbol,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn missing_file() {
        let err = Plugin::load("/nonexistent/libsm2-accel-missing.so").unwrap_err();
        assert_matches!(
            err,
            Error::PluginLoadFailed { ref path, .. } if path.ends_with("missing.so")
        );
    }

    #[test]
    fn not_a_library() {
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        assert_matches!(Plugin::load(manifest), Err(Error::PluginLoadFailed { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn library_without_entry_points() {
        let maps = std::fs::read_to_string("/proc/self/maps").unwrap_or_default();
        let Some(libc) = maps
            .lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .find(|path| path.contains("/libc.so") || path.contains("/libc-"))
        else {
            // statically linked test binary
            return;
        };

        assert_matches!(
            Plugin::load(libc),
            Err(Error::SymbolResolutionFailed { symbol: INIT_SYMBOL, .. })
        );
    }
}
