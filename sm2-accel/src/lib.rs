#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc = include_str!("../README.md")]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/RustCrypto/meta/master/logo.svg",
    html_favicon_url = "https://raw.githubusercontent.com/RustCrypto/meta/master/logo.svg"
)]
#![deny(unsafe_code)]
#![warn(
    clippy::mod_module_files,
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::checked_conversions,
    clippy::implicit_saturating_sub,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::unwrap_used,
    missing_docs,
    rust_2018_idioms,
    unused_lifetimes,
    unused_qualifications
)]

pub mod codec;
pub mod config;
pub mod curve;
pub mod gateway;
pub mod lifecycle;
pub mod pack;
pub mod pool;
pub mod strategy;

mod error;

pub use crate::{
    codec::{compress_public_key, decode_signature, encode_signature},
    config::Config,
    error::{Error, Result},
    lifecycle::{
        initialize_accelerator, initialize_accelerator_from_env, is_accelerator_enabled,
        verify_batch_on_accelerator,
    },
};
pub use sm2;
