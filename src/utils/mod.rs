// src/utils/mod.rs
mod codec;
mod sidecar;
mod string_encoding;

pub(crate) use codec::*;
pub(crate) use sidecar::*;
pub(crate) use string_encoding::*;
