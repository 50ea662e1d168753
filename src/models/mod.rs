//! Identifiers and the compact bundle encoding shared by the storage and
//! index layers.

pub mod bundle_codec;
pub mod ids;
