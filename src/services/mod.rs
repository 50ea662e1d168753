//! Core services: on-disk staging and storage, the bundle index and its
//! key-value backend, the upload pipeline and the retention sweeper.

pub mod bundle_index;
pub mod kv_store;
pub mod log_service;
mod partial_file;
pub mod promotion;
pub mod retention;
pub mod storage_service;
