//! Object storage backends.
//!
//! The [`backend::ObjectStore`] trait abstracts over the block-blob service
//! that finally holds the bytes.  Implementations are the Azure Blob REST
//! client and an in-process model used for development and tests.

pub mod azure;
pub mod backend;
pub mod memory;
pub mod sas;
