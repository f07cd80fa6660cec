//! Bucket backends.
//!
//! The [`backend::ObjectBackend`] trait abstracts over the bucket the
//! services talk to.  Implementations include Google Cloud Storage (via the
//! credential sidecar) and an in-memory bucket.

pub mod backend;
pub mod gcs;
pub mod memory;
