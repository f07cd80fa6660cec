//! HTTP handlers.
//!
//! `files` serves the public folder browser, `objects` the signed-URL,
//! ACL, upload and download endpoints.

pub mod files;
pub mod objects;

/// Header carrying the authenticated user id, set by the fronting proxy.
pub const USER_ID_HEADER: &str = "x-user-id";
