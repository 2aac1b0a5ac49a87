//! Network and object-store I/O.

pub mod blob;
pub mod download;
