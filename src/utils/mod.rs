//! Shared numeric helpers

pub mod linalg;
