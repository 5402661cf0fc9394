//! Read-only helpers over `/sys`.

pub mod block;
