//! Shared value types and the error taxonomy.

/// Core value types: ids, frame rate, pixel rectangles.
pub mod core;
/// The crate-wide error enum and result alias.
pub mod error;
