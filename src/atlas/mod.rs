//! Grid layout planning and the shared composite surface.

/// Grid packing of source rectangles into one composite surface.
pub mod layout;
/// The composite render target and its host-visible staging buffer.
pub mod surface;
