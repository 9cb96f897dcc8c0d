//! Transformations from fetched HTML into plain text.

pub mod html;
