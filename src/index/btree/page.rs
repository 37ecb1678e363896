mod base;
mod header;
mod internal;
mod leaf;

pub use base::{AccessOp, TreePage, TreePageType, COMMON_HEADER_SIZE};
pub use header::HeaderPage;
pub use internal::{InternalPage, INTERNAL_HEADER_SIZE};
pub use leaf::{LeafPage, LEAF_HEADER_SIZE};
