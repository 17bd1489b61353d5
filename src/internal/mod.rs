//! Internal implementation details of the allocator that are not part of the
//! public API.

pub(crate) mod assign;
pub(crate) mod builder;
pub(crate) mod cfg_opt;
pub(crate) mod edge_moves;
pub(crate) mod interval;
pub(crate) mod liveness;
pub(crate) mod move_resolver;
pub(crate) mod resolve;
pub(crate) mod verifier;
pub(crate) mod walker;
