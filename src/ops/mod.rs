//! Operation modules - resolution, decoding, correction, lookup

pub mod decode;
pub mod fix;
pub mod resolve;
pub mod search;

pub use resolve::{ResolveError, Resolver};
