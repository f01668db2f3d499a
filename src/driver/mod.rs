mod base;

pub use base::*;

#[cfg(feature = "driver-bytes")]
mod bytes;
#[cfg(feature = "driver-bytes")]
pub use bytes::*;
