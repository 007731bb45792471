//! Typed values and the two encodings the storage layer is built on:
//!
//! * [`key`]: an order-preserving tuple encoding. Lexicographic comparison
//!   of encoded bytes matches typed comparison of the source tuples,
//!   honoring a per-column descending bitmap. Used for every KV key.
//! * [`field`]: a compact, self-delimiting value encoding. Used for row
//!   payloads, where ordering does not matter but lazy decoding does.
//!
//! Both build on the varints in [`varint`].

pub mod error;
pub mod field;
pub mod key;
pub mod value;
pub mod varint;

pub use error::{CastError, DecodeError};
pub use value::{DataType, Value};
