//! Value types shared by the feed core, the protocols and the HTTP boundary.
//!
//! - [`enums`] — connection state, exchange segments, Dhan feed codes
//! - [`tick`] — [`SymbolKey`] and [`Tick`]
//!
//! Everything is re-exported at the module root.

pub mod enums;
pub mod tick;

pub use enums::*;
pub use tick::*;
