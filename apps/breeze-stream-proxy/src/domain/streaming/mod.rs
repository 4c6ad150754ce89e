//! Market Data Streaming Types
//!
//! Raw feed ticks and the canonical quote record they normalize into.

mod normalize;
mod quote;
mod tick;

pub use normalize::{normalize, parse_decimal};
pub use quote::NormalizedQuote;
pub use tick::Tick;
