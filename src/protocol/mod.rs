//! Supported protocols
//!
//! Each protocol provides a [`ProtocolAdapter`](crate::runner::ProtocolAdapter) that reads its
//! reference contracts, mocks them and opens the strategy's position.
pub mod curve_v2;
pub mod gearbox_v2;
pub mod uniswap_v3;
