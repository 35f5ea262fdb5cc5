use alloy_primitives::U256;

use crate::snapshot::{FieldValue, Snapshot};

/// Curve V2 pool state needed to value an LP position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveV2State {
    pub balances: Vec<U256>,
    pub d: U256,
    /// Initial and future packed A and gamma, then their ramp timestamps.
    pub a_gamma: [U256; 4],
    /// Packed oracle prices of coins `1..n` against coin 0.
    pub prices: Vec<U256>,
    pub total_supply: U256,
}

impl Snapshot for CurveV2State {
    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("balances", FieldValue::uints(&self.balances)),
            ("D", FieldValue::Uint(self.d)),
            ("A_gamma", FieldValue::uints(&self.a_gamma)),
            ("prices", FieldValue::uints(&self.prices)),
            ("total_supply", FieldValue::Uint(self.total_supply)),
        ]
    }
}
