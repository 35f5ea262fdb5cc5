use alloy_primitives::U256;

use crate::snapshot::{FieldValue, Snapshot};

/// Uniswap V3 pool state needed to value a position between two ticks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UniswapV3State {
    pub sqrt_price_x96: U256,
    /// Current tick. Kept for strategies, not written to mocks nor recorded.
    pub tick: i32,
    pub liquidity: u128,
    pub fee_growth_global0_x128: U256,
    pub fee_growth_global1_x128: U256,
    pub tick_lower_fee_growth_outside0_x128: U256,
    pub tick_lower_fee_growth_outside1_x128: U256,
    pub tick_upper_fee_growth_outside0_x128: U256,
    pub tick_upper_fee_growth_outside1_x128: U256,
}

impl Snapshot for UniswapV3State {
    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("sqrtPriceX96", FieldValue::Uint(self.sqrt_price_x96)),
            ("liquidity", FieldValue::Uint(U256::from(self.liquidity))),
            ("feeGrowthGlobal0X128", FieldValue::Uint(self.fee_growth_global0_x128)),
            ("feeGrowthGlobal1X128", FieldValue::Uint(self.fee_growth_global1_x128)),
            (
                "tickLowerFeeGrowthOutside0X128",
                FieldValue::Uint(self.tick_lower_fee_growth_outside0_x128),
            ),
            (
                "tickLowerFeeGrowthOutside1X128",
                FieldValue::Uint(self.tick_lower_fee_growth_outside1_x128),
            ),
            (
                "tickUpperFeeGrowthOutside0X128",
                FieldValue::Uint(self.tick_upper_fee_growth_outside0_x128),
            ),
            (
                "tickUpperFeeGrowthOutside1X128",
                FieldValue::Uint(self.tick_upper_fee_growth_outside1_x128),
            ),
        ]
    }
}
