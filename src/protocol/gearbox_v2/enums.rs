use strum_macros::Display;

/// Price feed types of the Gearbox V2 price oracle, as reported by `priceFeedType()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum PriceFeedType {
    Chainlink = 0,
    Yearn = 1,
    CurveLP2 = 2,
    CurveLP3 = 3,
    CurveLP4 = 4,
    Zero = 5,
    Wsteth = 6,
    Bounded = 7,
    CompositeEth = 8,
}

impl std::convert::TryFrom<u8> for PriceFeedType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => PriceFeedType::Chainlink,
            1 => PriceFeedType::Yearn,
            2 => PriceFeedType::CurveLP2,
            3 => PriceFeedType::CurveLP3,
            4 => PriceFeedType::CurveLP4,
            5 => PriceFeedType::Zero,
            6 => PriceFeedType::Wsteth,
            7 => PriceFeedType::Bounded,
            8 => PriceFeedType::CompositeEth,
            other => return Err(other),
        })
    }
}
