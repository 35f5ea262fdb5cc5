use alloy_primitives::{I256, U256};

use crate::snapshot::{FieldValue, Snapshot};

/// Chainlink round data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundData {
    pub round_id: U256,
    pub answer: I256,
    pub started_at: U256,
    pub updated_at: U256,
    pub answered_in_round: U256,
}

impl RoundData {
    pub fn as_tuple(&self) -> (U256, I256, U256, U256, U256) {
        (self.round_id, self.answer, self.started_at, self.updated_at, self.answered_in_round)
    }
}

impl From<(U256, I256, U256, U256, U256)> for RoundData {
    fn from(
        (round_id, answer, started_at, updated_at, answered_in_round): (U256, I256, U256, U256, U256),
    ) -> Self {
        Self { round_id, answer, started_at, updated_at, answered_in_round }
    }
}

/// Latest rounds of the tracked collateral feeds, in tracked collateral order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GearboxV2State {
    pub rounds: Vec<RoundData>,
}

impl GearboxV2State {
    fn column<T: Copy>(&self, f: impl Fn(&RoundData) -> T) -> Vec<T> {
        self.rounds.iter().map(f).collect()
    }
}

impl Snapshot for GearboxV2State {
    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("roundId", FieldValue::uints(&self.column(|r| r.round_id))),
            ("answer", FieldValue::ints(&self.column(|r| r.answer))),
            ("startedAt", FieldValue::uints(&self.column(|r| r.started_at))),
            ("updatedAt", FieldValue::uints(&self.column(|r| r.updated_at))),
            ("answeredInRound", FieldValue::uints(&self.column(|r| r.answered_in_round))),
        ]
    }
}
