//! Protocol state snapshots
//!
//! A snapshot is the named bundle of reference state read at one block. Snapshots are plain
//! values: writing one into mocks never depends on what was written before.
use std::fmt;

use alloy_primitives::{I256, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Uint(U256),
    Int(I256),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn uints(values: &[U256]) -> Self {
        FieldValue::List(
            values
                .iter()
                .copied()
                .map(FieldValue::Uint)
                .collect(),
        )
    }

    pub fn ints(values: &[I256]) -> Self {
        FieldValue::List(
            values
                .iter()
                .copied()
                .map(FieldValue::Int)
                .collect(),
        )
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Uint(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::List(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

pub trait Snapshot: fmt::Debug {
    /// Named fields in declaration order.
    fn fields(&self) -> Vec<(&'static str, FieldValue)>;
}

/// Flattens a recorded row into column names and values.
///
/// Columns are `number`, `value`, every scalar field in order, then every list field expanded to
/// `<name><index>`.
pub fn flatten_row(number: u64, value: U256, snapshot: &dyn Snapshot) -> Vec<(String, String)> {
    let mut scalars = vec![
        ("number".to_string(), number.to_string()),
        ("value".to_string(), value.to_string()),
    ];
    let mut lists = Vec::new();
    for (name, field) in snapshot.fields() {
        match field {
            FieldValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    lists.push((format!("{}{}", name, i), item.to_string()));
                }
            }
            scalar => scalars.push((name.to_string(), scalar.to_string())),
        }
    }
    scalars.extend(lists);
    scalars
}
