//! Logical key ranges and their translation to engine byte ranges.

use crate::error::{Error, Result};
use basalt_codec::key::{encode_tuple, prefix_successor};
use basalt_codec::{DataType, Value};
use basalt_primitives::SortOrder;
use std::ops::Bound;

/// A range over key tuples, in *key order*: for a descending column,
/// "min" means first in index order, not numerically smallest.
///
/// Bounds may be partial tuples: `min = [2]` over a two-column key covers
/// every tuple whose first component is `>= 2`. `exclusive` excludes both
/// endpoints (including every completion of a partial bound). `exact`
/// pins the range to the completions of `min` and requires `max` to be
/// unset.
#[derive(Debug, Clone, Default)]
pub struct Range {
    pub min: Option<Vec<Value>>,
    pub max: Option<Vec<Value>>,
    pub exclusive: bool,
    pub exact: bool,
}

impl Range {
    /// The full keyspace of the relation.
    pub fn all() -> Range {
        Range::default()
    }

    /// Exactly the tuples starting with `values`.
    pub fn exact(values: Vec<Value>) -> Range {
        Range {
            min: Some(values),
            max: None,
            exclusive: false,
            exact: true,
        }
    }

    pub fn between(min: Vec<Value>, max: Vec<Value>) -> Range {
        Range {
            min: Some(min),
            max: Some(max),
            exclusive: false,
            exact: false,
        }
    }

    /// Translates the range into engine byte bounds under `prefix`.
    ///
    /// `types` are the declared column types of the key; bound values are
    /// implicitly converted to them, widening fractional doubles over
    /// integer columns (lower bounds round away from the range, upper
    /// bounds round into it, and exclusivity is adjusted so the widened
    /// bound is equivalent to the original one).
    pub(crate) fn to_kv_bounds(
        &self,
        prefix: &[u8],
        types: &[DataType],
        sort_order: SortOrder,
    ) -> Result<(Bound<Vec<u8>>, Bound<Vec<u8>>)> {
        if self.exact && self.max.is_some() {
            return Err(Error::InvalidRange("exact range cannot carry a max bound"));
        }
        if self.exact && self.exclusive {
            return Err(Error::InvalidRange("exact range cannot be exclusive"));
        }

        let lo = match &self.min {
            None => Bound::Included(prefix.to_vec()),
            Some(values) => {
                let (encoded, inclusive) =
                    encode_bound(prefix, values, types, sort_order, true, !self.exclusive)?;
                if inclusive {
                    Bound::Included(encoded)
                } else {
                    // Skip every completion of the excluded prefix.
                    match prefix_successor(&encoded) {
                        Some(next) => Bound::Included(next),
                        None => return Ok(empty_bounds(prefix)),
                    }
                }
            }
        };

        let hi_values = if self.exact { &self.min } else { &self.max };
        let hi = match hi_values {
            None if self.exact => unreachable!("exact range always has min"),
            None => match prefix_successor(prefix) {
                Some(next) => Bound::Excluded(next),
                None => Bound::Unbounded,
            },
            Some(values) => {
                let inclusive = self.exact || !self.exclusive;
                let (encoded, inclusive) =
                    encode_bound(prefix, values, types, sort_order, false, inclusive)?;
                if inclusive {
                    // Keep every completion of the included prefix.
                    match prefix_successor(&encoded) {
                        Some(next) => Bound::Excluded(next),
                        None => Bound::Unbounded,
                    }
                } else {
                    Bound::Excluded(encoded)
                }
            }
        };

        // A degenerate range (e.g. exclusive bounds meeting) must stay a
        // well-formed empty range for the engine.
        if let (Bound::Included(a), Bound::Excluded(b)) = (&lo, &hi) {
            if a >= b {
                return Ok(empty_bounds(prefix));
            }
        }
        Ok((lo, hi))
    }
}

fn empty_bounds(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    (
        Bound::Included(prefix.to_vec()),
        Bound::Excluded(prefix.to_vec()),
    )
}

/// Encodes one bound tuple, converting values to the column types and
/// widening fractional doubles over integer columns. Returns the encoded
/// bytes and the possibly-adjusted inclusivity.
fn encode_bound(
    prefix: &[u8],
    values: &[Value],
    types: &[DataType],
    sort_order: SortOrder,
    lower: bool,
    mut inclusive: bool,
) -> Result<(Vec<u8>, bool)> {
    if values.len() > types.len() {
        return Err(Error::InvalidRange("bound has more components than the key"));
    }
    let mut converted = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        let ty = types[i];
        // On a descending column the key-order "lower" side is the
        // numerically higher one, so the widening direction flips.
        let towards_low = lower ^ sort_order.is_desc(i);
        converted.push(convert_bound_value(
            value.clone(),
            ty,
            towards_low,
            // Only the last component's rounding may change inclusivity;
            // earlier components are exact prefixes.
            (i == values.len() - 1).then_some(&mut inclusive),
        )?);
    }
    let mut encoded = prefix.to_vec();
    encode_tuple(&converted, sort_order, &mut encoded);
    Ok((encoded, inclusive))
}

fn convert_bound_value(
    value: Value,
    ty: DataType,
    towards_low: bool,
    inclusive: Option<&mut bool>,
) -> Result<Value> {
    if let (Value::Double(v), true) = (&value, ty.is_integer()) {
        let v = *v;
        if !v.is_finite() {
            return Err(Error::InvalidRange("non-finite bound over an integer column"));
        }
        if v.fract() != 0.0 {
            // `x > 2.5` over integers is `x >= 3`; `x < 2.5` is `x <= 2`.
            let widened = if towards_low { v.ceil() } else { v.floor() };
            if let Some(inclusive) = inclusive {
                *inclusive = true;
            }
            return Value::Double(widened)
                .cast(ty)
                .map_err(|_| Error::InvalidRange("bound out of the column's range"));
        }
    }
    value
        .cast(ty)
        .map_err(|_| Error::InvalidRange("bound value does not fit the column type"))
}
