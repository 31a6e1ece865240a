//! Value validators and wire-code maps.
//!
//! Strict validators reject values outside their domain with
//! [`DaqError::InvalidValue`]; truncating validators clamp into the domain.
//! Drivers call these before formatting a command, so nothing out of range ever
//! reaches the wire.
//!
//! | Validator | In domain | Out of domain |
//! |-----------|-----------|---------------|
//! | [`strict_discrete_set`] | value | error |
//! | [`strict_range`] | value | error |
//! | [`truncated_range`] | value | nearest bound |
//! | [`truncated_discrete_set`] | value | next larger member, else largest |
//!
//! Unordered inputs (NaN) are rejected by every validator.

use crate::error::{DaqError, DaqResult};
use std::fmt::Debug;

fn is_unordered<T: PartialOrd>(value: &T) -> bool {
    value.partial_cmp(value).is_none()
}

/// Accept `value` only if it is a member of `set`.
pub fn strict_discrete_set<T: PartialEq + Copy + Debug>(value: T, set: &[T]) -> DaqResult<T> {
    if set.contains(&value) {
        Ok(value)
    } else {
        Err(DaqError::invalid_value(value, set))
    }
}

/// Accept `value` only if `min <= value <= max`.
pub fn strict_range<T: PartialOrd + Copy + Debug>(value: T, min: T, max: T) -> DaqResult<T> {
    if min <= value && value <= max {
        Ok(value)
    } else {
        Err(DaqError::InvalidValue {
            value: format!("{:?}", value),
            allowed: format!("{:?}..={:?}", min, max),
        })
    }
}

/// Clamp `value` into `[min, max]`.
pub fn truncated_range<T: PartialOrd + Copy + Debug>(value: T, min: T, max: T) -> DaqResult<T> {
    if is_unordered(&value) {
        return Err(DaqError::InvalidValue {
            value: format!("{:?}", value),
            allowed: format!("{:?}..={:?}", min, max),
        });
    }
    if value < min {
        tracing::debug!(?value, ?min, "value truncated to lower bound");
        Ok(min)
    } else if value > max {
        tracing::debug!(?value, ?max, "value truncated to upper bound");
        Ok(max)
    } else {
        Ok(value)
    }
}

/// Return `value` if it is in `set`, otherwise the smallest member larger
/// than it, otherwise the largest member. `set` does not need to be sorted.
pub fn truncated_discrete_set<T: PartialOrd + Copy + Debug>(value: T, set: &[T]) -> DaqResult<T> {
    if is_unordered(&value) {
        return Err(DaqError::invalid_value(value, set));
    }
    if set.contains(&value) {
        return Ok(value);
    }

    let next_larger = set
        .iter()
        .copied()
        .filter(|member| *member > value)
        .fold(None, |best: Option<T>, member| match best {
            Some(b) if b <= member => Some(b),
            _ => Some(member),
        });
    if let Some(member) = next_larger {
        tracing::debug!(?value, ?member, "value truncated to next allowed member");
        return Ok(member);
    }

    let largest = set.iter().copied().fold(None, |best: Option<T>, member| match best {
        Some(b) if b >= member => Some(b),
        _ => Some(member),
    });
    largest.ok_or_else(|| DaqError::invalid_value(value, set))
}

/// Round to the nearest multiple of `step`; exact halves go to the even multiple.
///
/// `round_to_step(122.5, 5.0) == 120.0`, `round_to_step(127.5, 5.0) == 130.0`.
pub fn round_to_step(value: f64, step: f64) -> f64 {
    (value / step).round_ties_even() * step
}

// =============================================================================
// ValueMap
// =============================================================================

/// Static bidirectional table between user-facing values and wire codes.
///
/// ```rust
/// use daq_core::validators::ValueMap;
///
/// static VALVE: ValueMap<&str, u8> = ValueMap::new(&[("flow", 0), ("close", 1), ("open", 2)]);
///
/// assert_eq!(VALVE.to_wire("close").unwrap(), 1);
/// assert_eq!(VALVE.from_wire(2).unwrap(), "open");
/// assert!(VALVE.to_wire("purge").is_err());
/// ```
#[derive(Debug)]
pub struct ValueMap<K: 'static, W: 'static> {
    entries: &'static [(K, W)],
}

impl<K, W> ValueMap<K, W>
where
    K: PartialEq + Copy + Debug,
    W: PartialEq + Copy + Debug,
{
    /// Wrap a static entry table.
    pub const fn new(entries: &'static [(K, W)]) -> Self {
        Self { entries }
    }

    /// Wire code for `key`; fails for keys not in the table.
    pub fn to_wire(&self, key: K) -> DaqResult<W> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, w)| *w)
            .ok_or_else(|| DaqError::invalid_value(key, self.keys().collect::<Vec<_>>()))
    }

    /// User-facing value for `wire`; fails for codes not in the table.
    pub fn from_wire(&self, wire: W) -> DaqResult<K> {
        self.entries
            .iter()
            .find(|(_, w)| *w == wire)
            .map(|(k, _)| *k)
            .ok_or_else(|| {
                DaqError::Instrument(format!(
                    "unexpected wire code {:?} (known: {:?})",
                    wire,
                    self.entries.iter().map(|(_, w)| *w).collect::<Vec<_>>()
                ))
            })
    }

    /// All user-facing values, in table order.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    /// True when no key and no wire code appears twice.
    pub fn is_bijective(&self) -> bool {
        self.entries.iter().enumerate().all(|(i, (k, w))| {
            self.entries[i + 1..]
                .iter()
                .all(|(k2, w2)| k2 != k && w2 != w)
        })
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn strict_discrete_set_accepts_members_only() {
        assert_eq!(strict_discrete_set(2u8, &[0, 1, 2, 4]).unwrap(), 2);
        assert!(strict_discrete_set(3u8, &[0, 1, 2, 4]).is_err());
    }

    #[test]
    fn strict_range_is_inclusive() {
        assert_eq!(strict_range(1u32, 1, 20).unwrap(), 1);
        assert_eq!(strict_range(20u32, 1, 20).unwrap(), 20);
        assert!(strict_range(0u32, 1, 20).is_err());
        assert!(strict_range(21u32, 1, 20).is_err());
        assert!(strict_range(f64::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn truncated_range_clamps() {
        assert_eq!(truncated_range(300u16, 0, 250).unwrap(), 250);
        assert_eq!(truncated_range(-5.0, 0.0, 100.0).unwrap(), 0.0);
        assert_eq!(truncated_range(42.5, 0.0, 100.0).unwrap(), 42.5);
        assert!(truncated_range(f64::NAN, 0.0, 100.0).is_err());
    }

    #[test]
    fn truncated_discrete_set_picks_next_larger() {
        let set = [0u16, 100, 150, 180, 200, 230];
        assert_eq!(truncated_discrete_set(150, &set).unwrap(), 150);
        assert_eq!(truncated_discrete_set(120, &set).unwrap(), 150);
        assert_eq!(truncated_discrete_set(1, &set).unwrap(), 100);
        assert_eq!(truncated_discrete_set(240, &set).unwrap(), 230);
    }

    #[test]
    fn truncated_discrete_set_handles_unsorted_and_empty() {
        assert_eq!(truncated_discrete_set(5, &[30, 10, 20]).unwrap(), 10);
        assert_eq!(truncated_discrete_set(50, &[30, 10, 20]).unwrap(), 30);
        assert!(truncated_discrete_set(5, &[] as &[i32]).is_err());
    }

    #[test]
    fn round_to_step_ties_to_even_multiple() {
        assert_eq!(round_to_step(123.0, 5.0), 125.0);
        assert_eq!(round_to_step(122.0, 5.0), 120.0);
        assert_eq!(round_to_step(122.5, 5.0), 120.0);
        assert_eq!(round_to_step(127.5, 5.0), 130.0);
        assert_eq!(round_to_step(2_450_005.0, 10.0), 2_450_000.0);
        assert_eq!(round_to_step(2_450_015.0, 10.0), 2_450_020.0);
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Mode {
        A,
        B,
    }

    static MODES: ValueMap<Mode, u8> = ValueMap::new(&[(Mode::A, 0), (Mode::B, 1)]);

    #[test]
    fn value_map_round_trip() {
        assert_eq!(MODES.to_wire(Mode::B).unwrap(), 1);
        assert_eq!(MODES.from_wire(0).unwrap(), Mode::A);
        assert!(MODES.from_wire(7).is_err());
        assert!(MODES.is_bijective());
    }

    #[test]
    fn value_map_detects_duplicate_codes() {
        static DUPLICATE: ValueMap<&str, u8> = ValueMap::new(&[("sccm", 1), ("slm", 1)]);
        assert!(!DUPLICATE.is_bijective());
    }
}
