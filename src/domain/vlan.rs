use std::collections::BTreeSet;
use std::fmt;

use rand::seq::IteratorRandom;

use crate::error::{Error, Result};

/// Highest valid 802.1Q tag value (12-bit tag space).
pub const VLAN_MAX: u16 = 4095;

/// An immutable set of VLAN tags in `[0, 4095]`.
///
/// All set operations are pure: operands are never mutated, every operation
/// returns a new `VlanRange`. The empty range is a valid value and signals
/// that no usable tag exists (an infeasible negotiation result).
///
/// Adjacent hops negotiate a shared tag by intersecting their ranges; a hop
/// that must translate between distinct tags keeps its own range instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanRange {
    tags: BTreeSet<u16>,
}

impl VlanRange {
    /// The empty range (no usable tag).
    pub fn empty() -> Self {
        VlanRange { tags: BTreeSet::new() }
    }

    /// The full tag space, the meaning of `"any"` in rspec text.
    pub fn any() -> Self {
        VlanRange { tags: (0..=VLAN_MAX).collect() }
    }

    pub fn from_value(value: u16) -> Result<Self> {
        Self::from_list(&[value])
    }

    pub fn from_list(values: &[u16]) -> Result<Self> {
        let mut tags = BTreeSet::new();
        for &value in values {
            if value > VLAN_MAX {
                return Err(Error::RangeError(format!(
                    "VLAN tag {} is outside [0, {}]",
                    value, VLAN_MAX
                )));
            }
            tags.insert(value);
        }
        Ok(VlanRange { tags })
    }

    /// Parses the rspec range form, e.g. `"1-20, 454, 700-801"` or `"any"`.
    pub fn from_spec(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        if trimmed.eq_ignore_ascii_case("any") {
            return Ok(Self::any());
        }

        let mut tags = BTreeSet::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::RangeError(format!(
                    "Empty element in VLAN range spec '{}'",
                    spec
                )));
            }

            let (low, high) = match part.split_once('-') {
                Some((low, high)) => (parse_tag(low, spec)?, parse_tag(high, spec)?),
                None => {
                    let value = parse_tag(part, spec)?;
                    (value, value)
                }
            };

            if low > high {
                return Err(Error::RangeError(format!(
                    "Descending interval '{}' in VLAN range spec '{}'",
                    part, spec
                )));
            }
            tags.extend(low..=high);
        }
        Ok(VlanRange { tags })
    }

    pub fn intersect(&self, other: &VlanRange) -> VlanRange {
        VlanRange { tags: self.tags.intersection(&other.tags).copied().collect() }
    }

    pub fn union(&self, other: &VlanRange) -> VlanRange {
        VlanRange { tags: self.tags.union(&other.tags).copied().collect() }
    }

    pub fn difference(&self, other: &VlanRange) -> VlanRange {
        VlanRange { tags: self.tags.difference(&other.tags).copied().collect() }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn contains(&self, tag: u16) -> bool {
        self.tags.contains(&tag)
    }

    pub fn min(&self) -> Option<u16> {
        self.tags.first().copied()
    }

    /// The assigned tag, iff this range has exactly one member.
    pub fn single(&self) -> Option<u16> {
        if self.tags.len() == 1 { self.min() } else { None }
    }

    /// Picks a random member, used to suggest a tag when none is imported.
    pub fn pick(&self) -> Option<u16> {
        self.tags.iter().copied().choose(&mut rand::rng())
    }
}

fn parse_tag(text: &str, spec: &str) -> Result<u16> {
    let value: u32 = text.trim().parse().map_err(|_| {
        Error::RangeError(format!("Invalid VLAN tag '{}' in spec '{}'", text, spec))
    })?;
    if value > VLAN_MAX as u32 {
        return Err(Error::RangeError(format!(
            "VLAN tag {} is outside [0, {}]",
            value, VLAN_MAX
        )));
    }
    Ok(value as u16)
}

/// Renders the canonical spec form: consecutive runs as `low-high`,
/// singletons as bare numbers, the full tag space as `"any"`.
impl fmt::Display for VlanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.len() == (VLAN_MAX as usize + 1) {
            return write!(f, "any");
        }

        let mut first = true;
        let mut iter = self.tags.iter().copied().peekable();
        while let Some(low) = iter.next() {
            let mut high = low;
            while iter.peek() == Some(&(high + 1)) {
                high = iter.next().unwrap();
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if low == high {
                write!(f, "{}", low)?;
            } else {
                write!(f, "{}-{}", low, high)?;
            }
        }
        Ok(())
    }
}
