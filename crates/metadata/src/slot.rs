//! Slot range arithmetic
//!
//! A cluster owns 16384 hash slots. Ranges are half-open intervals
//! `[start, end)` in memory; the text form used on the wire and in the
//! admin API is inclusive (`0-8191`, or a bare `42` for a single slot).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Total number of hash slots (consistent with Redis Cluster)
pub const TOTAL_SLOTS: u32 = 16384;

/// A half-open range of slots `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRange {
    /// Start slot (inclusive)
    pub start: u32,
    /// End slot (exclusive)
    pub end: u32,
}

impl SlotRange {
    /// Create a new range, rejecting empty or out-of-bounds intervals
    pub fn new(start: u32, end: u32) -> Result<Self, MetadataError> {
        if start >= end {
            return Err(MetadataError::InvalidSlotRange(format!(
                "start {} must be less than end {}",
                start, end
            )));
        }
        if end > TOTAL_SLOTS {
            return Err(MetadataError::SlotOutOfRange(end));
        }
        Ok(Self { start, end })
    }

    /// Number of slots in the range
    pub fn slot_count(&self) -> u32 {
        self.end - self.start
    }

    /// Check whether a slot falls inside the range
    pub fn contains(&self, slot: u32) -> bool {
        slot >= self.start && slot < self.end
    }

    /// Check whether two ranges share at least one slot
    pub fn overlaps(&self, other: &SlotRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Remove `other` from this range, returning the remaining pieces
    ///
    /// The result holds zero, one or two ranges depending on where the
    /// subtracted interval cuts.
    pub fn subtract(&self, other: &SlotRange) -> Vec<SlotRange> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut rest = Vec::new();
        if other.start > self.start {
            rest.push(SlotRange {
                start: self.start,
                end: other.start,
            });
        }
        if other.end < self.end {
            rest.push(SlotRange {
                start: other.end,
                end: self.end,
            });
        }
        rest
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.slot_count() == 1 {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end - 1)
        }
    }
}

impl FromStr for SlotRange {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MetadataError::InvalidSlotRange(s.to_string());
        match s.split_once('-') {
            None => {
                let slot: u32 = s.trim().parse().map_err(|_| invalid())?;
                SlotRange::new(slot, slot + 1)
            }
            Some((start, stop)) => {
                let start: u32 = start.trim().parse().map_err(|_| invalid())?;
                let stop: u32 = stop.trim().parse().map_err(|_| invalid())?;
                if stop < start {
                    return Err(invalid());
                }
                SlotRange::new(start, stop + 1)
            }
        }
    }
}

/// Sort and merge a set of ranges into the minimal normalized form
///
/// Adjacent and overlapping ranges collapse into one. All mutations on a
/// shard's range set go through this so the stored form stays canonical.
pub fn merge_ranges(mut ranges: Vec<SlotRange>) -> Vec<SlotRange> {
    if ranges.is_empty() {
        return ranges;
    }
    ranges.sort();
    let mut merged: Vec<SlotRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid() {
        assert!(SlotRange::new(0, 0).is_err());
        assert!(SlotRange::new(10, 5).is_err());
        assert!(SlotRange::new(0, TOTAL_SLOTS + 1).is_err());
        assert!(SlotRange::new(0, TOTAL_SLOTS).is_ok());
    }

    #[test]
    fn test_contains() {
        let range = SlotRange::new(100, 200).unwrap();
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(200));
        assert!(!range.contains(99));
    }

    #[test]
    fn test_display_and_parse_round_trip() {
        for text in ["0-16383", "42", "100-200"] {
            let range: SlotRange = text.parse().unwrap();
            assert_eq!(range.to_string(), text);
        }
        let full: SlotRange = "0-16383".parse().unwrap();
        assert_eq!(full.start, 0);
        assert_eq!(full.end, TOTAL_SLOTS);
        let single: SlotRange = "42".parse().unwrap();
        assert_eq!(single.slot_count(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<SlotRange>().is_err());
        assert!("a-b".parse::<SlotRange>().is_err());
        assert!("10-5".parse::<SlotRange>().is_err());
        assert!("-1".parse::<SlotRange>().is_err());
        assert!("0-16384".parse::<SlotRange>().is_err());
    }

    #[test]
    fn test_overlaps() {
        let a = SlotRange::new(0, 100).unwrap();
        let b = SlotRange::new(99, 200).unwrap();
        let c = SlotRange::new(100, 200).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_subtract() {
        let a = SlotRange::new(0, 100).unwrap();
        let middle = SlotRange::new(40, 60).unwrap();
        let rest = a.subtract(&middle);
        assert_eq!(
            rest,
            vec![
                SlotRange::new(0, 40).unwrap(),
                SlotRange::new(60, 100).unwrap()
            ]
        );

        let prefix = SlotRange::new(0, 50).unwrap();
        assert_eq!(a.subtract(&prefix), vec![SlotRange::new(50, 100).unwrap()]);

        let all = SlotRange::new(0, 100).unwrap();
        assert!(a.subtract(&all).is_empty());

        let disjoint = SlotRange::new(200, 300).unwrap();
        assert_eq!(a.subtract(&disjoint), vec![a]);
    }

    #[test]
    fn test_merge_ranges() {
        let ranges = vec![
            SlotRange::new(100, 200).unwrap(),
            SlotRange::new(0, 100).unwrap(),
            SlotRange::new(300, 400).unwrap(),
            SlotRange::new(150, 250).unwrap(),
        ];
        assert_eq!(
            merge_ranges(ranges),
            vec![
                SlotRange::new(0, 250).unwrap(),
                SlotRange::new(300, 400).unwrap()
            ]
        );
        assert!(merge_ranges(Vec::new()).is_empty());
    }
}
