//! Merge-time conflict resolution.
//!
//! Both sides of a link run these on the same inputs and must reach the
//! same answer without talking to each other, so everything here is a pure
//! function whose result does not depend on argument order.

use crate::state::{ListEntry, ParamEntry};
use linkd_proto::irc_to_lower;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// How two different values of one parameter mode are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// The smaller number wins (the more restrictive limit).
    Minimum,
    /// The lexically smaller value wins.
    Lexical,
    /// The value set later wins.
    Newest,
}

/// Pick the surviving value. `resolve(p, a, ta, b, tb)` equals
/// `resolve(p, b, tb, a, ta)` for every input.
pub fn resolve<'a>(policy: ConflictPolicy, a: &'a str, ts_a: i64, b: &'a str, ts_b: i64) -> &'a str {
    let order = match policy {
        ConflictPolicy::Minimum => match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        },
        ConflictPolicy::Lexical => Ordering::Equal,
        ConflictPolicy::Newest => ts_b.cmp(&ts_a),
    };
    match order.then_with(|| a.cmp(b)) {
        Ordering::Greater => b,
        _ => a,
    }
}

/// Merge two stored values of one parameter mode. The winner keeps its own
/// set time; equal values keep the earlier one.
pub fn merge_param(policy: ConflictPolicy, ours: &ParamEntry, theirs: &ParamEntry) -> ParamEntry {
    if ours.value == theirs.value {
        return ParamEntry {
            value: ours.value.clone(),
            set_at: ours.set_at.min(theirs.set_at),
        };
    }
    let winner = resolve(policy, &ours.value, ours.set_at, &theirs.value, theirs.set_at);
    if winner == ours.value {
        ours.clone()
    } else {
        theirs.clone()
    }
}

/// Which of two entries for the same mask survives: the older one, then
/// the smaller setter, then the smaller mask spelling.
fn keep_entry(a: &ListEntry, b: &ListEntry) -> bool {
    (a.set_at, &a.set_by, &a.mask) <= (b.set_at, &b.set_by, &b.mask)
}

/// Union two list-mode contents.
///
/// Masks compare case-insensitively. The result is ordered by set time
/// (then mask) and holds at most `cap` entries, the oldest dropped first.
pub fn merge_lists(ours: &[ListEntry], theirs: &[ListEntry], cap: usize) -> Vec<ListEntry> {
    let mut by_mask: BTreeMap<String, ListEntry> = BTreeMap::new();
    for entry in ours.iter().chain(theirs) {
        let key = irc_to_lower(&entry.mask);
        match by_mask.get(&key) {
            Some(existing) if keep_entry(existing, entry) => {}
            _ => {
                by_mask.insert(key, entry.clone());
            }
        }
    }
    let mut merged: Vec<ListEntry> = by_mask.into_values().collect();
    merged.sort_by(|a, b| {
        a.set_at
            .cmp(&b.set_at)
            .then_with(|| irc_to_lower(&a.mask).cmp(&irc_to_lower(&b.mask)))
    });
    if merged.len() > cap {
        merged.drain(..merged.len() - cap);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mask: &str, set_by: &str, set_at: i64) -> ListEntry {
        ListEntry {
            mask: mask.into(),
            set_by: set_by.into(),
            set_at,
        }
    }

    #[test]
    fn limit_takes_the_minimum() {
        assert_eq!(resolve(ConflictPolicy::Minimum, "10", 5, "5", 9), "5");
        assert_eq!(resolve(ConflictPolicy::Minimum, "5", 9, "10", 5), "5");
    }

    #[test]
    fn minimum_falls_back_to_lexical() {
        assert_eq!(resolve(ConflictPolicy::Minimum, "x", 1, "7", 1), "7");
        assert_eq!(resolve(ConflictPolicy::Minimum, "7", 1, "x", 1), "7");
    }

    #[test]
    fn newest_breaks_ties_lexically() {
        assert_eq!(resolve(ConflictPolicy::Newest, "old", 1, "new", 2), "new");
        assert_eq!(resolve(ConflictPolicy::Newest, "b", 3, "a", 3), "a");
        assert_eq!(resolve(ConflictPolicy::Newest, "a", 3, "b", 3), "a");
    }

    #[test]
    fn resolution_is_commutative() {
        let values = [("10", 1), ("5", 2), ("abc", 2), ("5", 7), ("ABC", 0)];
        for policy in [
            ConflictPolicy::Minimum,
            ConflictPolicy::Lexical,
            ConflictPolicy::Newest,
        ] {
            for (a, ta) in values {
                for (b, tb) in values {
                    assert_eq!(
                        resolve(policy, a, ta, b, tb),
                        resolve(policy, b, tb, a, ta),
                        "{:?} {} {}",
                        policy,
                        a,
                        b
                    );
                }
            }
        }
    }

    fn param(value: &str, set_at: i64) -> ParamEntry {
        ParamEntry {
            value: value.into(),
            set_at,
        }
    }

    #[test]
    fn merged_param_carries_the_winners_set_time() {
        let older = param("older", 50);
        let newer = param("newer", 60);
        assert_eq!(merge_param(ConflictPolicy::Newest, &older, &newer), newer);
        assert_eq!(merge_param(ConflictPolicy::Newest, &newer, &older), newer);
        assert_eq!(merge_param(ConflictPolicy::Minimum, &param("10", 1), &param("5", 9)), param("5", 9));
        assert_eq!(merge_param(ConflictPolicy::Lexical, &param("x", 2), &param("x", 1)), param("x", 1));
    }

    #[test]
    fn param_merge_is_commutative() {
        let entries = [param("10", 1), param("5", 2), param("abc", 2), param("5", 7)];
        for policy in [
            ConflictPolicy::Minimum,
            ConflictPolicy::Lexical,
            ConflictPolicy::Newest,
        ] {
            for a in &entries {
                for b in &entries {
                    assert_eq!(merge_param(policy, a, b), merge_param(policy, b, a));
                }
            }
        }
    }

    #[test]
    fn duplicate_masks_keep_the_older_entry() {
        let ours = [entry("*!*@H1", "alice", 20)];
        let theirs = [entry("*!*@h1", "bob", 10)];
        let merged = merge_lists(&ours, &theirs, 10);
        assert_eq!(merged, vec![entry("*!*@h1", "bob", 10)]);
        assert_eq!(merge_lists(&theirs, &ours, 10), merged);
    }

    #[test]
    fn over_cap_drops_oldest() {
        let ours = [entry("a", "x", 1), entry("c", "x", 3)];
        let theirs = [entry("b", "y", 2), entry("d", "y", 4)];
        let merged = merge_lists(&ours, &theirs, 3);
        let masks: Vec<&str> = merged.iter().map(|e| e.mask.as_str()).collect();
        assert_eq!(masks, ["b", "c", "d"]);
    }
}
