//! `>>id` reference extraction. Edge bookkeeping lives in the repository so
//! it can share the insert transaction.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Id;

#[allow(clippy::expect_used)]
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r">>(\d+)").expect("compile mention regex"));

/// Distinct post ids referenced as `>>digits` anywhere in `text`.
/// Numbers that overflow an id are ignored.
pub fn extract_mentions(text: &str) -> BTreeSet<Id> {
    MENTION_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<Id>().ok())
        .collect()
}

/// Targets worth looking up for a new post: everything mentioned except itself.
pub fn candidate_targets(source_id: Id, text: &str) -> BTreeSet<Id> {
    let mut ids = extract_mentions(text);
    ids.remove(&source_id);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_collapse() {
        let ids: Vec<_> = extract_mentions("see >>5 and >>5 and >>7").into_iter().collect();
        assert_eq!(ids, vec![5, 7]);
    }

    #[test]
    fn mentions_anywhere_in_text() {
        let ids = extract_mentions(">>1\nquote>>22 trailing>>333x");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 22, 333]);
    }

    #[test]
    fn single_chevron_and_overflow_ignored() {
        assert!(extract_mentions(">5 >> 6 >>").is_empty());
        assert!(extract_mentions(">>99999999999999999999999").is_empty());
    }

    #[test]
    fn self_reference_dropped() {
        let ids = candidate_targets(9, ">>9 >>3");
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![3]);
    }
}
