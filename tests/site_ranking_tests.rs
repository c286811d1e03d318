use std::collections::HashMap;

use proptest::prelude::*;
use rtdiag::system::memory::{SiteKey, aggregate_sites, rank_sites};
use rtdiag::system::tracker::TracedAllocation;

fn make_totals(entries: &[(u8, u32, u64)]) -> HashMap<SiteKey, u64> {
    let mut totals = HashMap::new();
    for &(file, line, bytes) in entries {
        *totals.entry((format!("src/f{file}.rs"), line)).or_default() += bytes;
    }
    totals
}

proptest! {
    #[test]
    fn never_exceeds_top_n(
        entries in prop::collection::vec((0u8..8, 1u32..50, 0u64..1_000_000), 0..100),
        top_n in 0usize..10,
    ) {
        let totals = make_totals(&entries);
        let distinct = totals.len();
        let ranked = rank_sites(totals, top_n);
        prop_assert_eq!(ranked.len(), top_n.min(distinct));
    }

    #[test]
    fn descending_by_size(
        entries in prop::collection::vec((0u8..8, 1u32..50, 0u64..1_000_000), 0..100),
    ) {
        let ranked = rank_sites(make_totals(&entries), usize::MAX);
        for pair in ranked.windows(2) {
            prop_assert!(
                pair[0].size_kb >= pair[1].size_kb,
                "{:?} ranked before {:?}", pair[0], pair[1]
            );
        }
    }

    #[test]
    fn ranking_is_deterministic(
        entries in prop::collection::vec((0u8..8, 1u32..50, 0u64..4), 0..100),
        top_n in 0usize..10,
    ) {
        // Few distinct sizes force plenty of ties.
        let first = rank_sites(make_totals(&entries), top_n);
        let second = rank_sites(make_totals(&entries), top_n);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn aggregation_conserves_bytes(
        sizes in prop::collection::vec((1usize..10_000, 0usize..5), 0..200),
    ) {
        let traces: Vec<TracedAllocation> = sizes
            .iter()
            .map(|&(size, site)| TracedAllocation::new(size, &[site + 1]))
            .collect();
        let totals = aggregate_sites(&traces, |frames| ("src/lib.rs".to_string(), frames[0] as u32));
        let expected: u64 = sizes.iter().map(|&(size, _)| size as u64).sum();
        prop_assert_eq!(totals.values().sum::<u64>(), expected);
        prop_assert!(totals.len() <= 5);
    }
}
