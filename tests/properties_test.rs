mod helpers;

use activity_ledger::parser::EventParser;
use activity_ledger::projections::{calculate_ratios, derive_sessions};
use helpers::events;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const ACTIONS: [&str; 3] = ["START", "DONE", "NOTE"];
const CATEGORIES: [&str; 5] = ["THEORY", "PRACTICE", "TASK", "GAME", "GOAL"];
const ACTIVITIES: [&str; 4] = ["PANDAS", "RUST", "VALORANT", "LAUNDRY"];

fn arb_lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec((0..3usize, 0..5usize, 0..4usize), 0..40).prop_map(|picks| {
        picks
            .into_iter()
            .map(|(a, c, x)| format!("{} {} {}", ACTIONS[a], CATEGORIES[c], ACTIVITIES[x]))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        // Do not write `.proptest-regressions` files into the repo.
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn replay_is_deterministic(lines in arb_lines()) {
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        let events = events(&lines);
        prop_assert_eq!(derive_sessions(&events), derive_sessions(&events));
        prop_assert_eq!(calculate_ratios(&derive_sessions(&events)), calculate_ratios(&derive_sessions(&events)));
    }

    #[test]
    fn percentages_sum_to_exactly_one_hundred(lines in arb_lines()) {
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        let sessions = derive_sessions(&events(&lines));
        let summary = calculate_ratios(&sessions);

        prop_assert_eq!(summary.total, sessions.len());
        prop_assert_eq!(summary.counts.values().sum::<usize>(), summary.total);
        if summary.total > 0 {
            prop_assert_eq!(summary.percentages.values().sum::<f64>(), 100.0);
            prop_assert!(summary.percentages.values().all(|p| p.fract() == 0.0));
        }
    }

    #[test]
    fn sessions_never_overlap(lines in arb_lines()) {
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        let sessions = derive_sessions(&events(&lines));

        for pair in sessions.windows(2) {
            let end = pair[0].end_index;
            prop_assert!(end.is_some());
            prop_assert!(end.unwrap() < pair[1].start_index);
        }
        if let Some(last) = sessions.last() {
            prop_assert!(last.is_open());
        }
    }

    #[test]
    fn parser_never_fails_and_is_pure(text in "[ -~]{0,60}") {
        let parser = EventParser::default();
        let first = parser.parse(&text);
        prop_assert_eq!(&first, &parser.parse(&text));
        prop_assert!([0.0, 0.5, 1.0].contains(&first.confidence));
        prop_assert!(first.to_event().is_ok());
    }
}
