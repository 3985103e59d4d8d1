// src/stats.rs
//! Read-side projection of a poll's tally. Nothing here is persisted.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::Poll;

/// Participation is measured against a fixed audience of this many voters.
pub const EXPECTED_VOTERS: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionStats {
    pub votes: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStatistics {
    pub total_votes: i64,
    pub option_stats: BTreeMap<String, OptionStats>,
    pub participation_rate: f64,
}

/// Two decimals, ties to even: 1 vote in 32 is 3.12, not 3.13.
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

pub fn compute_statistics(poll: &Poll) -> PollStatistics {
    let total_votes = poll.total_votes();

    let option_stats = poll
        .votes
        .iter()
        .map(|(option, &votes)| {
            let percentage = if total_votes > 0 {
                round2(votes as f64 / total_votes as f64 * 100.0)
            } else {
                0.0
            };
            (option.clone(), OptionStats { votes, percentage })
        })
        .collect();

    let participation_rate = round2((total_votes as f64 / EXPECTED_VOTERS).min(1.0) * 100.0);

    PollStatistics {
        total_votes,
        option_stats,
        participation_rate,
    }
}
