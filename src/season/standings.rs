//! Win/loss tallies and leaderboard ordering.
//!
//! Pure folds over resolver outcomes. Fetching valuations and resolving
//! matchups is the engine's job; this module only counts and sorts.

use std::collections::HashMap;

use crate::types::{Matchup, MatchupOutcome, ParticipantId, Record, Standing};

/// Fold resolved outcomes into one record per participant on `roster`.
///
/// Every roster member gets an entry, even with no decided matchups.
/// Outcomes for participants outside the roster are ignored.
pub fn tally(
    roster: &[ParticipantId],
    outcomes: &[(Matchup, MatchupOutcome)],
) -> HashMap<ParticipantId, Record> {
    let mut records: HashMap<ParticipantId, Record> =
        roster.iter().map(|p| (*p, Record::default())).collect();

    for (matchup, outcome) in outcomes {
        for side in [matchup.participant1, matchup.participant2] {
            if let Some(record) = records.get_mut(&side) {
                record.apply(*outcome, side);
            }
        }
    }
    records
}

/// Record of a single participant across `outcomes`.
pub fn record_of(participant: ParticipantId, outcomes: &[(Matchup, MatchupOutcome)]) -> Record {
    let mut record = Record::default();
    for (matchup, outcome) in outcomes.iter().filter(|(m, _)| m.involves(participant)) {
        record.apply(*outcome, participant);
    }
    record
}

/// Sort by wins, then net worth, both descending.
///
/// The sort is stable: rows equal on both keys keep their input order.
pub fn rank(standings: &mut [Standing]) {
    standings.sort_by(|a, b| {
        b.wins
            .cmp(&a.wins)
            .then_with(|| b.net_worth.cmp(&a.net_worth))
    });
}
