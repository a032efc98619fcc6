//! Round-robin pairing for an eight-team season.
//!
//! The table is the circle method with roster slot 0 fixed and slots 1..=7
//! rotating one place per week. Slots are roster positions in join order.

use crate::types::{
    LeagueError, NewMatchup, ParticipantId, MATCHUPS_PER_WEEK, ROSTER_SIZE, SEASON_WEEKS,
};

/// `PAIRINGS[w]` lists the four roster-slot pairs playing in week `w + 1`.
pub const PAIRINGS: [[(usize, usize); MATCHUPS_PER_WEEK]; SEASON_WEEKS as usize] = [
    [(0, 7), (1, 6), (2, 5), (3, 4)],
    [(0, 6), (5, 7), (1, 4), (2, 3)],
    [(0, 5), (4, 6), (3, 7), (1, 2)],
    [(0, 4), (3, 5), (2, 6), (1, 7)],
    [(0, 3), (2, 4), (1, 5), (6, 7)],
    [(0, 2), (1, 3), (4, 7), (5, 6)],
    [(0, 1), (2, 7), (3, 6), (4, 5)],
];

/// Build the full 7-week, 28-matchup schedule for a roster.
///
/// Fails with `InvalidRosterSize` unless the roster has exactly eight
/// entries. Nothing is persisted here.
pub fn generate(roster: &[ParticipantId]) -> Result<Vec<NewMatchup>, LeagueError> {
    if roster.len() != ROSTER_SIZE {
        return Err(LeagueError::InvalidRosterSize {
            expected: ROSTER_SIZE,
            actual: roster.len(),
        });
    }

    let matchups = PAIRINGS
        .iter()
        .zip(1..=SEASON_WEEKS)
        .flat_map(|(week, week_number)| {
            week.iter().map(move |&(a, b)| NewMatchup {
                week_number,
                participant1: roster[a],
                participant2: roster[b],
            })
        })
        .collect();

    Ok(matchups)
}
