//! Matchup resolution.
//!
//! A matchup is either Unresolved or Resolved. It can only move to Resolved
//! once its week lies strictly before the current week, and the move is
//! one-way: a stored winner is returned as-is and never recomputed.
//!
//! Net worths are taken from live valuations at resolution time. No
//! end-of-week snapshot exists, so a week that is resolved late is judged
//! on later prices; the compared values are persisted with the winner so
//! the basis of each decision is kept.

use std::cmp::Ordering;
use tracing::{debug, info};

use crate::season::calendar::NOT_STARTED;
use crate::storage::LeagueStore;
use crate::types::{League, LeagueError, Matchup, MatchupOutcome, Settlement};
use crate::valuation::NetWorths;

/// Resolve `matchup` as of `current_week`, recording a winner if one can be
/// decided for the first time.
///
/// Ties record nothing and stay eligible for later calls. Valuation
/// failures propagate; a side is never treated as worth zero.
pub async fn resolve_winner(
    store: &dyn LeagueStore,
    worths: &NetWorths<'_>,
    league: &League,
    matchup: &Matchup,
    current_week: u32,
) -> Result<MatchupOutcome, LeagueError> {
    if let Some(winner) = matchup.winner {
        return Ok(MatchupOutcome::Won(winner));
    }
    if league.start_date.is_none() || current_week == NOT_STARTED {
        return Ok(MatchupOutcome::Pending);
    }
    if matchup.week_number >= current_week {
        return Ok(MatchupOutcome::Pending);
    }

    let (net_worth1, net_worth2) = tokio::try_join!(
        worths.get(matchup.participant1),
        worths.get(matchup.participant2),
    )?;

    let winner = match net_worth1.cmp(&net_worth2) {
        Ordering::Greater => matchup.participant1,
        Ordering::Less => matchup.participant2,
        Ordering::Equal => {
            debug!(
                matchup = %matchup.id,
                week = matchup.week_number,
                net_worth = %net_worth1,
                "Matchup tied, leaving unresolved"
            );
            return Ok(MatchupOutcome::Tied);
        }
    };

    let settlement = Settlement {
        net_worth1,
        net_worth2,
    };
    let stored = store.record_winner(matchup.id, winner, settlement).await?;
    let winner = stored.unwrap_or(winner);

    info!(
        league = %league.id,
        matchup = %matchup.id,
        week = matchup.week_number,
        %winner,
        net_worth1 = %net_worth1,
        net_worth2 = %net_worth2,
        "Matchup winner recorded"
    );
    Ok(MatchupOutcome::Won(winner))
}
