//! Horse racing minigame: a persistent herd of horses, a rolling schedule of
//! races, leg-by-leg simulation with commentary, and parimutuel-style betting.

pub mod betting;
pub mod horse;
pub mod ledger;
pub mod logging;
pub mod manager;
pub mod naming;
pub mod notify;
pub mod output;
pub mod race;
pub mod racing_horse;
pub mod results;
pub mod rules;
pub mod schedule;
pub mod storage;
pub mod wager;

#[cfg(test)]
mod testutil;
