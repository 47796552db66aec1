//! Bets placed against a scheduled race and their settlement.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::racing_horse::RacingHorse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetKind {
    Win,
    Show,
    Place,
    Watch,
}

impl BetKind {
    pub fn multiplier(&self) -> f64 {
        match self {
            BetKind::Win => 1.0,
            BetKind::Show => 0.5,
            BetKind::Place => 1.0 / 3.0,
            BetKind::Watch => 0.0,
        }
    }

    /// Worst finishing position that still collects, if any.
    pub fn places_paid(&self) -> Option<usize> {
        match self {
            BetKind::Win => Some(1),
            BetKind::Show => Some(2),
            BetKind::Place => Some(3),
            BetKind::Watch => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetKind::Win => "win",
            BetKind::Show => "show",
            BetKind::Place => "place",
            BetKind::Watch => "watch",
        }
    }
}

impl FromStr for BetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "win" => Ok(BetKind::Win),
            "show" => Ok(BetKind::Show),
            "place" => Ok(BetKind::Place),
            "watch" => Ok(BetKind::Watch),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for BetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    pub user_id: u64,
    pub horse: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Bet {
    Win(Stake),
    Show(Stake),
    Place(Stake),
    /// Subscribes a channel to the race commentary; stakes nothing.
    Watch,
}

impl Bet {
    /// `None` when a stake is given for a watch or missing for a real bet.
    pub fn new(kind: BetKind, stake: Option<Stake>) -> Option<Self> {
        match (kind, stake) {
            (BetKind::Win, Some(s)) => Some(Bet::Win(s)),
            (BetKind::Show, Some(s)) => Some(Bet::Show(s)),
            (BetKind::Place, Some(s)) => Some(Bet::Place(s)),
            (BetKind::Watch, None) => Some(Bet::Watch),
            _ => None,
        }
    }

    pub fn kind(&self) -> BetKind {
        match self {
            Bet::Win(_) => BetKind::Win,
            Bet::Show(_) => BetKind::Show,
            Bet::Place(_) => BetKind::Place,
            Bet::Watch => BetKind::Watch,
        }
    }

    pub fn stake(&self) -> Option<&Stake> {
        match self {
            Bet::Win(s) | Bet::Show(s) | Bet::Place(s) => Some(s),
            Bet::Watch => None,
        }
    }

    /// `(1 + odds * multiplier) * amount`, truncated.
    pub fn payout(&self, odds_float: f64) -> u64 {
        match self.stake() {
            Some(stake) => ((1.0 + odds_float * self.kind().multiplier()) * stake.amount as f64) as u64,
            None => 0,
        }
    }

    /// Evaluated against the final leg's standings, best first.
    pub fn is_win(&self, standings: &[&RacingHorse]) -> bool {
        match (self.stake(), self.kind().places_paid()) {
            (Some(stake), Some(places)) => standings
                .iter()
                .take(places)
                .any(|h| h.name().eq_ignore_ascii_case(&stake.horse)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    pub server_id: u64,
    pub channel_id: u64,
    pub bet: Bet,
}

impl Wager {
    pub fn new(server_id: u64, channel_id: u64, bet: Bet) -> Self {
        Self { server_id, channel_id, bet }
    }

    /// Amount owed to the bettor; zero for losing bets and watches.
    pub fn winnings(&self, standings: &[&RacingHorse]) -> u64 {
        let stake = match self.bet.stake() {
            Some(s) => s,
            None => return 0,
        };
        if !self.bet.is_win(standings) {
            return 0;
        }
        standings
            .iter()
            .find(|h| h.name().eq_ignore_ascii_case(&stake.horse))
            .map(|h| self.bet.payout(h.odds_float()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runner;

    fn stake(horse: &str, amount: u64) -> Option<Stake> {
        Some(Stake { user_id: 7, horse: horse.to_string(), amount })
    }

    fn field() -> Vec<RacingHorse> {
        // odds point 25.0 maps to 3-1
        ["H1", "H2", "H3", "H4"]
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let mut r = runner(n, 100.0 - i as f64);
                r.odds = 25.0;
                r
            })
            .collect()
    }

    #[test]
    fn test_parse_bet_kind() {
        assert_eq!("WIN".parse::<BetKind>().unwrap(), BetKind::Win);
        assert_eq!(" place ".parse::<BetKind>().unwrap(), BetKind::Place);
        assert!("exacta".parse::<BetKind>().is_err());
    }

    #[test]
    fn test_watch_carries_no_stake() {
        assert!(Bet::new(BetKind::Watch, stake("H1", 5)).is_none());
        assert!(Bet::new(BetKind::Win, None).is_none());
        let w = Bet::new(BetKind::Watch, None).unwrap();
        assert_eq!(w.payout(5.0), 0);
        let f = field();
        let s: Vec<&RacingHorse> = f.iter().collect();
        assert!(!w.is_win(&s));
    }

    #[test]
    fn test_win_pays_only_first() {
        let f = field();
        let s: Vec<&RacingHorse> = f.iter().collect();
        let on_h1 = Wager::new(1, 2, Bet::new(BetKind::Win, stake("H1", 10)).unwrap());
        let on_h2 = Wager::new(1, 2, Bet::new(BetKind::Win, stake("h2", 10)).unwrap());
        // (1 + 3.0) * 10
        assert_eq!(on_h1.winnings(&s), 40);
        assert_eq!(on_h2.winnings(&s), 0);
    }

    #[test]
    fn test_show_pays_top_two() {
        let f = field();
        let s: Vec<&RacingHorse> = f.iter().collect();
        let on_h2 = Wager::new(1, 2, Bet::new(BetKind::Show, stake("H2", 10)).unwrap());
        let on_h3 = Wager::new(1, 2, Bet::new(BetKind::Show, stake("H3", 10)).unwrap());
        // (1 + 3.0 * 0.5) * 10
        assert_eq!(on_h2.winnings(&s), 25);
        assert_eq!(on_h3.winnings(&s), 0);
    }

    #[test]
    fn test_place_pays_top_three() {
        let f = field();
        let s: Vec<&RacingHorse> = f.iter().collect();
        let on_h3 = Wager::new(1, 2, Bet::new(BetKind::Place, stake("H3", 9)).unwrap());
        let on_h4 = Wager::new(1, 2, Bet::new(BetKind::Place, stake("H4", 9)).unwrap());
        // (1 + 3.0 / 3) * 9
        assert_eq!(on_h3.winnings(&s), 18);
        assert_eq!(on_h4.winnings(&s), 0);
    }

    #[test]
    fn test_payout_truncates() {
        let bet = Bet::new(BetKind::Place, stake("H1", 10)).unwrap();
        // (1 + 2.5 / 3) * 10 = 18.33
        assert_eq!(bet.payout(2.5), 18);
    }

    #[test]
    fn test_wager_serde_tagging() {
        let w = Wager::new(3, 4, Bet::new(BetKind::Show, stake("H1", 12)).unwrap());
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"kind\":\"show\""));
        let back: Wager = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
        let watch = Wager::new(3, 4, Bet::Watch);
        let back: Wager = serde_json::from_str(&serde_json::to_string(&watch).unwrap()).unwrap();
        assert_eq!(back, watch);
    }
}
