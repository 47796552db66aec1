//! Leg-by-leg race results.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::racing_horse::RacingHorse;

/// One leg's snapshot: entrants grouped into packs, plus commentary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub standings: Vec<Vec<RacingHorse>>,
    pub commentary: Vec<String>,
}

impl Leg {
    pub fn flattened(&self) -> impl Iterator<Item = &RacingHorse> {
        self.standings.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResults {
    pub length: u32,
    pub legs: Vec<Leg>,
}

impl RaceResults {
    pub fn new(length: u32) -> Self {
        Self { length, legs: Vec::with_capacity(length as usize) }
    }

    /// Records the entrants' current state as a new leg (a single pack, in
    /// entry order).
    pub fn push_leg(&mut self, entrants: &[RacingHorse]) {
        self.legs.push(Leg { standings: vec![entrants.to_vec()], commentary: Vec::new() });
    }

    /// 1-based number of the most recent leg.
    pub fn leg_number(&self) -> usize {
        self.legs.len()
    }

    pub fn current(&self) -> Option<&Leg> {
        self.legs.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut Leg> {
        self.legs.last_mut()
    }

    pub fn is_complete(&self) -> bool {
        self.legs.len() == self.length as usize
    }

    pub fn announce(&mut self, line: String) {
        if let Some(leg) = self.current_mut() {
            leg.commentary.push(line);
        }
    }

    /// Final leg's entrants, best first. Ordering is by distance regardless of
    /// whether an output stage sorted the leg.
    pub fn final_standings(&self) -> Result<Vec<&RacingHorse>> {
        ensure!(
            self.is_complete(),
            "race results incomplete: {} of {} legs recorded",
            self.legs.len(),
            self.length
        );
        let mut order: Vec<&RacingHorse> = match self.current() {
            Some(leg) => leg.flattened().collect(),
            None => Vec::new(),
        };
        order.sort_by(|a, b| b.distance.total_cmp(&a.distance));
        Ok(order)
    }

    pub fn has_commentary(&self) -> bool {
        self.legs.iter().any(|l| !l.commentary.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::runner;

    #[test]
    fn test_complete_when_all_legs_recorded() {
        let mut r = RaceResults::new(2);
        assert!(!r.is_complete());
        r.push_leg(&[runner("A", 1.0)]);
        assert!(!r.is_complete());
        r.push_leg(&[runner("A", 2.0)]);
        assert!(r.is_complete());
        assert_eq!(r.leg_number(), 2);
    }

    #[test]
    fn test_final_standings_requires_completion() {
        let mut r = RaceResults::new(3);
        r.push_leg(&[runner("A", 1.0)]);
        assert!(r.final_standings().is_err());
    }

    #[test]
    fn test_final_standings_sorted_by_distance() {
        let mut r = RaceResults::new(1);
        r.push_leg(&[runner("Slow", 10.0), runner("Fast", 30.0), runner("Mid", 20.0)]);
        let names: Vec<&str> = r.final_standings().unwrap().iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["Fast", "Mid", "Slow"]);
    }

    #[test]
    fn test_announce_targets_current_leg() {
        let mut r = RaceResults::new(2);
        r.announce("ignored".to_string());
        r.push_leg(&[runner("A", 1.0)]);
        r.announce("first".to_string());
        r.push_leg(&[runner("A", 2.0)]);
        r.announce("second".to_string());
        assert_eq!(r.legs[0].commentary, vec!["first"]);
        assert_eq!(r.legs[1].commentary, vec!["second"]);
        assert!(r.has_commentary());
    }
}
