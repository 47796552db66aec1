//! Races, scheduled races and the leg-by-leg simulation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::horse::Horse;
use crate::logging::{audit_hash, log_opinion};
use crate::output::OutputPipeline;
use crate::racing_horse::RacingHorse;
use crate::results::RaceResults;
use crate::rules::{roll_injury_severity, Rules};
use crate::wager::Wager;

pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    /// Zero until the race store assigns one.
    pub id: u64,
    pub name: String,
    /// Number of legs.
    pub length: u32,
    pub championship: bool,
    /// How many races have carried this name, this one included.
    pub running: u32,
    /// Entered horse names, highest score first.
    pub horses: Vec<String>,
    /// Finishing order once run.
    #[serde(default)]
    pub placings: Vec<String>,
}

impl Race {
    pub fn new(name: String, length: u32, championship: bool, running: u32) -> Self {
        Self { id: 0, name, length, championship, running, horses: Vec::new(), placings: Vec::new() }
    }

    /// Display name, with the running appended after the first.
    pub fn title(&self) -> String {
        if self.running > 1 {
            format!("{} ({} running)", self.name, ordinal(self.running))
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRace {
    pub race: Race,
    pub start: DateTime<Utc>,
    pub entrants: Vec<RacingHorse>,
    #[serde(default)]
    pub wagers: Vec<Wager>,
}

impl ScheduledRace {
    /// Stables `horses` for the race and publishes the morning line.
    pub fn new<R: Rng + ?Sized>(
        mut race: Race,
        start: DateTime<Utc>,
        mut horses: Vec<Horse>,
        rules: &Rules,
        rng: &mut R,
    ) -> Self {
        horses.sort_by(|a, b| b.score(rules).total_cmp(&a.score(rules)));
        race.horses = horses.iter().map(|h| h.name.clone()).collect();
        let entrants = horses.into_iter().map(|h| RacingHorse::stable(h, rules, rng)).collect();
        let mut sr = Self { race, start, entrants, wagers: Vec::new() };
        sr.set_morning_line(rules, rng);
        sr
    }

    pub fn id(&self) -> u64 {
        self.race.id
    }

    /// Odds from each entrant's share of the field's total score, then a
    /// quarter-field of random market opinions moving points from a
    /// bottom-half horse to a top-half one. Entrants end sorted by odds.
    pub fn set_morning_line<R: Rng + ?Sized>(&mut self, rules: &Rules, rng: &mut R) {
        let n = self.entrants.len();
        if n == 0 {
            return;
        }
        let pool = 100.0 + n as f64 + rules.house_take;
        let total: f64 = self.entrants.iter().map(|e| e.score(rules)).sum();
        for e in self.entrants.iter_mut() {
            e.odds = if total > 0.0 { e.score(rules) / total * pool } else { pool / n as f64 };
        }
        self.sort_by_odds();

        let half = n / 2;
        for _ in 0..n / 4 {
            let up = rng.gen_range(0..half);
            let down = rng.gen_range(half..n);
            let shift = rng.gen_range(0.0..=rules.opinion_shift.max(0.0));
            self.entrants[up].odds += shift;
            self.entrants[down].odds = (self.entrants[down].odds - shift).max(rules.min_odds_points);
            log_opinion(self.race.id, self.entrants[up].name(), self.entrants[down].name(), shift);
        }
        self.sort_by_odds();
    }

    fn sort_by_odds(&mut self) {
        self.entrants.sort_by(|a, b| b.odds.total_cmp(&a.odds));
    }

    /// Digest of the published line, logged for audit.
    pub fn morning_line_digest(&self) -> String {
        let line: Vec<String> = self
            .entrants
            .iter()
            .map(|e| format!("{}:{:.4}", e.name(), e.odds))
            .collect();
        audit_hash(&format!("{}|{}", self.race.id, line.join(",")))
    }

    pub fn entrant(&self, name: &str) -> Option<&RacingHorse> {
        self.entrants.iter().find(|e| e.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Distinct channels with any wager on this race, watches included.
    pub fn subscribed_channels(&self) -> Vec<(u64, u64)> {
        let set: BTreeSet<(u64, u64)> = self.wagers.iter().map(|w| (w.server_id, w.channel_id)).collect();
        set.into_iter().collect()
    }

    pub fn has_wagers(&self) -> bool {
        !self.wagers.is_empty()
    }

    /// Runs every leg: each entrant may be hurt, takes two physical steps, the
    /// field is snapshotted and the output pipeline processes the leg.
    pub fn run(&mut self, pipeline: &mut OutputPipeline, rules: &Rules) -> RaceResults {
        let mut rng = rand::thread_rng();
        let injury_chance = rules.race_injury_chance.clamp(0.0, 1.0);
        for e in self.entrants.iter_mut() {
            e.reset();
        }
        let mut results = RaceResults::new(self.race.length);
        for _ in 0..self.race.length {
            for e in self.entrants.iter_mut() {
                if !e.is_injured() && rng.gen_bool(injury_chance) {
                    e.injure(roll_injury_severity(&mut rng).impact);
                }
                e.run_furlong();
                e.run_furlong();
            }
            results.push_leg(&self.entrants);
            pipeline.process(&mut results);
        }
        results
    }
}
