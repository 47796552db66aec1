//! Race-day wrapper around a [`Horse`].
//!
//! A `RacingHorse` owns a copy of the horse for the lifetime of one race, plus
//! the per-race variance factors, the live simulation state and the morning
//! line odds point.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::horse::Horse;
use crate::rules::Rules;

/// Fractional odds on offer, shortest first.
pub const ODDS_TABLE: [(&str, f64); 30] = [
    ("1-9", 1.0 / 9.0),
    ("1-5", 0.2),
    ("2-7", 2.0 / 7.0),
    ("2-5", 0.4),
    ("1-2", 0.5),
    ("3-5", 0.6),
    ("4-5", 0.8),
    ("1-1", 1.0),
    ("6-5", 1.2),
    ("7-5", 1.4),
    ("3-2", 1.5),
    ("8-5", 1.6),
    ("9-5", 1.8),
    ("2-1", 2.0),
    ("5-2", 2.5),
    ("3-1", 3.0),
    ("7-2", 3.5),
    ("4-1", 4.0),
    ("9-2", 4.5),
    ("5-1", 5.0),
    ("6-1", 6.0),
    ("7-1", 7.0),
    ("8-1", 8.0),
    ("10-1", 10.0),
    ("12-1", 12.0),
    ("15-1", 15.0),
    ("20-1", 20.0),
    ("30-1", 30.0),
    ("50-1", 50.0),
    ("99-1", 99.0),
];

/// Implied share of the pool (in points out of 100) for fractional odds.
pub fn implied_points(ratio: f64) -> f64 {
    100.0 / (ratio + 1.0)
}

/// Nearest table entry to an odds point value.
pub fn nearest_odds(points: f64) -> (&'static str, f64) {
    let mut best = ODDS_TABLE[0];
    let mut best_diff = f64::MAX;
    for entry in ODDS_TABLE.iter() {
        let diff = (implied_points(entry.1) - points).abs();
        if diff < best_diff {
            best_diff = diff;
            best = *entry;
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacingHorse {
    pub horse: Horse,
    pub speed_factor: f64,
    pub power_factor: f64,
    pub stamina_factor: f64,
    pub distance: f64,
    pub current_speed: f64,
    pub remaining_stamina: f64,
    /// Morning line point value, fixed at race creation.
    pub odds: f64,
    #[serde(default)]
    pub injury: Option<f64>,
}

impl RacingHorse {
    /// Stables a horse for one race with fresh variance.
    pub fn stable<R: Rng + ?Sized>(horse: Horse, rules: &Rules, rng: &mut R) -> Self {
        let mut rh = Self {
            horse,
            speed_factor: rules.race_variance.sample(rng),
            power_factor: rules.race_variance.sample(rng),
            stamina_factor: rules.race_variance.sample(rng),
            distance: 0.0,
            current_speed: 0.0,
            remaining_stamina: 0.0,
            odds: 0.0,
            injury: None,
        };
        rh.reset();
        rh
    }

    pub fn name(&self) -> &str {
        &self.horse.name
    }

    pub fn speed(&self) -> f64 {
        self.horse.speed as f64 * self.speed_factor
    }

    pub fn power(&self) -> f64 {
        self.horse.power as f64 * self.power_factor
    }

    pub fn stamina(&self) -> f64 {
        self.horse.stamina as f64 * self.stamina_factor
    }

    pub fn score(&self, rules: &Rules) -> f64 {
        self.horse.score(rules)
    }

    /// Back to the starting gate.
    pub fn reset(&mut self) {
        self.distance = 0.0;
        self.current_speed = 0.0;
        self.remaining_stamina = self.stamina();
        self.injury = None;
    }

    /// One physical update: accelerate by power while stamina lasts, otherwise
    /// shed half the power; integrate distance with the trapezoid rule.
    pub fn run_furlong(&mut self) {
        let previous_speed = self.current_speed;
        let power = self.power();
        if self.remaining_stamina <= 0.0 {
            self.current_speed -= power / 2.0;
        } else {
            self.current_speed += power;
        }
        let top = self.speed();
        self.current_speed = self.current_speed.clamp(power.min(top), top);
        self.distance += (previous_speed + self.current_speed) / 2.0;
        self.remaining_stamina = (self.remaining_stamina - 1.0).clamp(0.0, self.stamina());
    }

    pub fn injure(&mut self, impact: f64) {
        self.injury = Some(impact);
        self.remaining_stamina = 0.0;
    }

    pub fn is_injured(&self) -> bool {
        self.injury.is_some()
    }

    pub fn odds_str(&self) -> &'static str {
        nearest_odds(self.odds).0
    }

    pub fn odds_float(&self) -> f64 {
        nearest_odds(self.odds).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horse::RacingRecord;

    fn runner(speed: u32, power: u32, stamina: u32) -> RacingHorse {
        let horse = Horse {
            name: "Quiet Comet".to_string(),
            speed,
            power,
            stamina,
            career_length: 30,
            parent: None,
            record: RacingRecord::default(),
        };
        let mut rh = RacingHorse {
            horse,
            speed_factor: 1.0,
            power_factor: 1.0,
            stamina_factor: 1.0,
            distance: 0.0,
            current_speed: 0.0,
            remaining_stamina: 0.0,
            odds: 0.0,
            injury: None,
        };
        rh.reset();
        rh
    }

    #[test]
    fn test_first_furlong_accelerates_to_power() {
        let mut rh = runner(16, 4, 10);
        rh.run_furlong();
        assert_eq!(rh.current_speed, 4.0);
        assert_eq!(rh.distance, 2.0);
        assert_eq!(rh.remaining_stamina, 9.0);
    }

    #[test]
    fn test_speed_capped_at_top_speed() {
        let mut rh = runner(10, 4, 50);
        for _ in 0..10 {
            rh.run_furlong();
            assert!(rh.current_speed <= 10.0);
        }
        assert_eq!(rh.current_speed, 10.0);
    }

    #[test]
    fn test_exhausted_horse_never_speeds_up() {
        let mut rh = runner(18, 3, 4);
        let mut last = f64::MAX;
        let mut exhausted = false;
        for _ in 0..40 {
            rh.run_furlong();
            if exhausted {
                assert!(rh.current_speed <= last, "speed rose from {} to {}", last, rh.current_speed);
                assert!(rh.current_speed >= rh.power());
            }
            if rh.remaining_stamina == 0.0 {
                exhausted = true;
            }
            last = rh.current_speed;
        }
        assert_eq!(rh.current_speed, 3.0);
    }

    #[test]
    fn test_stamina_never_negative() {
        let mut rh = runner(18, 3, 2);
        for _ in 0..10 {
            rh.run_furlong();
            assert!(rh.remaining_stamina >= 0.0);
        }
    }

    #[test]
    fn test_injury_drains_stamina() {
        let mut rh = runner(18, 3, 12);
        rh.run_furlong();
        rh.injure(0.25);
        assert!(rh.is_injured());
        assert_eq!(rh.remaining_stamina, 0.0);
    }

    #[test]
    fn test_nearest_odds_picks_closest() {
        // 1-1 implies 50 points, 4-5 about 55.6
        assert_eq!(nearest_odds(50.0).0, "1-1");
        assert_eq!(nearest_odds(56.0).0, "4-5");
        // 6-1 implies ~14.3 points
        assert_eq!(nearest_odds(14.0).0, "6-1");
        assert_eq!(nearest_odds(0.0).0, "99-1");
        assert_eq!(nearest_odds(200.0).0, "1-9");
    }

    #[test]
    fn test_odds_float_matches_str() {
        let mut rh = runner(16, 4, 10);
        rh.odds = 25.0;
        assert_eq!(rh.odds_str(), "3-1");
        assert_eq!(rh.odds_float(), 3.0);
    }

    #[test]
    fn test_stable_applies_variance() {
        let rules = Rules::default();
        let rh = RacingHorse::stable(runner(16, 4, 10).horse, &rules, &mut rand::thread_rng());
        for f in [rh.speed_factor, rh.power_factor, rh.stamina_factor] {
            assert!(f >= rules.race_variance.min && f <= rules.race_variance.max);
        }
        assert_eq!(rh.remaining_stamina, rh.stamina());
    }
}
