//! Tunable racing rules.
//!
//! Every constant the world model, scheduler and control loop read lives here.
//! `Rules::default()` carries the shipped values and `Rules::from_env()`
//! overlays anything set in the environment.

use std::time::Duration;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inclusive numeric range a stat is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatRange {
    pub min: u32,
    pub max: u32,
}

impl StatRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Position of `value` within the range, clamped to 0.0..=1.0.
    pub fn normalize(&self, value: u32) -> f64 {
        if self.max <= self.min {
            return if value >= self.max { 1.0 } else { 0.0 };
        }
        let pos = (value as f64 - self.min as f64) / (self.max - self.min) as f64;
        pos.clamp(0.0, 1.0)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        if self.max <= self.min {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }

    /// Bred stats may exceed the wild range up to twice its maximum.
    pub fn clamp_bred(&self, value: u32) -> u32 {
        value.clamp(self.min, self.max.saturating_mul(2))
    }
}

/// Inclusive floating point range used for variance factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorRange {
    pub min: f64,
    pub max: f64,
}

impl FactorRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max <= self.min {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

/// Lower bounds (normalized 0.0..=1.0) for each letter grade; anything below
/// `d` is an F.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankBands {
    pub s: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for RankBands {
    fn default() -> Self {
        Self { s: 0.9, a: 0.75, b: 0.55, c: 0.35, d: 0.15 }
    }
}

/// One row of the weighted injury-severity table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjurySeverity {
    /// Fraction of the career length removed.
    pub impact: f64,
    pub weight: u32,
    pub label: &'static str,
}

pub const INJURY_TABLE: [InjurySeverity; 4] = [
    InjurySeverity { impact: 0.1, weight: 60, label: "a minor strain" },
    InjurySeverity { impact: 0.25, weight: 25, label: "a pulled tendon" },
    InjurySeverity { impact: 0.5, weight: 11, label: "a hairline fracture" },
    InjurySeverity { impact: 1.0, weight: 4, label: "a career-ending break" },
];

/// Draws a severity from [`INJURY_TABLE`] by weight.
pub fn roll_injury_severity<R: Rng + ?Sized>(rng: &mut R) -> InjurySeverity {
    match WeightedIndex::new(INJURY_TABLE.iter().map(|s| s.weight)) {
        Ok(dist) => INJURY_TABLE[dist.sample(rng)],
        Err(_) => INJURY_TABLE[0],
    }
}

#[derive(Debug, Clone)]
pub struct Rules {
    pub speed: StatRange,
    pub power: StatRange,
    pub stamina: StatRange,
    pub career_length: StatRange,
    pub race_variance: FactorRange,
    pub breeding_variance: FactorRange,
    pub rank_bands: RankBands,
    /// Average placement at or below which a retired horse breeds.
    pub breed_threshold: f64,
    pub offspring: StatRange,
    pub population_floor: usize,
    pub injury_chance: f64,
    pub race_injury_chance: f64,
    pub race_length: StatRange,
    pub entrants: StatRange,
    pub championship_entrants: StatRange,
    pub championship_every: u32,
    pub display_window_secs: u64,
    pub race_gap_secs: StatRange,
    pub house_take: f64,
    pub opinion_shift: f64,
    pub min_odds_points: f64,
    pub warning_lead_secs: u64,
    pub leg_delay_secs: u64,
    pub failure_cooldown_secs: u64,
    pub max_name_attempts: u32,
    pub name_chain_chance: f64,
    pub max_name_len: usize,
    pub min_wager: u64,
    pub starting_funds: i64,
    pub sqlite_path: String,
    pub names_path: Option<String>,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            speed: StatRange::new(12, 20),
            power: StatRange::new(2, 5),
            stamina: StatRange::new(8, 20),
            career_length: StatRange::new(20, 60),
            race_variance: FactorRange::new(0.9, 1.1),
            breeding_variance: FactorRange::new(0.85, 1.2),
            rank_bands: RankBands::default(),
            breed_threshold: 3.0,
            offspring: StatRange::new(1, 4),
            population_floor: 60,
            injury_chance: 0.2,
            race_injury_chance: 0.002,
            race_length: StatRange::new(6, 12),
            entrants: StatRange::new(5, 8),
            championship_entrants: StatRange::new(8, 12),
            championship_every: 10,
            display_window_secs: 24 * 60 * 60,
            race_gap_secs: StatRange::new(20 * 60, 45 * 60),
            house_take: 15.0,
            opinion_shift: 3.0,
            min_odds_points: 1.0,
            warning_lead_secs: 5 * 60,
            leg_delay_secs: 4,
            failure_cooldown_secs: 6 * 60,
            max_name_attempts: 500,
            name_chain_chance: 0.25,
            max_name_len: 18,
            min_wager: 1,
            starting_funds: 1_000,
            sqlite_path: "./paddock.sqlite".to_string(),
            names_path: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// A probability from the environment. Anything unparseable, non-finite or
/// outside `[0, 1]` falls back to the default, since `gen_bool` panics on it.
fn env_rate(key: &str, default: f64) -> f64 {
    parse_rate(std::env::var(key).ok().as_deref(), default)
}

fn parse_rate(raw: Option<&str>, default: f64) -> f64 {
    match raw.and_then(|v| v.trim().parse::<f64>().ok()) {
        Some(p) if (0.0..=1.0).contains(&p) => p,
        _ => default,
    }
}

fn env_finite(key: &str, default: f64) -> f64 {
    let v: f64 = env_or(key, default);
    if v.is_finite() {
        v
    } else {
        default
    }
}

fn env_range(prefix: &str, default: StatRange) -> StatRange {
    StatRange::new(
        env_or(&format!("{}_MIN", prefix), default.min),
        env_or(&format!("{}_MAX", prefix), default.max),
    )
}

impl Rules {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            speed: env_range("SPEED", d.speed),
            power: env_range("POWER", d.power),
            stamina: env_range("STAMINA", d.stamina),
            career_length: env_range("CAREER", d.career_length),
            race_variance: d.race_variance,
            breeding_variance: d.breeding_variance,
            rank_bands: d.rank_bands,
            breed_threshold: env_finite("BREED_THRESHOLD", d.breed_threshold),
            offspring: env_range("OFFSPRING", d.offspring),
            population_floor: env_or("POPULATION_FLOOR", d.population_floor),
            injury_chance: env_rate("INJURY_CHANCE", d.injury_chance),
            race_injury_chance: env_rate("RACE_INJURY_CHANCE", d.race_injury_chance),
            race_length: env_range("RACE_LENGTH", d.race_length),
            entrants: env_range("ENTRANTS", d.entrants),
            championship_entrants: env_range("CHAMPIONSHIP_ENTRANTS", d.championship_entrants),
            championship_every: env_or("CHAMPIONSHIP_EVERY", d.championship_every),
            display_window_secs: env_or("DISPLAY_WINDOW_SECS", d.display_window_secs),
            race_gap_secs: env_range("RACE_GAP_SECS", d.race_gap_secs),
            house_take: env_finite("HOUSE_TAKE", d.house_take),
            opinion_shift: env_finite("OPINION_SHIFT", d.opinion_shift),
            min_odds_points: d.min_odds_points,
            warning_lead_secs: env_or("WARNING_LEAD_SECS", d.warning_lead_secs),
            leg_delay_secs: env_or("LEG_DELAY_SECS", d.leg_delay_secs),
            failure_cooldown_secs: env_or("FAILURE_COOLDOWN_SECS", d.failure_cooldown_secs),
            max_name_attempts: env_or("MAX_NAME_ATTEMPTS", d.max_name_attempts),
            name_chain_chance: env_rate("NAME_CHAIN_CHANCE", d.name_chain_chance),
            max_name_len: d.max_name_len,
            min_wager: env_or("MIN_WAGER", d.min_wager),
            starting_funds: env_or("STARTING_FUNDS", d.starting_funds),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
            names_path: std::env::var("NAMES_PATH").ok(),
        }
    }

    /// Number of races kept queued so the display window is always covered.
    pub fn schedule_target(&self) -> usize {
        let gap = self.race_gap_secs.min.max(1) as u64;
        (self.display_window_secs / gap).max(1) as usize
    }

    pub fn entrant_range(&self, championship: bool) -> StatRange {
        if championship {
            self.championship_entrants
        } else {
            self.entrants
        }
    }

    pub fn warning_lead(&self) -> Duration {
        Duration::from_secs(self.warning_lead_secs)
    }

    pub fn leg_delay(&self) -> Duration {
        Duration::from_secs(self.leg_delay_secs)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bounds() {
        let r = StatRange::new(10, 20);
        assert_eq!(r.normalize(10), 0.0);
        assert_eq!(r.normalize(20), 1.0);
        assert_eq!(r.normalize(15), 0.5);
        assert_eq!(r.normalize(5), 0.0);
        assert_eq!(r.normalize(40), 1.0);
    }

    #[test]
    fn test_clamp_bred_allows_double_max() {
        let r = StatRange::new(10, 20);
        assert_eq!(r.clamp_bred(3), 10);
        assert_eq!(r.clamp_bred(35), 35);
        assert_eq!(r.clamp_bred(99), 40);
    }

    #[test]
    fn test_schedule_target_covers_window() {
        let rules = Rules::default();
        // 24h window, 20 minute minimum gap
        assert_eq!(rules.schedule_target(), 72);
    }

    #[test]
    fn test_sample_within_range() {
        let mut rng = rand::thread_rng();
        let r = StatRange::new(3, 7);
        for _ in 0..200 {
            let v = r.sample(&mut rng);
            assert!((3..=7).contains(&v));
        }
    }

    #[test]
    fn test_roll_injury_severity_from_table() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let sev = roll_injury_severity(&mut rng);
            assert!(INJURY_TABLE.contains(&sev));
        }
    }

    #[test]
    fn test_parse_rate_rejects_non_finite() {
        assert_eq!(parse_rate(Some("0.35"), 0.2), 0.35);
        assert_eq!(parse_rate(Some(" 1 "), 0.2), 1.0);
        assert_eq!(parse_rate(Some("nan"), 0.2), 0.2);
        assert_eq!(parse_rate(Some("NaN"), 0.2), 0.2);
        assert_eq!(parse_rate(Some("inf"), 0.2), 0.2);
        assert_eq!(parse_rate(Some("1.5"), 0.2), 0.2);
        assert_eq!(parse_rate(Some("-0.1"), 0.2), 0.2);
        assert_eq!(parse_rate(Some("often"), 0.2), 0.2);
        assert_eq!(parse_rate(None, 0.2), 0.2);
    }

    #[test]
    fn test_injury_table_weights_nonzero() {
        assert!(INJURY_TABLE.iter().all(|s| s.weight > 0));
        assert!(INJURY_TABLE.iter().any(|s| s.impact >= 1.0));
    }
}
