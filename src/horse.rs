//! Persistent horse attributes, racing record and breeding.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::rules::{Rules, StatRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stat {
    Speed,
    Power,
    Stamina,
}

impl Stat {
    pub const ALL: [Stat; 3] = [Stat::Speed, Stat::Power, Stat::Stamina];

    pub fn range(&self, rules: &Rules) -> StatRange {
        match self {
            Stat::Speed => rules.speed,
            Stat::Power => rules.power,
            Stat::Stamina => rules.stamina,
        }
    }
}

/// Letter grade for a stat. Variants are declared worst first so the derived
/// ordering reads naturally: `Grade::S > Grade::F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    F,
    D,
    C,
    B,
    A,
    S,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::S => "S",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RacingRecord {
    pub races_run: u32,
    pub races_won: u32,
    /// Running mean of finishing positions (1 = first).
    pub avg_placement: f64,
    pub titles: Vec<String>,
}

impl RacingRecord {
    pub fn add_result(&mut self, placement: u32) {
        self.races_run += 1;
        let n = self.races_run as f64;
        self.avg_placement = (self.avg_placement * (n - 1.0) + placement as f64) / n;
        if placement == 1 {
            self.races_won += 1;
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.races_run == 0 {
            0.0
        } else {
            self.races_won as f64 / self.races_run as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Horse {
    pub name: String,
    pub speed: u32,
    pub power: u32,
    pub stamina: u32,
    /// Races allowed before mandatory retirement.
    pub career_length: u32,
    pub parent: Option<String>,
    #[serde(default)]
    pub record: RacingRecord,
}

impl Horse {
    /// An unrelated horse with every stat drawn uniformly from the rules.
    pub fn wild<R: Rng + ?Sized>(name: String, rules: &Rules, rng: &mut R) -> Self {
        Self {
            name,
            speed: rules.speed.sample(rng),
            power: rules.power.sample(rng),
            stamina: rules.stamina.sample(rng),
            career_length: rules.career_length.sample(rng),
            parent: None,
            record: RacingRecord::default(),
        }
    }

    pub fn stat(&self, stat: Stat) -> u32 {
        match stat {
            Stat::Speed => self.speed,
            Stat::Power => self.power,
            Stat::Stamina => self.stamina,
        }
    }

    /// Sum of each stat's normalized position in its range, 0.0..=3.0.
    pub fn score(&self, rules: &Rules) -> f64 {
        Stat::ALL
            .iter()
            .map(|s| s.range(rules).normalize(self.stat(*s)))
            .sum()
    }

    pub fn rank(&self, stat: Stat, rules: &Rules) -> Grade {
        grade_for(stat.range(rules).normalize(self.stat(stat)), rules)
    }

    pub fn is_retired(&self) -> bool {
        self.record.races_run >= self.career_length
    }

    /// Fixes the career at the races actually run.
    pub fn retire(&mut self) {
        self.career_length = self.record.races_run;
    }

    /// Shortens the career by `impact` of its length. Returns races lost.
    pub fn injure(&mut self, impact: f64) -> u32 {
        let lost = (impact.clamp(0.0, 1.0) * self.career_length as f64) as u32;
        self.career_length = self.career_length.saturating_sub(lost);
        lost
    }

    /// Applies one finished race. A horse that was already retired when the
    /// race ran keeps `races_run <= career_length`.
    pub fn record_race(&mut self, placement: u32, title: Option<String>) {
        let was_retired = self.is_retired();
        self.record.add_result(placement);
        if let Some(title) = title {
            self.record.titles.push(title);
        }
        if was_retired {
            self.career_length = self.career_length.max(self.record.races_run);
        }
    }

    pub fn should_breed(&self, rules: &Rules) -> bool {
        self.record.races_run > 0 && self.record.avg_placement <= rules.breed_threshold
    }

    /// A foal whose stats are each the parent's scaled by a fresh breeding
    /// factor, rounded up and clamped to `[min, 2 * max]`.
    pub fn breed<R: Rng + ?Sized>(&self, name: String, rules: &Rules, rng: &mut R) -> Horse {
        let mut inherit = |stat: Stat| {
            let factor = rules.breeding_variance.sample(rng);
            let raw = (factor * self.stat(stat) as f64).ceil().max(0.0) as u32;
            stat.range(rules).clamp_bred(raw)
        };
        let speed = inherit(Stat::Speed);
        let power = inherit(Stat::Power);
        let stamina = inherit(Stat::Stamina);
        Horse {
            name,
            speed,
            power,
            stamina,
            career_length: rules.career_length.sample(rng),
            parent: Some(self.name.clone()),
            record: RacingRecord::default(),
        }
    }
}

pub fn grade_for(position: f64, rules: &Rules) -> Grade {
    let b = &rules.rank_bands;
    if position >= b.s {
        Grade::S
    } else if position >= b.a {
        Grade::A
    } else if position >= b.b {
        Grade::B
    } else if position >= b.c {
        Grade::C
    } else if position >= b.d {
        Grade::D
    } else {
        Grade::F
    }
}
