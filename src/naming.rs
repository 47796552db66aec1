//! Horse and race name generation.
//!
//! Names are spliced together from fragment tables. A fragment marked
//! `singular` may stand alone as a complete name; a `chainable` fragment may be
//! followed by one extra fragment before the final word.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::log_name_retry;
use crate::rules::Rules;
use crate::storage::HorseStore;

/// Warn after this many consecutive rejected candidates.
const WARN_EVERY: u32 = 5;

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("fragment table `{0}` is empty")]
    EmptyTable(&'static str),
    #[error("no valid {kind} name after {attempts} attempts")]
    Exhausted { kind: &'static str, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    #[serde(default)]
    pub singular: bool,
    #[serde(default)]
    pub chainable: bool,
}

impl Fragment {
    fn plain(text: &str) -> Self {
        Self { text: text.to_string(), singular: false, chainable: false }
    }

    fn singular(text: &str) -> Self {
        Self { text: text.to_string(), singular: true, chainable: false }
    }

    fn chainable(text: &str) -> Self {
        Self { text: text.to_string(), singular: false, chainable: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameTables {
    pub horse_first: Vec<Fragment>,
    pub horse_last: Vec<Fragment>,
    pub race_first: Vec<String>,
    pub race_last: Vec<String>,
    pub championship_last: Vec<String>,
}

impl NameTables {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading name tables from {}", path.display()))?;
        let tables: NameTables = serde_json::from_str(&raw)
            .with_context(|| format!("parsing name tables from {}", path.display()))?;
        tables.check()?;
        Ok(tables)
    }

    fn check(&self) -> Result<(), NamingError> {
        if self.horse_first.is_empty() {
            return Err(NamingError::EmptyTable("horse_first"));
        }
        if self.horse_last.is_empty() {
            return Err(NamingError::EmptyTable("horse_last"));
        }
        if self.race_first.is_empty() {
            return Err(NamingError::EmptyTable("race_first"));
        }
        if self.race_last.is_empty() {
            return Err(NamingError::EmptyTable("race_last"));
        }
        if self.championship_last.is_empty() {
            return Err(NamingError::EmptyTable("championship_last"));
        }
        Ok(())
    }

    pub fn builtin() -> Self {
        let horse_first = [
            "Amber", "Autumn", "Bold", "Brass", "Copper", "Dusty", "Ember", "Fancy",
            "Gallant", "Golden", "Hidden", "Iron", "Jolly", "Lucky", "Midnight", "Misty",
            "Noble", "Prairie", "Quiet", "Rapid", "Royal", "Rusty", "Silver", "Storm",
            "Sunny", "Velvet", "Wild", "Winter",
        ];
        let chainable = ["Little", "Big", "Old", "Sweet", "Mister", "Lady"];
        let singular_first = ["Seabiscuit", "Mischief", "Tumbleweed", "Sundance"];
        let horse_last = [
            "Arrow", "Blaze", "Comet", "Dancer", "Dream", "Echo", "Flash", "Gambit",
            "Heart", "Jewel", "Legend", "Maverick", "Meadow", "Monarch", "Outlaw", "Pepper",
            "Promise", "Rebel", "Ribbon", "Rocket", "Runner", "Shadow", "Spirit", "Spur",
            "Thunder", "Whisper", "Wind", "Zephyr",
        ];
        let singular_last = ["Buttercup", "Rascal", "Biscuit"];

        let mut first: Vec<Fragment> = horse_first.iter().map(|t| Fragment::plain(t)).collect();
        first.extend(chainable.iter().map(|t| Fragment::chainable(t)));
        first.extend(singular_first.iter().map(|t| Fragment::singular(t)));
        let mut last: Vec<Fragment> = horse_last.iter().map(|t| Fragment::plain(t)).collect();
        last.extend(singular_last.iter().map(|t| Fragment::singular(t)));

        let strings = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            horse_first: first,
            horse_last: last,
            race_first: strings(&[
                "Autumn", "Bluegrass", "Canyon", "Coastal", "Frontier", "Harbor", "Highland",
                "Lakeside", "Maple", "Meadowlark", "Prairie", "Riverside", "Sagebrush",
                "Spring", "Summit", "Sunset", "Thistle", "Valley", "Willow", "Winter",
            ]),
            race_last: strings(&[
                "Mile", "Sprint", "Stakes", "Handicap", "Derby", "Dash", "Classic", "Invitational",
                "Purse", "Trophy",
            ]),
            championship_last: strings(&["Championship", "Grand Prix", "Crown", "Gold Cup", "Cup Final"]),
        }
    }
}

fn choose<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R, table: &'static str) -> Result<&'a T, NamingError> {
    items.choose(rng).ok_or(NamingError::EmptyTable(table))
}

/// Name generation service. Built once from loaded tables and shared by the
/// population manager and the scheduler.
#[derive(Debug, Clone)]
pub struct NameRegistrar {
    tables: NameTables,
    chain_chance: f64,
    max_len: usize,
    max_attempts: u32,
}

impl NameRegistrar {
    pub fn new(tables: NameTables, rules: &Rules) -> Self {
        Self {
            tables,
            chain_chance: rules.name_chain_chance.clamp(0.0, 1.0),
            max_len: rules.max_name_len,
            max_attempts: rules.max_name_attempts.max(1),
        }
    }

    pub fn generate_horse_name<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String, NamingError> {
        let first = choose(&self.tables.horse_first, rng, "horse_first")?;
        if first.singular && rng.gen_bool(0.5) {
            return Ok(first.text.clone());
        }
        let last = choose(&self.tables.horse_last, rng, "horse_last")?;
        if last.singular && rng.gen_bool(0.5) {
            return Ok(last.text.clone());
        }
        let mut words = vec![first.text.as_str()];
        if first.chainable && rng.gen_bool(self.chain_chance) {
            words.push(choose(&self.tables.horse_first, rng, "horse_first")?.text.as_str());
        }
        words.push(last.text.as_str());
        Ok(words.join(" "))
    }

    pub fn generate_race_name<R: Rng + ?Sized>(&self, championship: bool, rng: &mut R) -> Result<String, NamingError> {
        let first = choose(&self.tables.race_first, rng, "race_first")?;
        if championship {
            let last = choose(&self.tables.championship_last, rng, "championship_last")?;
            Ok(format!("The {} {}", first, last))
        } else {
            let last = choose(&self.tables.race_last, rng, "race_last")?;
            Ok(format!("{} {}", first, last))
        }
    }

    /// Structural checks only: non-empty, short enough, no repeated words.
    pub fn is_well_formed(&self, name: &str) -> bool {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.chars().count() > self.max_len {
            return false;
        }
        let mut seen = HashSet::new();
        trimmed.split_whitespace().all(|w| seen.insert(w.to_lowercase()))
    }

    /// Retries generation until a well-formed name not present in the store
    /// comes up, giving up after `max_name_attempts`.
    pub fn generate_valid_horse_name<S: HorseStore + ?Sized>(&self, store: &S) -> Result<String> {
        let mut attempts = 0;
        loop {
            let candidate = self.generate_horse_name(&mut rand::thread_rng())?;
            attempts += 1;
            if self.is_well_formed(&candidate) && store.get_horse(&candidate)?.is_none() {
                return Ok(candidate);
            }
            if attempts % WARN_EVERY == 0 {
                log_name_retry("horse", attempts, &candidate);
            }
            if attempts >= self.max_attempts {
                return Err(NamingError::Exhausted { kind: "horse", attempts }.into());
            }
        }
    }

    /// Race names only need to be unique among the races currently scheduled.
    pub fn generate_valid_race_name(&self, championship: bool, existing: &[&str]) -> Result<String, NamingError> {
        let taken: HashSet<String> = existing.iter().map(|n| n.to_lowercase()).collect();
        let mut attempts = 0;
        loop {
            let candidate = self.generate_race_name(championship, &mut rand::thread_rng())?;
            attempts += 1;
            if !taken.contains(&candidate.to_lowercase()) {
                return Ok(candidate);
            }
            if attempts % WARN_EVERY == 0 {
                log_name_retry("race", attempts, &candidate);
            }
            if attempts >= self.max_attempts {
                return Err(NamingError::Exhausted { kind: "race", attempts });
            }
        }
    }
}
