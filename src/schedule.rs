//! The queue of upcoming races.

use std::collections::VecDeque;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::horse::Horse;
use crate::logging::log_race_scheduled;
use crate::naming::NameRegistrar;
use crate::race::{Race, ScheduledRace};
use crate::rules::Rules;
use crate::storage::Store;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RacingSchedule {
    pub races: VecDeque<ScheduledRace>,
    /// Regular races since the last championship.
    pub championship_counter: u32,
}

impl RacingSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.races.len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }

    /// Advances the counter; true (and reset) once it reaches `every`.
    pub fn next_championship(&mut self, every: u32) -> bool {
        if every == 0 {
            return false;
        }
        self.championship_counter += 1;
        if self.championship_counter >= every {
            self.championship_counter = 0;
            true
        } else {
            false
        }
    }

    /// A random gap after the last queued race, or after `now` when the queue
    /// is empty or already behind.
    pub fn next_start<R: Rng + ?Sized>(&self, rules: &Rules, now: DateTime<Utc>, rng: &mut R) -> DateTime<Utc> {
        let base = match self.races.back() {
            Some(last) if last.start > now => last.start,
            _ => now,
        };
        base + Duration::seconds(rules.race_gap_secs.sample(rng) as i64)
    }

    pub fn find(&self, race_id: u64) -> Option<(usize, &ScheduledRace)> {
        self.races.iter().enumerate().find(|(_, r)| r.id() == race_id)
    }

    /// Queues new races until the display window is covered. Each race is
    /// persisted and pushed to the stored schedule as it is created.
    pub fn fill<S: Store + ?Sized>(
        &mut self,
        store: &S,
        registrar: &NameRegistrar,
        rules: &Rules,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut rng = rand::thread_rng();
        let active = store.list_active()?;
        let target = rules.schedule_target();
        let mut added = 0;
        while self.races.len() < target {
            let championship = self.next_championship(rules.championship_every);
            let range = rules.entrant_range(championship);
            if active.len() < range.min.max(1) as usize {
                bail!(
                    "cannot schedule a {} race: {} active horses, need {}",
                    if championship { "championship" } else { "regular" },
                    active.len(),
                    range.min.max(1)
                );
            }
            let count = (range.sample(&mut rng) as usize).min(active.len());
            let entrants = pick_entrants(&active, count, championship, rules, &mut rng);

            let existing: Vec<&str> = self.races.iter().map(|r| r.race.name.as_str()).collect();
            let name = registrar.generate_valid_race_name(championship, &existing)?;
            let running = store.race_name_runs(&name)? + 1;
            let mut race = Race::new(name, rules.race_length.sample(&mut rng), championship, running);
            race.id = store.next_race_id()?;

            let start = self.next_start(rules, now, &mut rng);
            let scheduled = ScheduledRace::new(race, start, entrants, rules, &mut rng);
            store.save_race(&scheduled.race)?;
            store.push_scheduled_race(&scheduled)?;
            store.save_championship_counter(self.championship_counter)?;
            log_race_scheduled(
                scheduled.id(),
                &scheduled.race.title(),
                &scheduled.start.to_rfc3339(),
                scheduled.entrants.len(),
                championship,
                &scheduled.morning_line_digest(),
            );
            self.races.push_back(scheduled);
            added += 1;
        }
        Ok(added)
    }
}

/// Championships take the best horses by score; other races draw at random.
fn pick_entrants<R: Rng + ?Sized>(
    active: &[Horse],
    count: usize,
    championship: bool,
    rules: &Rules,
    rng: &mut R,
) -> Vec<Horse> {
    if championship {
        let mut ranked: Vec<&Horse> = active.iter().collect();
        ranked.sort_by(|a, b| b.score(rules).total_cmp(&a.score(rules)));
        ranked.into_iter().take(count).cloned().collect()
    } else {
        active.choose_multiple(rng, count).cloned().collect()
    }
}
