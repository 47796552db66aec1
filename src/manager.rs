//! The population and schedule control loop.
//!
//! One iteration: reload the schedule, keep the herd healthy, top up the
//! schedule, wait for the next start, then run and settle that race. Any
//! failure is logged and followed by a fixed cooldown; the loop itself never
//! exits.

use std::sync::Arc;

use anyhow::{ensure, Result};
use chrono::Utc;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde_json::json;
use tokio::time::{sleep, Duration};

use crate::horse::{Grade, Horse, Stat};
use crate::logging::{
    log_birth, log_injury, log_loop_failure, log_news, log_notify_dropped, log_payout, log_race_finished,
    log_retirement, ProfileScope,
};
use crate::naming::NameRegistrar;
use crate::notify::ChannelNotifier;
use crate::output::OutputPipeline;
use crate::race::{ordinal, ScheduledRace};
use crate::results::RaceResults;
use crate::rules::{roll_injury_severity, Rules};
use crate::schedule::RacingSchedule;
use crate::storage::Store;

/// What one maintenance pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationReport {
    pub injured: Option<String>,
    pub retired: Vec<String>,
    pub foals: Vec<String>,
    pub wild: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub server_id: u64,
    pub user_id: u64,
    pub horse: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaceOutcome {
    pub race_id: u64,
    pub placings: Vec<String>,
    pub payouts: Vec<Payout>,
    pub results: RaceResults,
}

pub struct PopulationManager<S, N> {
    store: Arc<S>,
    notifier: N,
    registrar: NameRegistrar,
    rules: Rules,
    schedule: RacingSchedule,
}

impl<S, N> PopulationManager<S, N>
where
    S: Store,
    N: ChannelNotifier + Send + Sync,
{
    pub fn new(store: Arc<S>, notifier: N, registrar: NameRegistrar, rules: Rules) -> Result<Self> {
        let schedule = store.load_schedule()?;
        Ok(Self { store, notifier, registrar, rules, schedule })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn schedule(&self) -> &RacingSchedule {
        &self.schedule
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    // =========================================================================
    // Population
    // =========================================================================

    /// Injury roll, breeding, retirements and the wild-horse top-up.
    ///
    /// Retirees leave the active set only after their litters are stored, so
    /// a pass that fails part way can simply be rerun. News gathered before a
    /// failure is still published.
    pub fn maintain_population(&mut self) -> Result<PopulationReport> {
        let mut report = PopulationReport::default();
        let mut news = Vec::new();
        let pass = self.population_pass(&mut report, &mut news);
        let published = self.publish_news(&news);
        pass?;
        published?;
        Ok(report)
    }

    fn population_pass(&self, report: &mut PopulationReport, news: &mut Vec<String>) -> Result<()> {
        let mut rng = rand::thread_rng();
        let mut active = self.store.list_active()?;

        let chance = self.rules.injury_chance.clamp(0.0, 1.0);
        if !active.is_empty() && rng.gen_bool(chance) {
            // seasoned horses are likelier to get hurt
            let weights: Vec<u32> = active.iter().map(|h| h.record.races_run + 1).collect();
            let idx = WeightedIndex::new(&weights)?.sample(&mut rng);
            let severity = roll_injury_severity(&mut rng);
            let horse = &mut active[idx];
            horse.injure(severity.impact);
            self.store.save_horse(horse)?;
            log_injury(&horse.name, severity.impact, horse.career_length, false);
            news.push(format!("{} has suffered {}.", horse.name, severity.label));
            report.injured = Some(horse.name.clone());
        }

        let (mut retiring, staying): (Vec<Horse>, Vec<Horse>) = active.into_iter().partition(|h| h.is_retired());
        let mut population = staying.len();
        for parent in retiring.iter().filter(|h| h.should_breed(&self.rules)) {
            // foals stored by an earlier failed pass count toward the litter
            let born = staying.iter().filter(|h| h.parent.as_deref() == Some(parent.name.as_str())).count();
            let litter = (self.rules.offspring.sample(&mut rng) as usize).saturating_sub(born);
            for _ in 0..litter {
                let name = self.registrar.generate_valid_horse_name(self.store.as_ref())?;
                let foal = parent.breed(name, &self.rules, &mut rng);
                self.store.add_active(&foal)?;
                log_birth(&foal.name, Some(&parent.name), foal.score(&self.rules));
                if Stat::ALL.iter().any(|s| foal.rank(*s, &self.rules) == Grade::S) {
                    news.push(format!("{} has sired a promising foal, {}.", parent.name, foal.name));
                }
                report.foals.push(foal.name);
                population += 1;
            }
        }

        if !retiring.is_empty() {
            let names: Vec<String> = retiring.iter().map(|h| h.name.clone()).collect();
            for horse in retiring.iter_mut() {
                horse.retire();
            }
            self.store.save_horses(&retiring)?;
            self.store.remove_active_batch(&names)?;
            for horse in &retiring {
                log_retirement(&horse.name, horse.record.races_run, horse.record.avg_placement);
                news.push(format!(
                    "{} has retired after {} races with {} wins.",
                    horse.name, horse.record.races_run, horse.record.races_won
                ));
            }
            report.retired = names;
        }

        while population < self.rules.population_floor {
            let name = self.registrar.generate_valid_horse_name(self.store.as_ref())?;
            let horse = Horse::wild(name, &self.rules, &mut rng);
            self.store.add_active(&horse)?;
            log_birth(&horse.name, None, horse.score(&self.rules));
            report.wild.push(horse.name);
            population += 1;
        }
        Ok(())
    }

    // =========================================================================
    // Schedule
    // =========================================================================

    pub fn fill_schedule(&mut self) -> Result<usize> {
        self.schedule.fill(self.store.as_ref(), &self.registrar, &self.rules, Utc::now())
    }

    /// Sleeps until the warning lead before the next start, warns subscribed
    /// channels, then sleeps out the lead. Returns the race id waited for.
    pub async fn wait_for_next_race(&self) -> Result<Option<u64>> {
        let (race_id, start) = match self.schedule.races.front() {
            Some(r) => (r.id(), r.start),
            None => return Ok(None),
        };
        let lead = chrono::Duration::seconds(self.rules.warning_lead_secs as i64);
        let until_warning = (start - lead - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        sleep(until_warning).await;

        // wagers live in the store, not in our copy of the schedule
        let current = self.store.load_schedule()?;
        if let Some((_, race)) = current.find(race_id) {
            let minutes = (start - Utc::now()).num_minutes().max(0);
            let text = format!("**{}** is about to start! Post time in {} minutes.", race.race.title(), minutes);
            self.broadcast(&race.subscribed_channels(), &text).await;
        }

        let until_start = (start - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        sleep(until_start).await;
        Ok(Some(race_id))
    }

    // =========================================================================
    // Racing
    // =========================================================================

    /// Pops the head of the schedule, runs it and settles it. Commentary is
    /// produced and posted only when someone has a wager or watch on it.
    pub async fn run_next_race(&mut self) -> Result<Option<RaceOutcome>> {
        let mut race = match self.store.pop_next_scheduled_race()? {
            Some(r) => r,
            None => return Ok(None),
        };
        if self.schedule.races.front().map(|r| r.id()) == Some(race.id()) {
            self.schedule.races.pop_front();
        }

        let mut pipeline = if race.has_wagers() { OutputPipeline::standard() } else { OutputPipeline::silent() };
        let results = {
            let _scope = ProfileScope::with_context("race_run", &[("race_id", json!(race.id()))]);
            race.run(&mut pipeline, &self.rules)
        };
        ensure!(results.is_complete(), "race {} finished with {} legs", race.id(), results.legs.len());

        if !pipeline.is_silent() {
            let channels = race.subscribed_channels();
            let header = format!("**{}** is off!", race.race.title());
            self.broadcast(&channels, &header).await;
            for leg in &results.legs {
                if !leg.commentary.is_empty() {
                    self.broadcast(&channels, &leg.commentary.join("\n")).await;
                }
                sleep(self.rules.leg_delay()).await;
            }
        }

        let placings = self.record_results(&mut race, &results)?;
        let payouts = self.settle(&race, &results)?;
        log_race_finished(
            race.id(),
            &race.race.title(),
            placings.first().map(String::as_str).unwrap_or(""),
            race.wagers.len(),
        );
        Ok(Some(RaceOutcome { race_id: race.id(), placings, payouts, results }))
    }

    /// Folds the finishing order into each horse's record, applies in-race
    /// injuries and stores the placings on the race.
    fn record_results(&self, race: &mut ScheduledRace, results: &RaceResults) -> Result<Vec<String>> {
        let standings = results.final_standings()?;
        let mut news = Vec::new();
        let mut horses = Vec::with_capacity(standings.len());
        for (i, runner) in standings.iter().enumerate() {
            // the stored horse may have moved on since the race was scheduled
            let mut horse = self.store.get_horse(runner.name())?.unwrap_or_else(|| runner.horse.clone());
            if let Some(impact) = runner.injury {
                horse.injure(impact);
                log_injury(&horse.name, impact, horse.career_length, true);
                news.push(format!("{} was injured during {}.", horse.name, race.race.title()));
            }
            let title = if i == 0 && race.race.championship {
                Some(format!("{} {}", race.race.name, ordinal(race.race.running)))
            } else {
                None
            };
            if let Some(t) = &title {
                news.push(format!("{} has won {}!", horse.name, t));
            }
            horse.record_race(i as u32 + 1, title);
            horses.push(horse);
        }
        self.store.save_horses(&horses)?;

        race.race.placings = standings.iter().map(|h| h.name().to_string()).collect();
        self.store.save_race(&race.race)?;
        self.publish_news(&news)?;
        Ok(race.race.placings.clone())
    }

    /// Pays every winning wager. A failed payout is logged and the rest are
    /// still attempted; the race then reports the first failure.
    fn settle(&self, race: &ScheduledRace, results: &RaceResults) -> Result<Vec<Payout>> {
        let standings = results.final_standings()?;
        let mut payouts = Vec::new();
        let mut failure = None;
        for wager in &race.wagers {
            let (stake, amount) = match (wager.bet.stake(), wager.winnings(&standings)) {
                (Some(stake), amount) if amount > 0 => (stake, amount),
                _ => continue,
            };
            let credit = i64::try_from(amount).unwrap_or(i64::MAX);
            match self.store.adjust(wager.server_id, stake.user_id, credit) {
                Ok(balance) => {
                    log_payout(race.id(), stake.user_id, &stake.horse, amount, balance);
                    payouts.push(Payout {
                        server_id: wager.server_id,
                        user_id: stake.user_id,
                        horse: stake.horse.clone(),
                        amount,
                    });
                }
                Err(e) => {
                    log_loop_failure("payout", &format!("{:#}", e), 0);
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e.context(format!("settling race {}", race.id()))),
            None => Ok(payouts),
        }
    }

    fn publish_news(&self, items: &[String]) -> Result<()> {
        self.store.append_news(items)?;
        log_news(items);
        Ok(())
    }

    async fn broadcast(&self, channels: &[(u64, u64)], text: &str) {
        for &(server_id, channel_id) in channels {
            if let Err(e) = self.notifier.post(server_id, channel_id, text).await {
                log_notify_dropped(server_id, channel_id, &format!("{:#}", e));
            }
        }
    }

    // =========================================================================
    // Loop
    // =========================================================================

    pub async fn run_iteration(&mut self) -> Result<Option<RaceOutcome>> {
        self.schedule = self.store.load_schedule()?;
        self.maintain_population()?;
        self.fill_schedule()?;
        self.wait_for_next_race().await?;
        self.run_next_race().await
    }

    /// One iteration that never fails: an error is logged and followed by the
    /// cooldown.
    pub async fn tick(&mut self) -> Option<RaceOutcome> {
        match self.run_iteration().await {
            Ok(outcome) => outcome,
            Err(e) => {
                log_loop_failure("iteration", &format!("{:#}", e), self.rules.failure_cooldown_secs);
                sleep(self.rules.failure_cooldown()).await;
                None
            }
        }
    }

    pub async fn run_forever(&mut self) {
        loop {
            self.tick().await;
        }
    }
}
