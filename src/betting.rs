//! User-facing betting and read-side queries.
//!
//! Rejections are returned as [`BetRejection`] values whose `Display` text is
//! meant to be shown to the bettor as-is.

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::horse::{Grade, Horse, Stat};
use crate::ledger::InsufficientFunds;
use crate::logging::{log_bet, log_bet_rejected};
use crate::race::ScheduledRace;
use crate::rules::Rules;
use crate::storage::Store;
use crate::wager::{Bet, BetKind, Stake, Wager};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BetRejection {
    #[error("unknown bet type `{0}`; use win, show, place or watch")]
    UnknownKind(String),
    #[error("`{0}` is not a valid wager amount")]
    BadAmount(String),
    #[error("the minimum wager is {min}")]
    BelowMinimum { min: u64 },
    #[error("name a horse to bet on")]
    MissingHorse,
    #[error("race {0} is not open for betting")]
    RaceNotFound(u64),
    #[error("race {0} is already past post time")]
    PostTimePassed(u64),
    #[error("{horse} is not running in race {race_id}")]
    HorseNotEntered { race_id: u64, horse: String },
    #[error("you only have {balance} to wager, not {amount}")]
    InsufficientFunds { balance: i64, amount: u64 },
    #[error("betting is unavailable right now")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetRequest {
    pub server_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub race_id: u64,
    pub kind: String,
    pub horse: Option<String>,
    pub amount: Option<String>,
}

/// Validates and records a bet. The stake is debited before the wager is
/// attached to the race and refunded if the race has left the schedule in the
/// meantime.
pub fn place_bet<S: Store + ?Sized>(store: &S, rules: &Rules, req: &BetRequest) -> Result<Wager, BetRejection> {
    let out = try_place_bet(store, rules, req);
    if let Err(rejection) = &out {
        log_bet_rejected(req.race_id, req.user_id, &rejection.to_string());
    }
    out
}

fn unavailable(err: anyhow::Error) -> BetRejection {
    BetRejection::Unavailable(format!("{:#}", err))
}

fn try_place_bet<S: Store + ?Sized>(store: &S, rules: &Rules, req: &BetRequest) -> Result<Wager, BetRejection> {
    let kind: BetKind = req.kind.parse().map_err(BetRejection::UnknownKind)?;
    let schedule = store.load_schedule().map_err(unavailable)?;
    let (_, race) = schedule.find(req.race_id).ok_or(BetRejection::RaceNotFound(req.race_id))?;
    // a late race stays queued through a failure cooldown but is closed
    if race.start <= Utc::now() {
        return Err(BetRejection::PostTimePassed(req.race_id));
    }

    if kind == BetKind::Watch {
        let wager = Wager::new(req.server_id, req.channel_id, Bet::Watch);
        if !store.add_wager(req.race_id, &wager).map_err(unavailable)? {
            return Err(BetRejection::RaceNotFound(req.race_id));
        }
        log_bet(req.race_id, req.user_id, kind.as_str(), None, 0);
        return Ok(wager);
    }

    let raw_amount = req.amount.as_deref().unwrap_or("").trim();
    let amount: u64 = raw_amount.parse().map_err(|_| BetRejection::BadAmount(raw_amount.to_string()))?;
    let debit = i64::try_from(amount).map_err(|_| BetRejection::BadAmount(raw_amount.to_string()))?;
    if amount < rules.min_wager.max(1) {
        return Err(BetRejection::BelowMinimum { min: rules.min_wager.max(1) });
    }
    let asked = req.horse.as_deref().map(str::trim).filter(|h| !h.is_empty()).ok_or(BetRejection::MissingHorse)?;
    let horse = race
        .entrant(asked)
        .map(|e| e.name().to_string())
        .ok_or_else(|| BetRejection::HorseNotEntered { race_id: req.race_id, horse: asked.to_string() })?;

    store.adjust(req.server_id, req.user_id, -debit).map_err(|e| match e.downcast_ref::<InsufficientFunds>() {
        Some(f) => BetRejection::InsufficientFunds { balance: f.balance, amount },
        None => unavailable(e),
    })?;

    let stake = Stake { user_id: req.user_id, horse: horse.clone(), amount };
    let bet = match Bet::new(kind, Some(stake)) {
        Some(bet) => bet,
        None => {
            refund(store, req, debit);
            return Err(BetRejection::UnknownKind(req.kind.clone()));
        }
    };
    let wager = Wager::new(req.server_id, req.channel_id, bet);
    match store.add_wager(req.race_id, &wager) {
        Ok(true) => {
            log_bet(req.race_id, req.user_id, kind.as_str(), Some(&horse), amount);
            Ok(wager)
        }
        Ok(false) => {
            refund(store, req, debit);
            Err(BetRejection::RaceNotFound(req.race_id))
        }
        Err(e) => {
            refund(store, req, debit);
            Err(unavailable(e))
        }
    }
}

fn refund<S: Store + ?Sized>(store: &S, req: &BetRequest, amount: i64) {
    if let Err(e) = store.adjust(req.server_id, req.user_id, amount) {
        log_bet_rejected(req.race_id, req.user_id, &format!("refund of {} failed: {:#}", amount, e));
    }
}

// =============================================================================
// Queries
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RaceSummary {
    pub id: u64,
    pub title: String,
    pub start: DateTime<Utc>,
    pub length: u32,
    pub championship: bool,
    pub entrants: usize,
}

impl fmt::Display for RaceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}{} at {} ({} horses, {} furlongs)",
            self.id,
            self.title,
            if self.championship { " [championship]" } else { "" },
            self.start.format("%H:%M UTC"),
            self.entrants,
            self.length
        )
    }
}

pub fn upcoming_races<S: Store + ?Sized>(store: &S, limit: usize) -> Result<Vec<RaceSummary>> {
    let schedule = store.load_schedule()?;
    Ok(schedule
        .races
        .iter()
        .take(limit)
        .map(|r| RaceSummary {
            id: r.id(),
            title: r.race.title(),
            start: r.start,
            length: r.race.length,
            championship: r.race.championship,
            entrants: r.entrants.len(),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardLine {
    pub name: String,
    pub odds: &'static str,
    pub speed: Grade,
    pub power: Grade,
    pub stamina: Grade,
}

impl fmt::Display for CardLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) SPD {} POW {} STA {}",
            self.name, self.odds, self.speed, self.power, self.stamina
        )
    }
}

/// Entrants in morning-line order with odds and base stat grades.
pub fn race_card(race: &ScheduledRace, rules: &Rules) -> Vec<CardLine> {
    race.entrants
        .iter()
        .map(|e| CardLine {
            name: e.name().to_string(),
            odds: e.odds_str(),
            speed: e.horse.rank(Stat::Speed, rules),
            power: e.horse.rank(Stat::Power, rules),
            stamina: e.horse.rank(Stat::Stamina, rules),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct HorseReport {
    pub horse: Horse,
    pub speed: Grade,
    pub power: Grade,
    pub stamina: Grade,
    pub retired: bool,
}

impl fmt::Display for HorseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.horse;
        write!(
            f,
            "{}: SPD {} POW {} STA {}, {} of {} races run, {} won ({:.0}%), avg place {:.2}",
            h.name,
            self.speed,
            self.power,
            self.stamina,
            h.record.races_run,
            h.career_length,
            h.record.races_won,
            h.record.win_rate() * 100.0,
            h.record.avg_placement
        )?;
        if let Some(parent) = &h.parent {
            write!(f, ", sired by {}", parent)?;
        }
        if !h.record.titles.is_empty() {
            write!(f, ", titles: {}", h.record.titles.join(", "))?;
        }
        if self.retired {
            write!(f, " (retired)")?;
        }
        Ok(())
    }
}

pub fn horse_report<S: Store + ?Sized>(store: &S, name: &str, rules: &Rules) -> Result<Option<HorseReport>> {
    Ok(store.get_horse(name)?.map(|horse| HorseReport {
        speed: horse.rank(Stat::Speed, rules),
        power: horse.rank(Stat::Power, rules),
        stamina: horse.rank(Stat::Stamina, rules),
        retired: horse.is_retired(),
        horse,
    }))
}

/// News lines from the last `window`, newest first, each prefixed with its
/// timestamp.
pub fn recent_news<S: Store + ?Sized>(store: &S, window: Duration) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for (at, items) in store.recent_news(window)? {
        let stamp = at.format("%Y-%m-%d %H:%M");
        lines.extend(items.into_iter().map(|item| format!("[{}] {}", stamp, item)));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::FundsLedger;
    use crate::race::Race;
    use crate::storage::{HorseStore, NewsStore, RaceStore, SqliteStore};
    use crate::testutil::horse;

    fn setup() -> (SqliteStore, Rules, u64) {
        setup_starting(Utc::now() + Duration::minutes(10))
    }

    fn setup_starting(start: DateTime<Utc>) -> (SqliteStore, Rules, u64) {
        let rules = Rules::default();
        let store = SqliteStore::in_memory(&rules).unwrap();
        let mut race = Race::new("Harbor Mile".to_string(), 6, false, 1);
        race.id = store.next_race_id().unwrap();
        let horses = vec![
            horse("Amber Arrow", 15, 3, 12),
            horse("Iron Spur", 18, 4, 16),
            horse("Rusty Rebel", 13, 2, 9),
        ];
        let sr = ScheduledRace::new(race, start, horses, &rules, &mut rand::thread_rng());
        store.save_race(&sr.race).unwrap();
        store.push_scheduled_race(&sr).unwrap();
        let id = sr.id();
        (store, rules, id)
    }

    fn request(race_id: u64, kind: &str, horse: Option<&str>, amount: Option<&str>) -> BetRequest {
        BetRequest {
            server_id: 1,
            channel_id: 2,
            user_id: 3,
            race_id,
            kind: kind.to_string(),
            horse: horse.map(str::to_string),
            amount: amount.map(str::to_string),
        }
    }

    #[test]
    fn test_win_bet_debits_and_attaches() {
        let (store, rules, id) = setup();
        let w = place_bet(&store, &rules, &request(id, "win", Some("iron spur"), Some("100"))).unwrap();
        assert_eq!(w.bet.stake().unwrap().horse, "Iron Spur");
        assert_eq!(store.balance(1, 3).unwrap(), 900);
        let sched = store.load_schedule().unwrap();
        assert_eq!(sched.races[0].wagers, vec![w]);
    }

    #[test]
    fn test_watch_is_free() {
        let (store, rules, id) = setup();
        let w = place_bet(&store, &rules, &request(id, "watch", None, None)).unwrap();
        assert_eq!(w.bet, Bet::Watch);
        assert_eq!(store.balance(1, 3).unwrap(), 1_000);
    }

    #[test]
    fn test_rejections() {
        let (store, rules, id) = setup();
        let cases = vec![
            (request(id, "exacta", Some("Iron Spur"), Some("5")), BetRejection::UnknownKind("exacta".to_string())),
            (request(id, "win", Some("Iron Spur"), Some("lots")), BetRejection::BadAmount("lots".to_string())),
            (request(id, "win", Some("Iron Spur"), Some("0")), BetRejection::BelowMinimum { min: 1 }),
            (request(id, "win", None, Some("5")), BetRejection::MissingHorse),
            (request(id + 1, "win", Some("Iron Spur"), Some("5")), BetRejection::RaceNotFound(id + 1)),
            (
                request(id, "show", Some("Seabiscuit"), Some("5")),
                BetRejection::HorseNotEntered { race_id: id, horse: "Seabiscuit".to_string() },
            ),
            (
                request(id, "place", Some("Iron Spur"), Some("5000")),
                BetRejection::InsufficientFunds { balance: 1_000, amount: 5_000 },
            ),
        ];
        for (req, expected) in cases {
            assert_eq!(place_bet(&store, &rules, &req).unwrap_err(), expected);
        }
        assert_eq!(store.balance(1, 3).unwrap(), 1_000);
        assert!(store.load_schedule().unwrap().races[0].wagers.is_empty());
    }

    #[test]
    fn test_bet_after_pop_rejected() {
        let (store, rules, id) = setup();
        store.pop_next_scheduled_race().unwrap();
        let err = place_bet(&store, &rules, &request(id, "win", Some("Iron Spur"), Some("5"))).unwrap_err();
        assert_eq!(err, BetRejection::RaceNotFound(id));
        assert_eq!(store.balance(1, 3).unwrap(), 1_000);
    }

    #[test]
    fn test_bet_after_post_time_rejected() {
        let (store, rules, id) = setup_starting(Utc::now() - Duration::seconds(1));
        for req in [request(id, "win", Some("Iron Spur"), Some("5")), request(id, "watch", None, None)] {
            assert_eq!(place_bet(&store, &rules, &req).unwrap_err(), BetRejection::PostTimePassed(id));
        }
        assert_eq!(store.balance(1, 3).unwrap(), 1_000);
        assert!(store.load_schedule().unwrap().races[0].wagers.is_empty());
    }

    #[test]
    fn test_upcoming_and_card() {
        let (store, rules, id) = setup();
        let upcoming = upcoming_races(&store, 5).unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, id);
        assert!(upcoming[0].to_string().contains("Harbor Mile"));

        let sched = store.load_schedule().unwrap();
        let card = race_card(&sched.races[0], &rules);
        assert_eq!(card.len(), 3);
        let iron = card.iter().find(|l| l.name == "Iron Spur").unwrap();
        assert!(iron.speed >= Grade::B);
        assert!(iron.to_string().starts_with("Iron Spur ("));
    }

    #[test]
    fn test_horse_report() {
        let (store, rules, _) = setup();
        let mut h = horse("Amber Arrow", 20, 5, 20);
        h.record_race(1, Some("The Harbor Crown".to_string()));
        h.record_race(3, None);
        store.save_horse(&h).unwrap();
        let report = horse_report(&store, "amber arrow", &rules).unwrap().unwrap();
        assert_eq!(report.speed, Grade::S);
        assert!(!report.retired);
        let text = report.to_string();
        assert!(text.contains("The Harbor Crown"));
        assert!(text.contains("2 of 30 races run, 1 won (50%)"), "{}", text);
        assert!(horse_report(&store, "Nobody", &rules).unwrap().is_none());
    }

    #[test]
    fn test_recent_news_lines() {
        let (store, _, _) = setup();
        store.append_news(&["Iron Spur has retired.".to_string(), "Welcome Ember Comet!".to_string()]).unwrap();
        let lines = recent_news(&store, Duration::hours(24)).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Iron Spur has retired."));
    }
}
