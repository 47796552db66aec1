//! Persistence contracts and the SQLite store behind them.
//!
//! Every record is kept as a `serde_json` document next to the few columns
//! the queries need (case-folded horse name, race id, schedule position).

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::horse::Horse;
use crate::ledger::{FundsLedger, InsufficientFunds, UserLocks};
use crate::race::{Race, ScheduledRace};
use crate::rules::Rules;
use crate::schedule::RacingSchedule;
use crate::wager::Wager;

pub trait HorseStore {
    fn get_horse(&self, name: &str) -> Result<Option<Horse>>;
    fn save_horse(&self, horse: &Horse) -> Result<()>;
    fn save_horses(&self, horses: &[Horse]) -> Result<()>;
    fn list_active(&self) -> Result<Vec<Horse>>;
    /// Saves the horse and marks it active.
    fn add_active(&self, horse: &Horse) -> Result<()>;
    fn remove_active(&self, name: &str) -> Result<()>;
    fn remove_active_batch(&self, names: &[String]) -> Result<()>;
}

pub trait RaceStore {
    fn next_race_id(&self) -> Result<u64>;
    fn save_race(&self, race: &Race) -> Result<()>;
    fn get_race(&self, id: u64) -> Result<Option<Race>>;
    /// Number of stored races carrying `name`, case-insensitively.
    fn race_name_runs(&self, name: &str) -> Result<u32>;
    fn load_schedule(&self) -> Result<RacingSchedule>;
    fn push_scheduled_race(&self, race: &ScheduledRace) -> Result<()>;
    /// Removes and returns the head of the schedule.
    fn pop_next_scheduled_race(&self) -> Result<Option<ScheduledRace>>;
    /// Fails if the race at `index` is no longer `race`.
    fn update_scheduled_race(&self, index: usize, race: &ScheduledRace) -> Result<()>;
    /// Appends a wager to a race still in the schedule. `false` once the race
    /// has been popped.
    fn add_wager(&self, race_id: u64, wager: &Wager) -> Result<bool>;
    fn save_championship_counter(&self, counter: u32) -> Result<()>;
}

pub trait NewsStore {
    fn append_news(&self, items: &[String]) -> Result<()>;
    /// Batches appended within `window` of now, newest first.
    fn recent_news(&self, window: Duration) -> Result<Vec<(DateTime<Utc>, Vec<String>)>>;
}

/// Everything the control loop and betting surface need from storage.
pub trait Store: HorseStore + RaceStore + NewsStore + FundsLedger + Send + Sync {}

impl<T: HorseStore + RaceStore + NewsStore + FundsLedger + Send + Sync> Store for T {}

const RACE_SEQ: &str = "race_seq";
const CHAMPIONSHIP_COUNTER: &str = "championship_counter";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    locks: UserLocks,
    starting_funds: i64,
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P, rules: &Rules) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, rules)
    }

    pub fn in_memory(rules: &Rules) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, rules)
    }

    fn with_connection(conn: Connection, rules: &Rules) -> Result<Self> {
        let store = Self { conn: Mutex::new(conn), locks: UserLocks::new(), starting_funds: rules.starting_funds };
        store.init()?;
        Ok(store)
    }

    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS horses (
                name_key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS races (
                id INTEGER PRIMARY KEY,
                name_key TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS races_name ON races (name_key);
            CREATE TABLE IF NOT EXISTS schedule (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                race_id INTEGER NOT NULL UNIQUE,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                items TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS funds (
                server_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                balance INTEGER NOT NULL,
                PRIMARY KEY (server_id, user_id)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    fn meta_get(conn: &Connection, key: &str) -> Result<Option<i64>> {
        Ok(conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?)
    }

    fn meta_set(conn: &Connection, key: &str, value: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn read_balance(conn: &Connection, server_id: u64, user_id: u64) -> Result<Option<i64>> {
        Ok(conn
            .query_row(
                "SELECT balance FROM funds WHERE server_id = ?1 AND user_id = ?2",
                params![server_id as i64, user_id as i64],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl HorseStore for SqliteStore {
    fn get_horse(&self, name: &str) -> Result<Option<Horse>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM horses WHERE name_key = ?1", params![name_key(name)], |row| row.get(0))
            .optional()?;
        match data {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    fn save_horse(&self, horse: &Horse) -> Result<()> {
        self.save_horses(std::slice::from_ref(horse))
    }

    fn save_horses(&self, horses: &[Horse]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for horse in horses {
            tx.execute(
                "INSERT INTO horses (name_key, data) VALUES (?1, ?2)
                 ON CONFLICT(name_key) DO UPDATE SET data = excluded.data",
                params![name_key(&horse.name), serde_json::to_string(horse)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_active(&self) -> Result<Vec<Horse>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM horses WHERE active = 1 ORDER BY name_key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn add_active(&self, horse: &Horse) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO horses (name_key, data, active) VALUES (?1, ?2, 1)
             ON CONFLICT(name_key) DO UPDATE SET data = excluded.data, active = 1",
            params![name_key(&horse.name), serde_json::to_string(horse)?],
        )?;
        Ok(())
    }

    fn remove_active(&self, name: &str) -> Result<()> {
        self.remove_active_batch(&[name.to_string()])
    }

    fn remove_active_batch(&self, names: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for name in names {
            tx.execute("UPDATE horses SET active = 0 WHERE name_key = ?1", params![name_key(name)])?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl RaceStore for SqliteStore {
    fn next_race_id(&self) -> Result<u64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let next = Self::meta_get(&tx, RACE_SEQ)?.unwrap_or(0) + 1;
        Self::meta_set(&tx, RACE_SEQ, next)?;
        tx.commit()?;
        Ok(next as u64)
    }

    fn save_race(&self, race: &Race) -> Result<()> {
        if race.id == 0 {
            bail!("race {:?} has no id", race.name);
        }
        self.conn()?.execute(
            "INSERT INTO races (id, name_key, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name_key = excluded.name_key, data = excluded.data",
            params![race.id as i64, name_key(&race.name), serde_json::to_string(race)?],
        )?;
        Ok(())
    }

    fn get_race(&self, id: u64) -> Result<Option<Race>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM races WHERE id = ?1", params![id as i64], |row| row.get(0))
            .optional()?;
        match data {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    fn race_name_runs(&self, name: &str) -> Result<u32> {
        let conn = self.conn()?;
        let n: i64 =
            conn.query_row("SELECT COUNT(*) FROM races WHERE name_key = ?1", params![name_key(name)], |row| row.get(0))?;
        Ok(n as u32)
    }

    fn load_schedule(&self) -> Result<RacingSchedule> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM schedule ORDER BY position")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut races = VecDeque::new();
        for row in rows {
            races.push_back(serde_json::from_str(&row?)?);
        }
        let counter = Self::meta_get(&conn, CHAMPIONSHIP_COUNTER)?.unwrap_or(0);
        Ok(RacingSchedule { races, championship_counter: counter as u32 })
    }

    fn push_scheduled_race(&self, race: &ScheduledRace) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO schedule (race_id, data) VALUES (?1, ?2)",
            params![race.id() as i64, serde_json::to_string(race)?],
        )?;
        Ok(())
    }

    fn pop_next_scheduled_race(&self) -> Result<Option<ScheduledRace>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let head: Option<(i64, String)> = tx
            .query_row("SELECT position, data FROM schedule ORDER BY position LIMIT 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        let popped = match head {
            Some((position, data)) => {
                tx.execute("DELETE FROM schedule WHERE position = ?1", params![position])?;
                Some(serde_json::from_str(&data)?)
            }
            None => None,
        };
        tx.commit()?;
        Ok(popped)
    }

    fn update_scheduled_race(&self, index: usize, race: &ScheduledRace) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let at: Option<(i64, i64)> = tx
            .query_row(
                "SELECT position, race_id FROM schedule ORDER BY position LIMIT 1 OFFSET ?1",
                params![index as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match at {
            Some((position, id)) if id as u64 == race.id() => {
                tx.execute(
                    "UPDATE schedule SET data = ?1 WHERE position = ?2",
                    params![serde_json::to_string(race)?, position],
                )?;
            }
            Some((_, id)) => bail!("schedule slot {} holds race {}, not {}", index, id, race.id()),
            None => bail!("schedule slot {} is empty", index),
        }
        tx.commit()?;
        Ok(())
    }

    fn add_wager(&self, race_id: u64, wager: &Wager) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let row: Option<(i64, String)> = tx
            .query_row("SELECT position, data FROM schedule WHERE race_id = ?1", params![race_id as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        let (position, data) = match row {
            Some(r) => r,
            None => return Ok(false),
        };
        let mut race: ScheduledRace = serde_json::from_str(&data)?;
        race.wagers.push(wager.clone());
        tx.execute(
            "UPDATE schedule SET data = ?1 WHERE position = ?2",
            params![serde_json::to_string(&race)?, position],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn save_championship_counter(&self, counter: u32) -> Result<()> {
        let conn = self.conn()?;
        Self::meta_set(&conn, CHAMPIONSHIP_COUNTER, counter as i64)
    }
}

impl NewsStore for SqliteStore {
    fn append_news(&self, items: &[String]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.conn()?.execute(
            "INSERT INTO news (ts, items) VALUES (?1, ?2)",
            params![Utc::now().timestamp_millis(), serde_json::to_string(items)?],
        )?;
        Ok(())
    }

    fn recent_news(&self, window: Duration) -> Result<Vec<(DateTime<Utc>, Vec<String>)>> {
        let since = (Utc::now() - window).timestamp_millis();
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT ts, items FROM news WHERE ts >= ?1 ORDER BY ts DESC, id DESC")?;
        let rows = stmt.query_map(params![since], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            let (ts, items) = row?;
            let at = Utc
                .timestamp_millis_opt(ts)
                .single()
                .ok_or_else(|| anyhow!("bad news timestamp {}", ts))?;
            out.push((at, serde_json::from_str(&items)?));
        }
        Ok(out)
    }
}

impl FundsLedger for SqliteStore {
    fn balance(&self, server_id: u64, user_id: u64) -> Result<i64> {
        let conn = self.conn()?;
        Ok(Self::read_balance(&conn, server_id, user_id)?.unwrap_or(self.starting_funds))
    }

    fn adjust(&self, server_id: u64, user_id: u64, delta: i64) -> Result<i64> {
        let lock = self.locks.lock_for(server_id, user_id);
        let _guard = lock.lock().map_err(|_| anyhow!("user lock poisoned"))?;
        let conn = self.conn()?;
        let balance = Self::read_balance(&conn, server_id, user_id)?.unwrap_or(self.starting_funds);
        let next = balance + delta;
        if next < 0 {
            return Err(InsufficientFunds { balance, delta }.into());
        }
        conn.execute(
            "INSERT INTO funds (server_id, user_id, balance) VALUES (?1, ?2, ?3)
             ON CONFLICT(server_id, user_id) DO UPDATE SET balance = excluded.balance",
            params![server_id as i64, user_id as i64, next],
        )?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::horse;
    use crate::wager::Bet;

    fn store() -> SqliteStore {
        SqliteStore::in_memory(&Rules::default()).unwrap()
    }

    fn scheduled(store: &SqliteStore, name: &str) -> ScheduledRace {
        let rules = Rules::default();
        let mut race = Race::new(name.to_string(), 6, false, 1);
        race.id = store.next_race_id().unwrap();
        let horses = vec![horse("Amber Arrow", 15, 3, 12), horse("Iron Spur", 18, 4, 16)];
        ScheduledRace::new(race, Utc::now(), horses, &rules, &mut rand::thread_rng())
    }

    #[test]
    fn test_horse_lookup_case_insensitive() {
        let s = store();
        let h = horse("Amber Arrow", 15, 3, 12);
        s.save_horse(&h).unwrap();
        assert_eq!(s.get_horse("amber arrow").unwrap(), Some(h));
        assert!(s.get_horse("Iron Spur").unwrap().is_none());
    }

    #[test]
    fn test_active_set_tracks_add_and_remove() {
        let s = store();
        s.add_active(&horse("Amber Arrow", 15, 3, 12)).unwrap();
        s.add_active(&horse("Iron Spur", 18, 4, 16)).unwrap();
        assert_eq!(s.list_active().unwrap().len(), 2);
        s.remove_active("AMBER ARROW").unwrap();
        let active = s.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Iron Spur");
        // retired horses stay on record
        assert!(s.get_horse("Amber Arrow").unwrap().is_some());
    }

    #[test]
    fn test_save_keeps_active_flag() {
        let s = store();
        let mut h = horse("Amber Arrow", 15, 3, 12);
        s.add_active(&h).unwrap();
        h.record_race(1, None);
        s.save_horse(&h).unwrap();
        let active = s.list_active().unwrap();
        assert_eq!(active[0].record.races_run, 1);
    }

    #[test]
    fn test_race_ids_increase() {
        let s = store();
        let a = s.next_race_id().unwrap();
        let b = s.next_race_id().unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_race_round_trip_and_runs() {
        let s = store();
        let mut race = Race::new("Harbor Mile".to_string(), 8, true, 1);
        race.id = s.next_race_id().unwrap();
        race.horses = vec!["Amber Arrow".to_string()];
        s.save_race(&race).unwrap();
        assert_eq!(s.get_race(race.id).unwrap(), Some(race.clone()));
        assert_eq!(s.race_name_runs("harbor mile").unwrap(), 1);
        assert_eq!(s.race_name_runs("Summit Dash").unwrap(), 0);
    }

    #[test]
    fn test_save_race_requires_id() {
        let s = store();
        assert!(s.save_race(&Race::new("Harbor Mile".to_string(), 8, false, 1)).is_err());
    }

    #[test]
    fn test_schedule_is_fifo() {
        let s = store();
        let first = scheduled(&s, "Harbor Mile");
        let second = scheduled(&s, "Summit Dash");
        s.push_scheduled_race(&first).unwrap();
        s.push_scheduled_race(&second).unwrap();
        s.save_championship_counter(4).unwrap();

        let sched = s.load_schedule().unwrap();
        assert_eq!(sched.races.len(), 2);
        assert_eq!(sched.championship_counter, 4);
        assert_eq!(sched.races[0], first);

        assert_eq!(s.pop_next_scheduled_race().unwrap().unwrap().id(), first.id());
        let sched = s.load_schedule().unwrap();
        assert_eq!(sched.races.len(), 1);
        assert_eq!(sched.races[0].id(), second.id());
    }

    #[test]
    fn test_pop_empty_schedule() {
        assert!(store().pop_next_scheduled_race().unwrap().is_none());
    }

    #[test]
    fn test_update_rejects_mismatched_slot() {
        let s = store();
        let first = scheduled(&s, "Harbor Mile");
        let mut second = scheduled(&s, "Summit Dash");
        s.push_scheduled_race(&first).unwrap();
        s.push_scheduled_race(&second).unwrap();
        second.wagers.push(Wager::new(1, 2, Bet::Watch));
        assert!(s.update_scheduled_race(0, &second).is_err());
        s.update_scheduled_race(1, &second).unwrap();
        assert_eq!(s.load_schedule().unwrap().races[1].wagers.len(), 1);
        assert!(s.update_scheduled_race(5, &second).is_err());
    }

    #[test]
    fn test_add_wager_after_pop_refused() {
        let s = store();
        let race = scheduled(&s, "Harbor Mile");
        s.push_scheduled_race(&race).unwrap();
        assert!(s.add_wager(race.id(), &Wager::new(1, 2, Bet::Watch)).unwrap());
        let popped = s.pop_next_scheduled_race().unwrap().unwrap();
        assert_eq!(popped.wagers.len(), 1);
        assert!(!s.add_wager(race.id(), &Wager::new(1, 2, Bet::Watch)).unwrap());
    }

    #[test]
    fn test_news_window() {
        let s = store();
        s.append_news(&["Amber Arrow has retired.".to_string()]).unwrap();
        s.append_news(&[]).unwrap();
        let news = s.recent_news(Duration::hours(1)).unwrap();
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].1, vec!["Amber Arrow has retired."]);
    }

    #[test]
    fn test_funds_start_and_never_go_negative() {
        let s = store();
        assert_eq!(s.balance(1, 2).unwrap(), 1_000);
        assert_eq!(s.adjust(1, 2, -400).unwrap(), 600);
        let err = s.adjust(1, 2, -601).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InsufficientFunds>(),
            Some(&InsufficientFunds { balance: 600, delta: -601 })
        );
        assert_eq!(s.balance(1, 2).unwrap(), 600);
        // other servers keep their own balance
        assert_eq!(s.balance(9, 2).unwrap(), 1_000);
    }

    #[test]
    fn test_reopen_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paddock.sqlite");
        let rules = Rules::default();
        {
            let s = SqliteStore::open(&path, &rules).unwrap();
            s.add_active(&horse("Amber Arrow", 15, 3, 12)).unwrap();
            s.adjust(1, 2, 50).unwrap();
        }
        let s = SqliteStore::open(&path, &rules).unwrap();
        assert_eq!(s.list_active().unwrap().len(), 1);
        assert_eq!(s.balance(1, 2).unwrap(), 1_050);
    }
}
