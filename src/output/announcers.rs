use std::collections::HashSet;

use rand::seq::SliceRandom;

use crate::racing_horse::RacingHorse;
use crate::results::RaceResults;

use super::OutputStage;

const LEAD_ONE: [&str; 4] = ["leads the field", "is out in front", "sets the pace", "has the lead"];
const LEAD_MANY: [&str; 3] = ["lead the field together", "are battling for the lead", "share the front"];
const CHASE: [&str; 4] = ["follows", "gives chase", "hangs on", "is close behind"];
const CHASE_MANY: [&str; 4] = ["follow", "give chase", "hang on", "are in the pack behind"];

fn join_names(pack: &[RacingHorse]) -> String {
    let names: Vec<&str> = pack.iter().map(|h| h.name()).collect();
    match names.len() {
        0 => String::new(),
        1 => names[0].to_string(),
        n => format!("{} and {}", names[..n - 1].join(", "), names[n - 1]),
    }
}

fn pick(phrases: &[&'static str]) -> &'static str {
    phrases.choose(&mut rand::thread_rng()).copied().unwrap_or("")
}

/// One line per leg describing every pack, leader first.
pub struct BasicAnnouncer;

impl BasicAnnouncer {
    pub fn describe(leg_number: usize, length: u32, packs: &[Vec<RacingHorse>]) -> String {
        let mut parts = Vec::with_capacity(packs.len());
        for (i, pack) in packs.iter().enumerate() {
            let solo = pack.len() == 1;
            let phrase = match (i, solo) {
                (0, true) => pick(&LEAD_ONE),
                (0, false) => pick(&LEAD_MANY),
                (_, true) => pick(&CHASE),
                (_, false) => pick(&CHASE_MANY),
            };
            parts.push(format!("{} {}", join_names(pack), phrase));
        }
        format!("Furlong {}/{}: {}.", leg_number, length, parts.join("; "))
    }
}

impl OutputStage for BasicAnnouncer {
    fn name(&self) -> &'static str {
        "basic_announcer"
    }

    fn process(&mut self, results: &mut RaceResults) {
        let line = match results.current() {
            Some(leg) if !leg.standings.is_empty() => {
                Self::describe(results.leg_number(), results.length, &leg.standings)
            }
            _ => return,
        };
        results.announce(line);
    }
}

/// Reports each horse injured during the race, once.
#[derive(Default)]
pub struct InjuryAnnouncer {
    announced: HashSet<String>,
}

impl OutputStage for InjuryAnnouncer {
    fn name(&self) -> &'static str {
        "injury_announcer"
    }

    fn process(&mut self, results: &mut RaceResults) {
        let fresh: Vec<String> = match results.current() {
            Some(leg) => leg
                .flattened()
                .filter(|h| h.is_injured() && !self.announced.contains(h.name()))
                .map(|h| h.name().to_string())
                .collect(),
            None => return,
        };
        for name in fresh {
            results.announce(format!("Oh no! {} has pulled up injured!", name));
            self.announced.insert(name);
        }
    }
}

/// Announces the top three on the final leg.
pub struct PodiumAnnouncer;

const PLACES: [&str; 3] = ["1st", "2nd", "3rd"];

impl OutputStage for PodiumAnnouncer {
    fn name(&self) -> &'static str {
        "podium_announcer"
    }

    fn process(&mut self, results: &mut RaceResults) {
        if !results.is_complete() {
            return;
        }
        let lines: Vec<String> = match results.final_standings() {
            Ok(order) => order
                .iter()
                .zip(PLACES.iter())
                .map(|(h, place)| format!("{}: {} ({})", place, h.name(), h.odds_str()))
                .collect(),
            Err(_) => return,
        };
        if !lines.is_empty() {
            results.announce("And they cross the finish line!".to_string());
        }
        for line in lines {
            results.announce(line);
        }
    }
}
