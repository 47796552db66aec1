use crate::racing_horse::RacingHorse;
use crate::results::RaceResults;

use super::OutputStage;

/// Orders the current leg by distance, leader first.
pub struct StandingsSorter;

impl OutputStage for StandingsSorter {
    fn name(&self) -> &'static str {
        "standings_sorter"
    }

    fn process(&mut self, results: &mut RaceResults) {
        if let Some(leg) = results.current_mut() {
            let mut flat: Vec<RacingHorse> = leg.standings.drain(..).flatten().collect();
            flat.sort_by(|a, b| b.distance.total_cmp(&a.distance));
            leg.standings = vec![flat];
        }
    }
}

/// Groups a sorted leg into packs of horses running close together.
///
/// A trailing horse joins the current pack when it has covered at least
/// `factor` of the distance of the last horse added. Each new pack lowers
/// `factor` by `growth`, and `growth` doubles, so packs get looser toward the
/// back of the field.
#[derive(Debug, Clone, Copy)]
pub struct StandingsClusterer {
    pub initial_factor: f64,
    pub initial_growth: f64,
}

impl Default for StandingsClusterer {
    fn default() -> Self {
        Self { initial_factor: 0.9, initial_growth: 0.02 }
    }
}

impl StandingsClusterer {
    pub fn cluster(&self, horses: Vec<RacingHorse>) -> Vec<Vec<RacingHorse>> {
        let mut factor = self.initial_factor;
        let mut growth = self.initial_growth;
        let mut packs = Vec::new();
        let mut pack: Vec<RacingHorse> = Vec::new();
        for horse in horses {
            let joins = match pack.last() {
                None => true,
                Some(last) => horse.distance >= last.distance * factor,
            };
            if !joins {
                packs.push(std::mem::take(&mut pack));
                factor = (factor - growth).max(0.0);
                growth *= 2.0;
            }
            pack.push(horse);
        }
        if !pack.is_empty() {
            packs.push(pack);
        }
        packs
    }
}

impl OutputStage for StandingsClusterer {
    fn name(&self) -> &'static str {
        "standings_clusterer"
    }

    fn process(&mut self, results: &mut RaceResults) {
        if let Some(leg) = results.current_mut() {
            let flat: Vec<RacingHorse> = leg.standings.drain(..).flatten().collect();
            leg.standings = self.cluster(flat);
        }
    }
}
