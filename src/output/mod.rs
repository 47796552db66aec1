//! Per-leg output pipeline.
//!
//! After each leg the simulation hands its [`RaceResults`] to an ordered list
//! of stages. A stage may reorder or regroup the current leg's standings and
//! append commentary; it never touches earlier legs.
//!
//! ```text
//! sort ──► cluster ──► basic ──► injuries ──► podium
//! ```
//!
//! A race nobody is watching gets [`OutputPipeline::silent`], an empty list.

pub mod announcers;
pub mod standings;

use crate::results::RaceResults;

pub use announcers::{BasicAnnouncer, InjuryAnnouncer, PodiumAnnouncer};
pub use standings::{StandingsClusterer, StandingsSorter};

pub trait OutputStage {
    fn name(&self) -> &'static str;
    fn process(&mut self, results: &mut RaceResults);
}

pub struct OutputPipeline {
    stages: Vec<Box<dyn OutputStage + Send>>,
}

impl OutputPipeline {
    pub fn new(stages: Vec<Box<dyn OutputStage + Send>>) -> Self {
        Self { stages }
    }

    /// Sorting, clustering and all announcers, in order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(StandingsSorter),
            Box::new(StandingsClusterer::default()),
            Box::new(BasicAnnouncer),
            Box::new(InjuryAnnouncer::default()),
            Box::new(PodiumAnnouncer),
        ])
    }

    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_silent(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn process(&mut self, results: &mut RaceResults) {
        for stage in self.stages.iter_mut() {
            stage.process(results);
        }
    }
}
