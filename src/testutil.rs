//! Fixtures shared by unit tests.

use crate::horse::{Horse, RacingRecord};
use crate::racing_horse::RacingHorse;

pub fn horse(name: &str, speed: u32, power: u32, stamina: u32) -> Horse {
    Horse {
        name: name.to_string(),
        speed,
        power,
        stamina,
        career_length: 30,
        parent: None,
        record: RacingRecord::default(),
    }
}

/// A neutral-variance entrant already `distance` down the track.
pub fn runner(name: &str, distance: f64) -> RacingHorse {
    RacingHorse {
        horse: horse(name, 15, 3, 10),
        speed_factor: 1.0,
        power_factor: 1.0,
        stamina_factor: 1.0,
        distance,
        current_speed: 0.0,
        remaining_stamina: 10.0,
        odds: 20.0,
        injury: None,
    }
}
