use chrono::{DateTime, Utc};

/// A capacity-bounded waitlist bucket conferring priority and a base token
/// allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub number: u8,
    pub name: &'static str,
    pub max_spots: u32,
    pub base_amount: u64,
}

pub const TIERS: [Tier; 3] = [
    Tier {
        number: 1,
        name: "OG Founder",
        max_spots: 10,
        base_amount: 50_000,
    },
    Tier {
        number: 2,
        name: "Early Adopter",
        max_spots: 100,
        base_amount: 25_000,
    },
    Tier {
        number: 3,
        name: "Waitlist",
        max_spots: 1_000,
        base_amount: 10_000,
    },
];

pub fn tier(number: u8) -> Option<&'static Tier> {
    TIERS.iter().find(|t| t.number == number)
}

/// Early-bird multiplier by week since launch. Week 0 is the launch week;
/// anything past the schedule earns no bonus.
const EARLY_BIRD_SCHEDULE: [f64; 3] = [1.5, 1.25, 1.1];

pub fn early_bird_multiplier(launch: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let week = (now - launch).num_weeks().max(0) as usize;
    EARLY_BIRD_SCHEDULE.get(week).copied().unwrap_or(1.0)
}
