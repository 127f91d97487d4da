//! Seeded scenario generator for fuzzing the bus.
//!
//! Listeners only emit to higher sources than their own, so emission
//! chains always terminate.

use fiberbus_config::BusConfig;
use fiberbus_core::ConcurrencyMode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scenario::{EventSpec, ListenerSpec, Scenario, Step};

const MAX_SOURCE: u16 = 5;

const FLAG_SETS: &[&[&str]] = &[
    &[],
    &["drop_if_busy"],
    &["queue_if_busy"],
    &["reentrant"],
    &["nonblocking"],
    &["queue_if_busy", "nonblocking"],
    &["immediate"],
];

pub fn generate(seed: u64, events: usize) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);

    let concurrency_mode = if rng.random_bool(0.5) {
        ConcurrencyMode::ConcurrentListeners
    } else {
        ConcurrencyMode::ConcurrentEvents
    };
    let bus = BusConfig {
        event_queue_depth: rng.random_range(2..=16),
        listener_queue_depth: rng.random_range(1..=8),
        concurrency_mode,
    };

    let listeners: Vec<ListenerSpec> = (0..rng.random_range(1..=4))
        .map(|index| listener(&mut rng, index))
        .collect();

    let mut steps = Vec::with_capacity(events);
    for _ in 0..events {
        let source = rng.random_range(1..MAX_SOURCE);
        let value = rng.random_range(1..=3);
        let step = match rng.random_range(0..10) {
            0..=3 => Step::Send { source, value },
            4..=5 => Step::Interrupt {
                after_ms: rng.random_range(0..20),
                source,
                value,
            },
            6 => Step::Fire { source, value },
            7..=8 => Step::Wait {
                ms: rng.random_range(1..15),
            },
            _ => {
                let name = listeners[rng.random_range(0..listeners.len())].name.clone();
                if rng.random_bool(0.5) {
                    Step::Ignore { listener: name }
                } else {
                    Step::Listen { listener: name }
                }
            }
        };
        steps.push(step);
    }

    Scenario {
        name: format!("generated-{seed}"),
        bus: Some(bus),
        tick_period_ms: None,
        listeners,
        steps,
        settle_ms: 200,
    }
}

fn listener(rng: &mut StdRng, index: usize) -> ListenerSpec {
    let source = rng.random_range(1..MAX_SOURCE);
    let flags = FLAG_SETS[rng.random_range(0..FLAG_SETS.len())];
    let immediate = flags.contains(&"immediate");

    let emit = if rng.random_bool(0.3) {
        vec![EventSpec {
            source: rng.random_range(source + 1..=MAX_SOURCE),
            value: rng.random_range(1..=3),
        }]
    } else {
        Vec::new()
    };

    ListenerSpec {
        name: format!("l{index}"),
        source,
        value: if rng.random_bool(0.5) { 0 } else { rng.random_range(1..=3) },
        flags: flags.iter().map(|flag| flag.to_string()).collect(),
        sleep_ms: if immediate { 0 } else { rng.random_range(0..10) },
        emit,
    }
}
