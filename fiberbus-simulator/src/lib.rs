/*!
# fiberbus-simulator

Deterministic host for the event bus. Runs scripted scenarios on a cooperative
fiber scheduler driven by virtual time, so blocking listeners, interrupt-time
sends and busy policies can be exercised and replayed bit for bit.

## Key Components:
- **Fiber scheduler:** one OS thread per fiber, exactly one running at a time.
- **Virtual clock:** nanosecond time that only moves when every fiber is idle.
- **Scenarios:** YAML scripts of listeners and steps.
- **Trace:** ordered callback entries and exits, hashed with BLAKE3 so two
  runs can be compared by a single hex string.
*/

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use blake3::Hasher;
use fiberbus_config::SimulatorConfig;
use fiberbus_core::stats::StatsSnapshot;
use fiberbus_core::{Bus, Event, IdleComponent, LaunchMode};
use serde::Serialize;
use tracing::{debug, info, warn};

pub mod error;
pub mod fiber;
pub mod random;
pub mod scenario;
pub mod trace;
pub mod virtual_clock;

pub use error::SimulationError;
pub use fiber::{FiberId, FiberScheduler, IDLE_FIBER, MAIN_FIBER};
pub use scenario::{EventSpec, ListenerSpec, Scenario, Step};
pub use trace::{Phase, Trace, TraceEntry};
pub use virtual_clock::VirtualClock;

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub trace: Vec<TraceEntry>,
    pub stats: StatsSnapshot,
    pub final_time_ns: u64,
    /// Hex BLAKE3 of the trace and final counters.
    pub hash: String,
}

impl SimulationReport {
    /// Entries recorded by `listener`, in order.
    pub fn entries_for<'a>(&'a self, listener: &'a str) -> impl Iterator<Item = &'a TraceEntry> {
        self.trace.iter().filter(move |entry| entry.listener == listener)
    }
}

/// Context handed to every scripted listener.
struct Script {
    name: String,
    sleep: Duration,
    emit: Vec<EventSpec>,
    trace: Arc<Trace>,
    bus: Weak<Bus>,
    scheduler: FiberScheduler,
}

impl Script {
    fn record(&self, event: Event, phase: Phase) {
        let fiber = self.scheduler.current_fiber().unwrap_or(MAIN_FIBER);
        self.trace
            .record(self.scheduler.now_ns(), fiber, &self.name, event, phase);
    }
}

fn on_event(event: Event, script: &Script) {
    script.record(event, Phase::Enter);

    if !script.sleep.is_zero() {
        script.scheduler.sleep(script.sleep);
    }
    if let Some(bus) = script.bus.upgrade() {
        for emitted in &script.emit {
            if let Err(err) = bus.send(Event::new(emitted.source, emitted.value)) {
                warn!(listener = %script.name, %err, "Emit failed");
            }
        }
    }

    script.record(event, Phase::Exit);
}

pub struct Simulator {
    config: SimulatorConfig,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Runs `scenario` to completion on a fresh scheduler owned by the
    /// calling thread.
    pub fn run_scenario(&self, scenario: &Scenario) -> Result<SimulationReport, SimulationError> {
        scenario.check()?;

        let tick = scenario.tick_period_ms.unwrap_or(self.config.tick_period_ms);
        let scheduler = FiberScheduler::new(VirtualClock::new(0), Duration::from_millis(tick));
        scheduler.start()?;

        let outcome = Self::drive(scenario, &scheduler);
        scheduler.shutdown();

        if let Ok(report) = &outcome {
            info!(
                scenario = %report.scenario,
                deliveries = report.stats.deliveries,
                final_time_ns = report.final_time_ns,
                hash = %report.hash,
                "Scenario complete"
            );
        }
        outcome
    }

    fn drive(
        scenario: &Scenario,
        scheduler: &FiberScheduler,
    ) -> Result<SimulationReport, SimulationError> {
        let options = scenario.bus.clone().unwrap_or_default().to_options();
        let bus = Arc::new(Bus::new(options, Arc::new(scheduler.clone()))?);
        let idle: Weak<dyn IdleComponent> = Arc::downgrade(&bus) as Weak<dyn IdleComponent>;
        scheduler.add_idle_component(idle);

        let trace = Arc::new(Trace::default());
        let mut scripts = HashMap::new();
        for spec in &scenario.listeners {
            let script = Arc::new(Script {
                name: spec.name.clone(),
                sleep: Duration::from_millis(spec.sleep_ms),
                emit: spec.emit.clone(),
                trace: trace.clone(),
                bus: Arc::downgrade(&bus),
                scheduler: scheduler.clone(),
            });
            bus.listen_with(
                spec.source,
                spec.value,
                on_event,
                script.clone(),
                spec.listener_flags()?,
            )?;
            scripts.insert(spec.name.as_str(), (spec, script));
        }

        for step in &scenario.steps {
            debug!(?step, now_ns = scheduler.now_ns(), "Step");
            match step {
                Step::Send { source, value } => bus.send(Event::new(*source, *value))?,
                Step::Fire { source, value } => {
                    bus.raise(Event::new(*source, *value), LaunchMode::CreateAndFire)?
                }
                Step::Interrupt {
                    after_ms,
                    source,
                    value,
                } => {
                    let target = Arc::downgrade(&bus);
                    let (source, value) = (*source, *value);
                    scheduler.schedule_interrupt(
                        Duration::from_millis(*after_ms),
                        Box::new(move || {
                            if let Some(bus) = target.upgrade() {
                                if let Err(err) = bus.send(Event::new(source, value)) {
                                    warn!(%err, "Interrupt send failed");
                                }
                            }
                        }),
                    );
                }
                Step::Wait { ms } => scheduler.run_for(Duration::from_millis(*ms)),
                Step::Ignore { listener } => {
                    let (spec, script) = scripts
                        .get(listener.as_str())
                        .ok_or_else(|| SimulationError::UnknownListener(listener.clone()))?;
                    if let Err(err) =
                        bus.ignore_with(spec.source, spec.value, on_event, Some(script))
                    {
                        warn!(%listener, %err, "Ignore rejected");
                    }
                }
                Step::Listen { listener } => {
                    let (spec, script) = scripts
                        .get(listener.as_str())
                        .ok_or_else(|| SimulationError::UnknownListener(listener.clone()))?;
                    let registered = bus.listen_with(
                        spec.source,
                        spec.value,
                        on_event,
                        script.clone(),
                        spec.listener_flags()?,
                    );
                    if let Err(err) = registered {
                        warn!(%listener, %err, "Listen rejected");
                    }
                }
            }
        }
        scheduler.run_for(Duration::from_millis(scenario.settle_ms));

        let stats = bus.stats();
        let final_time_ns = scheduler.now_ns();
        let mut hasher = Hasher::new();
        trace.digest(&mut hasher);
        hasher.update(format!("{stats:?} {final_time_ns}").as_bytes());

        Ok(SimulationReport {
            scenario: scenario.name.clone(),
            trace: trace.entries(),
            stats,
            final_time_ns,
            hash: hex::encode(hasher.finalize().as_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn empty_scenario_settles() {
        let simulator = Simulator::new(SimulatorConfig::default());
        let scenario = Scenario::from_yaml_str("name: empty\nsettle_ms: 10\n").unwrap();

        let report = simulator.run_scenario(&scenario).unwrap();
        assert!(report.trace.is_empty());
        assert_eq!(report.final_time_ns, 12_000_000);
        assert_eq!(report.hash.len(), 64);
        assert!(logs_contain("Scenario complete"));
    }

    #[test]
    fn tick_period_override_applies() {
        let simulator = Simulator::new(SimulatorConfig::default());
        let scenario =
            Scenario::from_yaml_str("name: fine\ntick_period_ms: 1\nsettle_ms: 10\n").unwrap();

        let report = simulator.run_scenario(&scenario).unwrap();
        assert_eq!(report.final_time_ns, 10_000_000);
    }

    #[test]
    fn standard_listener_runs_from_idle_drain() {
        let simulator = Simulator::new(SimulatorConfig::default());
        let scenario = Scenario::from_yaml_str(
            "name: one\nlisteners:\n  - { name: a, source: 3, value: 0 }\nsteps:\n  - { op: send, source: 3, value: 9 }\n",
        )
        .unwrap();

        let report = simulator.run_scenario(&scenario).unwrap();
        let phases: Vec<_> = report.entries_for("a").map(|entry| entry.phase).collect();
        assert_eq!(phases, vec![Phase::Enter, Phase::Exit]);
        assert_eq!(report.stats.deliveries, 1);
        assert!(report.trace.iter().all(|entry| entry.value == 9));
    }
}
