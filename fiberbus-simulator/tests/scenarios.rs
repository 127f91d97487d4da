use fiberbus_config::SimulatorConfig;
use fiberbus_simulator::{
    random, Phase, Scenario, SimulationError, SimulationReport, Simulator, TraceEntry, IDLE_FIBER,
};

const MS: u64 = 1_000_000;

fn run(yaml: &str) -> SimulationReport {
    let scenario = Scenario::from_yaml_str(yaml).expect("scenario should parse");
    Simulator::new(SimulatorConfig::default())
        .run_scenario(&scenario)
        .expect("scenario should run")
}

fn phases(entries: &[&TraceEntry]) -> Vec<(Phase, u16)> {
    entries.iter().map(|entry| (entry.phase, entry.value)).collect()
}

#[test]
fn busy_listener_drops_overlapping_events() {
    let report = run(r#"
name: busy-drop
listeners:
  - { name: slow, source: 7, value: 0, flags: [drop_if_busy], sleep_ms: 20 }
steps:
  - { op: send, source: 7, value: 1 }
  - { op: wait, ms: 1 }
  - { op: send, source: 7, value: 2 }
  - { op: wait, ms: 1 }
  - { op: send, source: 7, value: 3 }
"#);

    let slow: Vec<_> = report.entries_for("slow").collect();
    assert_eq!(phases(&slow), vec![(Phase::Enter, 1), (Phase::Exit, 1)]);
    assert_eq!(report.stats.deliveries, 1);
    assert_eq!(report.stats.busy_drops, 2);
}

#[test]
fn busy_listener_queues_and_keeps_order() {
    let report = run(r#"
name: busy-queue
listeners:
  - { name: q, source: 7, value: 0, sleep_ms: 10 }
steps:
  - { op: send, source: 7, value: 1 }
  - { op: send, source: 7, value: 2 }
  - { op: send, source: 7, value: 3 }
"#);

    let q: Vec<_> = report.entries_for("q").collect();
    assert_eq!(
        phases(&q),
        vec![
            (Phase::Enter, 1),
            (Phase::Exit, 1),
            (Phase::Enter, 2),
            (Phase::Exit, 2),
            (Phase::Enter, 3),
            (Phase::Exit, 3),
        ]
    );
    assert!(q.windows(2).all(|pair| pair[0].at_ns <= pair[1].at_ns));
    assert_eq!(report.stats.deliveries, 3);
    assert_eq!(report.stats.busy_drops, 0);
}

#[test]
fn reentrant_listener_overlaps() {
    let report = run(r#"
name: reentrant
listeners:
  - { name: r, source: 6, value: 0, flags: [reentrant], sleep_ms: 10 }
steps:
  - { op: send, source: 6, value: 1 }
  - { op: send, source: 6, value: 2 }
"#);

    let r: Vec<_> = report.entries_for("r").collect();
    assert_eq!(
        phases(&r),
        vec![
            (Phase::Enter, 1),
            (Phase::Enter, 2),
            (Phase::Exit, 1),
            (Phase::Exit, 2),
        ]
    );
}

#[test]
fn ignored_listener_finishes_its_call_before_collection() {
    let report = run(r#"
name: ignore-mid-call
listeners:
  - { name: sleepy, source: 5, value: 0, sleep_ms: 20 }
steps:
  - { op: send, source: 5, value: 1 }
  - { op: wait, ms: 5 }
  - { op: ignore, listener: sleepy }
  - { op: send, source: 5, value: 2 }
"#);

    let sleepy: Vec<_> = report.entries_for("sleepy").collect();
    assert_eq!(phases(&sleepy), vec![(Phase::Enter, 1), (Phase::Exit, 1)]);
    assert_eq!(sleepy[1].at_ns, 24 * MS);
    assert_eq!(report.stats.deliveries, 1);
    assert_eq!(report.stats.listeners_collected, 1);
}

#[test]
fn listening_again_revives_an_ignored_listener() {
    let report = run(r#"
name: revive
listeners:
  - { name: a, source: 2, value: 0 }
steps:
  - { op: ignore, listener: a }
  - { op: listen, listener: a }
  - { op: send, source: 2, value: 4 }
"#);

    let a: Vec<_> = report.entries_for("a").collect();
    assert_eq!(phases(&a), vec![(Phase::Enter, 4), (Phase::Exit, 4)]);
    assert_eq!(report.stats.listeners_collected, 0);
}

#[test]
fn interrupt_send_reaches_urgent_listener_on_time() {
    let report = run(r#"
name: interrupt
listeners:
  - { name: isr, source: 9, value: 0, flags: [immediate] }
  - { name: late, source: 9, value: 0 }
steps:
  - { op: interrupt, after_ms: 5, source: 9, value: 1 }
  - { op: wait, ms: 20 }
"#);

    let isr: Vec<_> = report.entries_for("isr").collect();
    assert_eq!(phases(&isr), vec![(Phase::Enter, 1), (Phase::Exit, 1)]);
    assert_eq!(isr[0].at_ns, 5 * MS);

    let late: Vec<_> = report.entries_for("late").collect();
    assert_eq!(late.len(), 2);
    assert!(late[0].at_ns >= 5 * MS);

    let first = report.trace.first().map(|entry| entry.listener.as_str());
    assert_eq!(first, Some("isr"));
}

#[test]
fn fired_event_skips_the_queue() {
    let report = run(r#"
name: fire
bus: { event_queue_depth: 1 }
listeners:
  - { name: a, source: 3, value: 0 }
steps:
  - { op: fire, source: 3, value: 1 }
  - { op: fire, source: 3, value: 2 }
"#);

    assert_eq!(report.stats.deliveries, 2);
    assert_eq!(report.stats.events_queued, 0);
    assert_eq!(report.stats.queue_overflows, 0);
}

#[test]
fn concurrent_events_serialises_a_blocking_listener() {
    let report = run(r#"
name: serial
bus: { concurrency_mode: concurrent_events }
listeners:
  - { name: s, source: 4, value: 0, sleep_ms: 10 }
steps:
  - { op: send, source: 4, value: 1 }
  - { op: send, source: 4, value: 2 }
"#);

    let s: Vec<_> = report.entries_for("s").collect();
    assert_eq!(
        phases(&s),
        vec![
            (Phase::Enter, 1),
            (Phase::Exit, 1),
            (Phase::Enter, 2),
            (Phase::Exit, 2),
        ]
    );
    assert_eq!(s[2].at_ns, s[1].at_ns);
    assert_eq!(report.stats.busy_drops, 0);
    assert_eq!(report.stats.deliveries, 2);
}

#[test]
fn emitted_events_reach_downstream_listeners() {
    let report = run(r#"
name: chain
listeners:
  - { name: first, source: 1, value: 0, emit: [{ source: 2, value: 7 }] }
  - { name: second, source: 2, value: 7 }
steps:
  - { op: send, source: 1, value: 1 }
"#);

    let second: Vec<_> = report.entries_for("second").collect();
    assert_eq!(phases(&second), vec![(Phase::Enter, 7), (Phase::Exit, 7)]);
    assert_eq!(report.stats.deliveries, 2);
}

#[test]
fn full_queue_drops_overflow() {
    let report = run(r#"
name: overflow
bus: { event_queue_depth: 2 }
listeners:
  - { name: a, source: 3, value: 0 }
steps:
  - { op: send, source: 3, value: 1 }
  - { op: send, source: 3, value: 2 }
  - { op: send, source: 3, value: 3 }
"#);

    assert_eq!(report.stats.queue_overflows, 1);
    assert_eq!(report.stats.deliveries, 2);
}

#[test]
fn forked_standard_listener_queue_is_bounded() {
    let report = run(r#"
name: bounded
bus: { listener_queue_depth: 2 }
listeners:
  - { name: q, source: 7, value: 0, sleep_ms: 10 }
steps:
  - { op: send, source: 7, value: 1 }
  - { op: wait, ms: 1 }
  - { op: send, source: 7, value: 2 }
  - { op: send, source: 7, value: 3 }
  - { op: send, source: 7, value: 4 }
"#);

    let q: Vec<_> = report.entries_for("q").collect();
    assert!(q.iter().all(|entry| entry.fiber != IDLE_FIBER));
    assert_eq!(
        phases(&q),
        vec![
            (Phase::Enter, 1),
            (Phase::Exit, 1),
            (Phase::Enter, 2),
            (Phase::Exit, 2),
            (Phase::Enter, 3),
            (Phase::Exit, 3),
        ]
    );
    assert_eq!(report.stats.listener_overflows, 1);
    assert_eq!(report.stats.deliveries, 3);
}

#[test]
fn nonblocking_listener_runs_inline_in_the_drain() {
    let report = run(r#"
name: inline-vs-forked
listeners:
  - { name: forked, source: 5, value: 0, sleep_ms: 10 }
  - { name: inline, source: 5, value: 0, flags: [queue_if_busy, nonblocking] }
steps:
  - { op: send, source: 5, value: 1 }
  - { op: send, source: 5, value: 2 }
"#);

    let inline: Vec<_> = report.entries_for("inline").collect();
    assert!(inline.iter().all(|entry| entry.fiber == IDLE_FIBER));
    let forked: Vec<_> = report.entries_for("forked").collect();
    assert!(forked.iter().all(|entry| entry.fiber != IDLE_FIBER));

    // The drain finishes the inline listener for both events while the
    // forked one is still asleep on its first.
    let order: Vec<_> = report
        .trace
        .iter()
        .map(|entry| (entry.listener.as_str(), entry.phase, entry.value))
        .collect();
    assert_eq!(
        order,
        vec![
            ("forked", Phase::Enter, 1),
            ("inline", Phase::Enter, 1),
            ("inline", Phase::Exit, 1),
            ("inline", Phase::Enter, 2),
            ("inline", Phase::Exit, 2),
            ("forked", Phase::Exit, 1),
            ("forked", Phase::Enter, 2),
            ("forked", Phase::Exit, 2),
        ]
    );
    assert!(inline.iter().all(|entry| entry.at_ns == 0));
}

#[test]
fn events_carry_the_time_they_were_raised() {
    let report = run(r#"
name: stamps
listeners:
  - { name: isr, source: 9, value: 0, flags: [immediate] }
  - { name: late, source: 9, value: 0, sleep_ms: 10, emit: [{ source: 8, value: 1 }] }
  - { name: downstream, source: 8, value: 0 }
steps:
  - { op: wait, ms: 1 }
  - { op: interrupt, after_ms: 5, source: 9, value: 1 }
  - { op: wait, ms: 30 }
"#);

    let isr: Vec<_> = report.entries_for("isr").collect();
    assert_eq!(isr[0].raised_ms, 11);
    let late: Vec<_> = report.entries_for("late").collect();
    assert!(late.iter().all(|entry| entry.raised_ms == 11));

    let downstream: Vec<_> = report.entries_for("downstream").collect();
    assert_eq!(downstream.len(), 2);
    assert!(downstream[0].raised_ms > 11);
    assert_eq!(downstream[0].raised_ms * MS, late[1].at_ns);
}

#[test]
fn state_flags_are_refused_when_loading() {
    let scenario = Scenario::from_yaml_str(
        "name: p
listeners:
  - { name: p, source: 1, value: 0, flags: [busy] }
",
    );
    assert!(matches!(
        scenario,
        Err(SimulationError::InvalidFlag(flag)) if flag == "busy"
    ));
}

#[test]
fn runs_are_reproducible() {
    let simulator = Simulator::new(SimulatorConfig::default());
    for seed in [1, 7, 42] {
        let scenario = random::generate(seed, 40);
        let first = simulator.run_scenario(&scenario).unwrap();
        let second = simulator.run_scenario(&scenario).unwrap();
        assert_eq!(first.hash, second.hash, "seed {seed} diverged");
        assert_eq!(first.trace, second.trace);
    }
}

#[test]
fn different_scenarios_hash_differently() {
    let a = run("name: a\nlisteners:\n  - { name: x, source: 1, value: 0 }\nsteps:\n  - { op: send, source: 1, value: 1 }\n");
    let b = run("name: b\nlisteners:\n  - { name: x, source: 1, value: 0 }\nsteps:\n  - { op: send, source: 1, value: 2 }\n");
    assert_ne!(a.hash, b.hash);
}

#[test]
fn rejected_registry_steps_do_not_abort_the_run() {
    let report = run(r#"
name: double-ignore
listeners:
  - { name: a, source: 2, value: 0 }
steps:
  - { op: listen, listener: a }
  - { op: ignore, listener: a }
  - { op: ignore, listener: a }
  - { op: send, source: 2, value: 1 }
"#);

    assert_eq!(report.entries_for("a").count(), 0);
    assert_eq!(report.stats.listeners_collected, 1);
}

#[test]
fn bundled_scenarios_run() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../scenarios");
    for name in ["busy_drop.yaml", "interrupt_chain.yaml", "serialized_events.yaml"] {
        let scenario = Scenario::load(dir.join(name)).expect("bundled scenario loads");
        let report = Simulator::new(SimulatorConfig::default())
            .run_scenario(&scenario)
            .expect("bundled scenario runs");
        assert!(!report.trace.is_empty(), "{name} produced no trace");
    }
}
