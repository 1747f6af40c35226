use super::*;
use crate::orchestrator::policy::UnitCountPolicy;
use crate::unit::spawner::UnitEndpoint;
use std::cell::RefCell;
use std::rc::Rc;

type CommandLog = Rc<RefCell<Vec<(UnitId, UnitCommand)>>>;

struct FakeEndpoint {
    id: UnitId,
    log: CommandLog,
}

impl UnitEndpoint for FakeEndpoint {
    fn send(&mut self, command: UnitCommand) -> BandResult<()> {
        self.log.borrow_mut().push((self.id, command));
        Ok(())
    }
}

/// Records commands and keeps the event senders so tests can play the units' side.
#[derive(Default)]
struct FakeSpawner {
    log: CommandLog,
    senders: Vec<mpsc::Sender<UnitEvent>>,
    fail_at: Option<u32>,
}

impl UnitSpawner for FakeSpawner {
    type Endpoint = FakeEndpoint;

    fn spawn(&mut self, id: UnitId, events: mpsc::Sender<UnitEvent>) -> BandResult<FakeEndpoint> {
        if self.fail_at == Some(id.0) {
            return Err(BandError::validation("out of threads"));
        }
        self.senders.push(events);
        Ok(FakeEndpoint {
            id,
            log: Rc::clone(&self.log),
        })
    }
}

const WIDTH: u32 = 2;

fn with_units(units: u32, height: u32) -> Orchestrator<FakeSpawner> {
    let opts = OrchestratorOpts {
        policy: UnitCountPolicy::fixed(units),
    };
    let mut o = Orchestrator::new(FakeSpawner::default(), opts);
    o.initialize(units, ImageSize::new(WIDTH, height).unwrap())
        .unwrap();
    o
}

fn ready(o: &mut Orchestrator<FakeSpawner>) {
    for i in 0..o.unit_count() {
        o.handle_event(UnitEvent::Ready { id: UnitId(i as u32) })
            .unwrap();
    }
    assert_eq!(o.state(), OrchestratorState::Ready);
}

fn running(units: u32, height: u32) -> Orchestrator<FakeSpawner> {
    let mut o = with_units(units, height);
    ready(&mut o);
    o.start(&JobOptions {
        samples_per_pixel: Some(4),
        seed: Some(9),
    })
    .unwrap();
    o
}

fn progress(o: &Orchestrator<FakeSpawner>, unit: u32, p: f64) -> UnitEvent {
    let len = o.band(UnitId(unit)).unwrap().rgba_len();
    UnitEvent::Progress {
        id: UnitId(unit),
        run: o.run(),
        progress: p,
        buffer: OutputBuffer::new(vec![unit as u8; len]),
    }
}

fn relay(o: &mut Orchestrator<FakeSpawner>, unit: u32, p: f64) -> ProgressUpdate {
    let event = progress(o, unit, p);
    match o.handle_event(event).unwrap() {
        Some(OrchestratorEvent::Progress(update)) => update,
        other => panic!("expected progress, got {other:?}"),
    }
}

fn permutations(n: u32) -> Vec<Vec<u32>> {
    fn go(prefix: &mut Vec<u32>, rest: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
        if rest.is_empty() {
            out.push(prefix.clone());
            return;
        }
        for i in 0..rest.len() {
            let v = rest.remove(i);
            prefix.push(v);
            go(prefix, rest, out);
            prefix.pop();
            rest.insert(i, v);
        }
    }
    let mut out = Vec::new();
    go(&mut Vec::new(), &mut (0..n).collect(), &mut out);
    out
}

#[test]
fn initialize_spawns_policy_count_and_sends_band_geometry() {
    let opts = OrchestratorOpts {
        policy: UnitCountPolicy::match_hint(),
    };
    let mut o = Orchestrator::new(FakeSpawner::default(), opts);
    o.initialize(3, ImageSize::new(WIDTH, 100).unwrap())
        .unwrap();

    assert_eq!(o.state(), OrchestratorState::Initializing);
    assert_eq!(o.unit_count(), 3);
    assert_eq!(o.opts().policy.name(), UnitCountPolicy::MATCH_HINT);

    let log = o.spawner.log.borrow();
    let rows: Vec<(u32, u32, u32)> = log
        .iter()
        .map(|(unit, cmd)| match cmd {
            UnitCommand::Init { id, spec } => {
                assert_eq!(id, unit);
                assert_eq!(spec.random_seed, None);
                (id.0, spec.draw_offset_y, spec.draw_height)
            }
            other => panic!("unexpected command {other:?}"),
        })
        .collect();
    assert_eq!(rows, vec![(0, 0, 33), (1, 33, 33), (2, 66, 34)]);
}

#[test]
fn initialize_twice_is_rejected() {
    let mut o = with_units(2, 10);
    let err = o
        .initialize(2, ImageSize::new(WIDTH, 10).unwrap())
        .unwrap_err();
    assert!(matches!(err, BandError::Validation(_)));
    assert_eq!(o.state(), OrchestratorState::Initializing);
}

#[test]
fn readiness_barrier_fires_once_for_every_arrival_order() {
    for order in permutations(4) {
        let mut o = with_units(4, 16);
        let mut fired = Vec::new();
        for (n, unit) in order.iter().enumerate() {
            let out = o.handle_event(UnitEvent::Ready { id: UnitId(*unit) }).unwrap();
            if matches!(out, Some(OrchestratorEvent::Ready)) {
                fired.push(n);
            }
        }
        assert_eq!(fired, vec![3], "order {order:?}");
        assert_eq!(o.state(), OrchestratorState::Ready);
    }
}

#[test]
fn readiness_barrier_does_not_fire_early() {
    let mut o = with_units(5, 20);
    for unit in [4, 0, 3, 1] {
        let out = o.handle_event(UnitEvent::Ready { id: UnitId(unit) }).unwrap();
        assert!(out.is_none());
    }
    assert_eq!(o.state(), OrchestratorState::Initializing);
}

#[test]
fn duplicate_readiness_is_fatal() {
    let mut o = with_units(3, 9);
    o.handle_event(UnitEvent::Ready { id: UnitId(1) }).unwrap();
    let err = o
        .handle_event(UnitEvent::Ready { id: UnitId(1) })
        .unwrap_err();
    assert!(matches!(err, BandError::MalformedEvent(_)));
    assert_eq!(o.state(), OrchestratorState::Faulted);

    let err = o
        .handle_event(UnitEvent::Ready { id: UnitId(0) })
        .unwrap_err();
    assert!(matches!(err, BandError::Halted));
}

#[test]
fn event_from_unknown_unit_is_fatal() {
    let mut o = with_units(2, 4);
    let err = o
        .handle_event(UnitEvent::Ready { id: UnitId(7) })
        .unwrap_err();
    assert!(err.to_string().contains("unknown unit 7"));
    assert_eq!(o.state(), OrchestratorState::Faulted);
}

#[test]
fn spawn_failure_drops_the_partial_pool() {
    let spawner = FakeSpawner {
        fail_at: Some(2),
        ..FakeSpawner::default()
    };
    let opts = OrchestratorOpts {
        policy: UnitCountPolicy::fixed(4),
    };
    let mut o = Orchestrator::new(spawner, opts);
    let err = o
        .initialize(4, ImageSize::new(WIDTH, 8).unwrap())
        .unwrap_err();

    assert!(matches!(err, BandError::SpawnFailure { unit: UnitId(2), .. }));
    assert!(err.to_string().contains("out of threads"));
    assert_eq!(o.unit_count(), 0);
    assert_eq!(o.state(), OrchestratorState::Faulted);
    assert!(matches!(o.start(&JobOptions::default()), Err(BandError::Halted)));
}

#[test]
fn fault_before_ready_is_a_spawn_failure() {
    let mut o = with_units(2, 4);
    let err = o
        .handle_event(UnitEvent::Fault {
            id: UnitId(1),
            message: "wasm instantiate failed".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, BandError::SpawnFailure { unit: UnitId(1), .. }));
    assert_eq!(o.state(), OrchestratorState::Faulted);
    assert_eq!(o.unit_count(), 0);
    // Every endpoint was dropped along with its handle.
    assert_eq!(Rc::strong_count(&o.spawner.log), 1);
    assert!(matches!(o.start(&JobOptions::default()), Err(BandError::Halted)));
    assert!(matches!(o.next_event(), Err(BandError::Halted)));
}

#[test]
fn fault_after_partial_readiness_drops_the_pool() {
    let mut o = with_units(3, 6);
    o.handle_event(UnitEvent::Ready { id: UnitId(0) }).unwrap();
    o.handle_event(UnitEvent::Ready { id: UnitId(2) }).unwrap();
    let err = o
        .handle_event(UnitEvent::Fault {
            id: UnitId(1),
            message: "bad band".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, BandError::SpawnFailure { unit: UnitId(1), .. }));
    assert_eq!(o.unit_count(), 0);
    assert!(matches!(o.wait_ready(), Err(BandError::Halted)));
}

#[test]
fn progress_updates_before_start_are_rejected() {
    let mut o = with_units(2, 4);
    ready(&mut o);
    {
        let mut updates = o.progress_updates();
        assert!(matches!(updates.next(), Some(Err(BandError::Validation(_)))));
        assert!(updates.next().is_none());
    }
    assert_eq!(o.state(), OrchestratorState::Ready);
    assert!(o.start(&JobOptions::default()).is_ok());
}

#[test]
fn start_requires_ready() {
    let mut o = with_units(2, 4);
    let err = o.start(&JobOptions::default()).unwrap_err();
    assert!(matches!(err, BandError::Validation(_)));
    assert_eq!(o.state(), OrchestratorState::Initializing);

    let mut fresh = Orchestrator::new(FakeSpawner::default(), OrchestratorOpts::default());
    assert!(fresh.start(&JobOptions::default()).is_err());
    assert_eq!(fresh.state(), OrchestratorState::Uninitialized);
}

#[test]
fn start_sends_one_shared_seed_to_every_unit() {
    let mut o = with_units(3, 30);
    ready(&mut o);
    o.spawner.log.borrow_mut().clear();

    let run = o
        .start(&JobOptions {
            samples_per_pixel: Some(8),
            seed: None,
        })
        .unwrap();
    assert_eq!(run, RunId(1));
    assert_eq!(o.state(), OrchestratorState::Running);

    let seeds: Vec<Option<u64>> = o
        .spawner
        .log
        .borrow()
        .iter()
        .map(|(_, cmd)| match cmd {
            UnitCommand::Start { run, spec } => {
                assert_eq!(*run, RunId(1));
                assert_eq!(spec.samples_per_pixel, Some(8));
                spec.random_seed
            }
            other => panic!("unexpected command {other:?}"),
        })
        .collect();
    assert_eq!(seeds.len(), 3);
    assert!(seeds[0].is_some());
    assert!(seeds.iter().all(|s| *s == seeds[0]));
    assert!(o.bands().all(|b| b.random_seed == seeds[0]));
}

#[test]
fn separate_runs_draw_separate_seeds() {
    let mut o = with_units(2, 4);
    ready(&mut o);
    o.start(&JobOptions::default()).unwrap();
    let first = o.band(UnitId(0)).unwrap().random_seed;
    let run = o.start(&JobOptions::default()).unwrap();
    let second = o.band(UnitId(0)).unwrap().random_seed;
    assert_eq!(run, RunId(2));
    assert_ne!(first, second);
}

#[test]
fn aggregate_is_the_unweighted_mean_in_any_order() {
    for order in permutations(3) {
        // Unequal band heights must not weight the mean.
        let mut o = running(3, 10);
        let reported = [0.2, 0.5, 0.8];
        let mut last = 0.0;
        for unit in &order {
            last = relay(&mut o, *unit, reported[*unit as usize]).aggregate_progress;
        }
        assert!((last - 0.5).abs() < 1e-12, "order {order:?}: {last}");
        assert!((o.aggregate_progress() - 0.5).abs() < 1e-12);
    }
}

#[test]
fn unit_progress_is_relayed_unaltered_and_in_order() {
    let mut o = running(2, 4);
    let steps = [0.1, 0.25, 0.25, 0.9, 1.0];
    let relayed: Vec<f64> = steps
        .iter()
        .map(|p| relay(&mut o, 0, *p).unit_progress)
        .collect();
    assert_eq!(relayed, steps);
    assert_eq!(o.unit_progress(UnitId(0)), Some(1.0));
}

#[test]
fn every_unit_event_is_relayed_with_its_band() {
    let mut o = running(3, 10);
    let update = relay(&mut o, 2, 0.5);
    assert_eq!(update.unit, UnitId(2));
    assert_eq!(update.run, RunId(1));
    assert_eq!(update.band.draw_offset_y, 6);
    assert_eq!(update.band.draw_height, 4);
    assert_eq!(update.band.random_seed, Some(9));
    assert_eq!(update.buffer.len(), update.band.rgba_len());
    assert!(update.buffer.as_bytes().iter().all(|b| *b == 2));
}

#[test]
fn buffers_are_moved_not_copied() {
    let mut o = running(2, 6);
    let len = o.band(UnitId(1)).unwrap().rgba_len();
    let data = vec![0xAB; len];
    let ptr = data.as_ptr();

    let out = o
        .handle_event(UnitEvent::Progress {
            id: UnitId(1),
            run: o.run(),
            progress: 0.5,
            buffer: OutputBuffer::new(data),
        })
        .unwrap();
    let Some(OrchestratorEvent::Progress(update)) = out else {
        panic!("expected progress");
    };
    assert_eq!(update.buffer.into_vec().as_ptr(), ptr);
}

#[test]
fn fault_after_ready_halts_the_run() {
    let mut o = running(2, 4);
    relay(&mut o, 0, 0.5);

    let err = o
        .handle_event(UnitEvent::Fault {
            id: UnitId(1),
            message: "out of memory".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, BandError::UnitFault { unit: UnitId(1), .. }));
    assert_eq!(o.state(), OrchestratorState::Faulted);

    let late = progress(&o, 0, 1.0);
    assert!(matches!(o.handle_event(late), Err(BandError::Halted)));
    assert!(matches!(o.try_next_event(), Err(BandError::Halted)));
    assert!(matches!(o.start(&JobOptions::default()), Err(BandError::Halted)));
}

#[test]
fn progress_before_start_is_malformed() {
    let mut o = with_units(2, 4);
    ready(&mut o);
    let event = progress(&o, 0, 0.5);
    let err = o.handle_event(event).unwrap_err();
    assert!(matches!(err, BandError::MalformedEvent(_)));
}

#[test]
fn progress_outside_unit_interval_is_malformed() {
    let mut o = running(2, 4);
    let event = progress(&o, 1, 1.5);
    assert!(matches!(
        o.handle_event(event),
        Err(BandError::MalformedEvent(_))
    ));
}

#[test]
fn buffer_size_mismatch_is_malformed() {
    let mut o = running(2, 4);
    let err = o
        .handle_event(UnitEvent::Progress {
            id: UnitId(0),
            run: o.run(),
            progress: 0.5,
            buffer: OutputBuffer::new(vec![0; 3]),
        })
        .unwrap_err();
    assert!(err.to_string().contains("band needs"));
}

#[test]
fn events_from_a_superseded_run_are_discarded() {
    let mut o = running(2, 4);
    let stale = progress(&o, 0, 0.5);
    o.start(&JobOptions::default()).unwrap();

    assert!(o.handle_event(stale).unwrap().is_none());
    assert_eq!(o.unit_progress(UnitId(0)), Some(0.0));

    let future = UnitEvent::Progress {
        id: UnitId(0),
        run: RunId(99),
        progress: 0.5,
        buffer: OutputBuffer::new(vec![0; o.band(UnitId(0)).unwrap().rgba_len()]),
    };
    assert!(matches!(
        o.handle_event(future),
        Err(BandError::MalformedEvent(_))
    ));
}

#[test]
fn run_completes_when_every_unit_reports_full_progress() {
    let mut o = running(3, 9);
    relay(&mut o, 0, 1.0);
    relay(&mut o, 1, 1.0);
    assert_eq!(o.state(), OrchestratorState::Running);
    let update = relay(&mut o, 2, 1.0);
    assert_eq!(update.aggregate_progress, 1.0);
    assert_eq!(o.state(), OrchestratorState::Complete);

    assert!(matches!(
        o.try_next_event().unwrap(),
        Some(OrchestratorEvent::Complete)
    ));
    assert!(o.try_next_event().unwrap().is_none());
}

#[test]
fn pool_is_reused_across_runs() {
    let mut o = running(2, 4);
    relay(&mut o, 0, 1.0);
    relay(&mut o, 1, 1.0);
    assert_eq!(o.state(), OrchestratorState::Complete);

    let run = o.start(&JobOptions::default()).unwrap();
    assert_eq!(run, RunId(2));
    assert_eq!(o.state(), OrchestratorState::Running);
    assert_eq!(o.aggregate_progress(), 0.0);
    assert_eq!(o.unit_count(), 2);
}

#[test]
fn pumps_drive_the_protocol_through_the_channel() {
    let mut o = with_units(2, 4);
    for (i, tx) in o.spawner.senders.iter().enumerate() {
        tx.send(UnitEvent::Ready { id: UnitId(i as u32) }).unwrap();
    }
    o.wait_ready().unwrap();
    assert_eq!(o.state(), OrchestratorState::Ready);

    o.start(&JobOptions::default()).unwrap();
    for p in [0.5, 1.0] {
        for unit in 0..2u32 {
            let event = progress(&o, unit, p);
            o.spawner.senders[unit as usize].send(event).unwrap();
        }
    }

    let aggregates: Vec<f64> = o
        .progress_updates()
        .map(|u| u.unwrap().aggregate_progress)
        .collect();
    assert_eq!(aggregates, vec![0.25, 0.5, 0.75, 1.0]);
    assert_eq!(o.state(), OrchestratorState::Complete);
    assert_eq!(o.progress_updates().count(), 0);
}

#[test]
fn disconnected_pool_is_fatal() {
    let mut o = with_units(2, 4);
    o.spawner.senders.clear();
    let err = o.next_event().unwrap_err();
    assert!(err.to_string().contains("disconnected"));
    assert_eq!(o.state(), OrchestratorState::Faulted);
}

#[test]
fn pumping_before_initialize_is_rejected() {
    let mut o = Orchestrator::new(FakeSpawner::default(), OrchestratorOpts::default());
    assert!(matches!(o.try_next_event(), Err(BandError::Validation(_))));
    assert!(matches!(o.wait_ready(), Err(BandError::Validation(_))));
}
