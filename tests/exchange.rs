use std::time::Duration;

use alltomany::prelude::*;
use alltomany::Universe;

fn universe(size: usize) -> Universe {
    alltomany::initialize_local(size)
        .unwrap()
        .with_timeout(Duration::from_secs(20))
}

fn config(ntimes: usize, ratio: i32, len: usize, gap: usize) -> BenchConfig {
    BenchConfig {
        ntimes,
        ratio,
        len,
        gap,
        debug: true,
        ..BenchConfig::default()
    }
}

/// Run one phase of `strategy` on every rank and return the final receive buffers.
fn receive_buffers(size: usize, config: &BenchConfig, strategy: Strategy) -> Vec<Vec<i32>> {
    universe(size).run(|world| {
        let pattern = SyntheticPattern::new(world.size(), world.rank(), config).unwrap();
        let mut buffers = Buffers::<i32>::for_synthetic(&pattern).unwrap();
        let checker = ReceiveChecker::for_synthetic(&pattern);
        let mut exchanger = Exchanger::new(strategy, world.size());
        let outcome = bench::run_phase(
            &world,
            &mut exchanger,
            &pattern,
            &mut buffers,
            Some(&checker),
            &PhaseConfig::from_bench(config),
        )
        .unwrap();
        assert!(outcome.passed(), "{:?}", outcome);
        assert_eq!(outcome.completed, config.ntimes);
        buffers.recv.as_slice().to_vec()
    })
}

#[test]
fn four_ranks_every_second_receives() {
    let config = config(1, 2, 3, 0);
    let buffers = receive_buffers(4, &config, Strategy::Vectorized);
    assert_eq!(buffers[0], [-3, -3, -3, 1, 1, 1, 2, 2, 2, 3, 3, 3]);
    assert_eq!(buffers[2], [0, 0, 0, 1, 1, 1, -3, -3, -3, 3, 3, 3]);
    assert!(buffers[1].is_empty());
    assert!(buffers[3].is_empty());
}

#[test]
fn both_strategies_deliver_the_same_content() {
    let config = config(3, 3, 5, 2);
    let vectorized = receive_buffers(7, &config, Strategy::Vectorized);
    let synchronous = receive_buffers(7, &config, Strategy::Immediate(SendMode::Synchronous));
    let standard = receive_buffers(7, &config, Strategy::Immediate(SendMode::Standard));
    assert_eq!(vectorized, synchronous);
    assert_eq!(vectorized, standard);
}

#[test]
fn repeated_iterations_leave_the_same_content() {
    let once = receive_buffers(5, &config(1, 1, 4, 1), Strategy::Vectorized);
    let many = receive_buffers(5, &config(9, 1, 4, 1), Strategy::Vectorized);
    assert_eq!(once, many);
}

#[test]
fn gaps_keep_the_sentinel() {
    let buffers = receive_buffers(3, &config(2, 1, 2, 3), Strategy::Immediate(SendMode::Standard));
    assert_eq!(buffers[1], [0, 0, -3, -3, -3, -3, -3, -3, -3, -3, 2, 2, -3, -3, -3]);
}

#[test]
fn immediate_requests_stay_within_capacity() {
    let config = config(4, 1, 8, 0);
    let results = universe(6).run(|world| {
        let pattern = SyntheticPattern::new(world.size(), world.rank(), &config).unwrap();
        let mut buffers = Buffers::<i32>::for_synthetic(&pattern).unwrap();
        let mut exchanger = Exchanger::new(Strategy::Immediate(SendMode::Synchronous), world.size());
        for i in 0..config.ntimes {
            exchanger
                .exchange(
                    &world,
                    &pattern,
                    i,
                    buffers.send.iteration(i),
                    buffers.recv.as_mut_slice(),
                )
                .unwrap();
        }
        match &exchanger {
            Exchanger::Immediate(x) => (
                x.requests().len(),
                x.requests().capacity(),
                x.requests().outstanding(),
            ),
            Exchanger::Vectorized(_) => unreachable!(),
        }
    });
    for (posted, capacity, outstanding) in results {
        // five receives and five sends, never one for the own rank
        assert_eq!(posted, 10);
        assert_eq!(capacity, 12);
        assert_eq!(outstanding, 0);
    }
}

#[test]
fn root_holds_the_report() {
    let config = BenchConfig {
        ntimes: 20,
        ratio: 2,
        len: 16,
        ..BenchConfig::default()
    };
    let reports = universe(4).run(|world| {
        let pattern = SyntheticPattern::new(world.size(), world.rank(), &config).unwrap();
        let mut buffers = Buffers::<u8>::for_synthetic(&pattern).unwrap();
        let mut exchanger = Exchanger::new(Strategy::Immediate(SendMode::Standard), world.size());
        let outcome = bench::run_phase(
            &world,
            &mut exchanger,
            &pattern,
            &mut buffers,
            None,
            &PhaseConfig::from_bench(&config),
        )
        .unwrap();
        outcome.report
    });
    let report = reports[0].as_ref().unwrap();
    assert!(reports[1..].iter().all(Option::is_none));
    assert_eq!(report.label, "isend/irecv");
    // two receivers, three senders each, 16 bytes, 20 iterations
    assert_eq!(report.bytes, 2 * 3 * 16 * 20);
    assert!(report.times.end_to_end >= 0.0);
    assert!(report.to_string().contains("Comm bandwidth"));
}
