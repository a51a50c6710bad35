//! End-to-end scenarios for the managed dispatcher, over real TCP loopback
//! connections (see `communicator.rs` for the scaffolding this borrows).

use sockmpi::bootstrap::common::{find_free_port, random_authkey};
use sockmpi::bootstrap::Bootstrap;
use sockmpi::dispatch::{map_unordered, map_unordered_iter, split_managed};
use sockmpi::Communicator;

fn world() -> (String, i32, [u8; 64]) {
    let host = "127.0.0.1".to_string();
    let port = find_free_port().expect("free port") as i32;
    let authkey = random_authkey();
    (host, port, authkey)
}

fn bootstrap_for(host: &str, port: i32, authkey: [u8; 64], rank: usize, size: usize) -> Bootstrap {
    Bootstrap {
        host: host.to_string(),
        port,
        rank,
        size,
        authkey,
    }
}

#[test]
fn map_unordered_collects_every_result_at_root() {
    let (host, port, authkey) = world();
    let work: Vec<i32> = (0..20).collect();

    std::thread::scope(|scope| {
        for rank in 0..3 {
            let host = host.clone();
            let work = work.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 3)).unwrap();
                let results = map_unordered(&mut comm, &work, |v| Ok(v * 2)).unwrap();
                if rank == 0 {
                    let mut sorted = results;
                    sorted.sort();
                    let expected: Vec<i32> = work.iter().map(|v| v * 2).collect();
                    assert_eq!(sorted, expected);
                } else {
                    assert!(results.is_empty());
                }
            });
        }
    });
}

#[test]
fn split_managed_hands_every_worker_a_disjoint_slice_covering_the_whole_sequence() {
    let (host, port, authkey) = world();
    let work: Vec<i32> = (0..15).collect();

    std::thread::scope(|scope| {
        for rank in 0..3 {
            let host = host.clone();
            let work = work.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 3)).unwrap();
                let mine = split_managed(&mut comm, &work).unwrap();
                if rank == 0 {
                    assert!(mine.is_empty());
                } else {
                    assert!(!mine.is_empty());
                    for item in &mine {
                        assert!(work.contains(item));
                    }
                }
            });
        }
    });
}

#[test]
fn map_unordered_iter_covers_a_non_indexable_source() {
    let (host, port, authkey) = world();
    let work: Vec<i32> = (0..12).collect();

    std::thread::scope(|scope| {
        for rank in 0..3 {
            let host = host.clone();
            let work = work.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 3)).unwrap();
                // `work.iter()` is deliberately consumed as a plain iterator rather
                // than indexed, exercising the position-matching path.
                let results = map_unordered_iter(&mut comm, work.iter().copied(), |v| Ok(v + 1)).unwrap();
                if rank == 0 {
                    let mut sorted = results;
                    sorted.sort();
                    let expected: Vec<i32> = work.iter().map(|v| v + 1).collect();
                    assert_eq!(sorted, expected);
                } else {
                    assert!(results.is_empty());
                }
            });
        }
    });
}

#[test]
fn a_failing_worker_surfaces_iterator_not_consumed_everywhere() {
    let (host, port, authkey) = world();
    let work: Vec<i32> = (0..10).collect();

    std::thread::scope(|scope| {
        for rank in 0..3 {
            let host = host.clone();
            let work = work.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 3)).unwrap();
                let result = map_unordered(&mut comm, &work, |v| {
                    if *v == 5 {
                        return Err(sockmpi::Error::Codec("deliberate failure at item 5".into()));
                    }
                    Ok(*v)
                });
                if rank == 0 {
                    // Root always learns about the failure, whichever worker hit it.
                    let err = result.expect_err("root must see the failure");
                    assert!(matches!(err, sockmpi::Error::IteratorNotConsumed { .. }));
                } else {
                    // Exactly one worker pulls index 5 and re-raises its own error;
                    // whichever one didn't finishes normally with no results of its own.
                    match result {
                        Ok(results) => assert!(results.is_empty()),
                        Err(sockmpi::Error::Codec(_)) => {}
                        Err(other) => panic!("unexpected error on worker: {other:?}"),
                    }
                }
            });
        }
    });
}
