//! End-to-end scenarios driving several ranks of one world in a single test process,
//! over real TCP loopback connections.

use sockmpi::bootstrap::common::{find_free_port, random_authkey};
use sockmpi::bootstrap::Bootstrap;
use sockmpi::split::split_round_robin;
use sockmpi::{Communicator, ANY_TAG};

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
fn rank_and_size_echo() {
    let (host, port, authkey) = world();

    std::thread::scope(|scope| {
        let root = scope.spawn(|| {
            let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, 0, 2)).unwrap();
            assert_eq!(comm.rank(), 0);
            assert_eq!(comm.size(), 2);
            let msg: String = comm.recv(1, 0, None).unwrap();
            assert_eq!(msg, "hello from worker");
        });
        let worker = scope.spawn(|| {
            let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, 1, 2)).unwrap();
            assert_eq!(comm.rank(), 1);
            comm.send(&"hello from worker", 0, 0).unwrap();
        });
        root.join().unwrap();
        worker.join().unwrap();
    });
}

#[test]
fn bcast_delivers_roots_value_to_every_rank() {
    let (host, port, authkey) = world();

    std::thread::scope(|scope| {
        for rank in 0..3 {
            let host = host.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 3)).unwrap();
                let value = if rank == 0 { 42 } else { 0 };
                let received: i32 = comm.bcast(value, 0).unwrap();
                assert_eq!(received, 42);
            });
        }
    });
}

#[test]
fn gather_returns_values_in_strict_rank_order() {
    let (host, port, authkey) = world();

    std::thread::scope(|scope| {
        for rank in 0..3 {
            let host = host.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 3)).unwrap();
                let gathered = comm.gather(rank * 10, 0).unwrap();
                if rank == 0 {
                    assert_eq!(gathered, Some(vec![0, 10, 20]));
                } else {
                    assert_eq!(gathered, None);
                }
            });
        }
    });
}

#[test]
fn barrier_returns_on_every_rank() {
    let (host, port, authkey) = world();

    std::thread::scope(|scope| {
        for rank in 0..3 {
            let host = host.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 3)).unwrap();
                comm.barrier().unwrap();
            });
        }
    });
}

#[test]
fn round_robin_split_then_gather_covers_every_item_once() {
    let (host, port, authkey) = world();
    let work = vec![10, 11, 12, 13, 14];

    std::thread::scope(|scope| {
        for rank in 0..2 {
            let host = host.clone();
            let work = work.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 2)).unwrap();
                let mine = split_round_robin(&work, rank, 2);
                let gathered = comm.gather(mine, 0).unwrap();
                if rank == 0 {
                    let mut all: Vec<i32> = gathered.unwrap().into_iter().flatten().collect();
                    all.sort();
                    assert_eq!(all, work);
                }
            });
        }
    });
}

#[test]
fn clone_produces_an_independent_fabric() {
    let (host, port, authkey) = world();

    std::thread::scope(|scope| {
        for rank in 0..2 {
            let host = host.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 2)).unwrap();
                let mut child = comm.clone().unwrap();
                assert_eq!(child.depth(), comm.depth() + 1);

                // Traffic on the child must not collide with a plain send on the parent.
                if rank == 0 {
                    child.send(&"on the child", 1, 0).unwrap();
                    comm.send(&"on the parent", 1, 0).unwrap();
                } else {
                    let on_child: String = child.recv(0, ANY_TAG, None).unwrap();
                    let on_parent: String = comm.recv(0, ANY_TAG, None).unwrap();
                    assert_eq!(on_child, "on the child");
                    assert_eq!(on_parent, "on the parent");
                }
            });
        }
    });
}
