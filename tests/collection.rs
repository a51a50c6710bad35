//! End-to-end scenarios for [`sockmpi::collection::NestedMap::gather`] over real TCP
//! loopback connections (see `communicator.rs` for the scaffolding this borrows).

use sockmpi::bootstrap::common::{find_free_port, random_authkey};
use sockmpi::bootstrap::Bootstrap;
use sockmpi::collection::NestedMap;
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
fn disjoint_keys_across_ranks_merge_into_one_tree() {
    let (host, port, authkey) = world();

    std::thread::scope(|scope| {
        for rank in 0..3 {
            let host = host.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 3)).unwrap();
                let mut map = NestedMap::new();
                map.insert(vec![format!("rank{rank}"), "value".to_string()], rank as i32)
                    .unwrap();

                let tree = map.gather(&mut comm, 0).unwrap();
                if rank == 0 {
                    let tree = tree.unwrap();
                    for r in 0..3 {
                        assert_eq!(tree.get(&[&format!("rank{r}"), "value"]), Some(&(r as i32)));
                    }
                } else {
                    assert!(tree.is_none());
                }
            });
        }
    });
}

#[test]
fn colliding_keys_across_ranks_fail_the_whole_gather() {
    let (host, port, authkey) = world();

    std::thread::scope(|scope| {
        for rank in 0..2 {
            let host = host.clone();
            scope.spawn(move || {
                let mut comm = Communicator::connect(bootstrap_for(&host, port, authkey, rank, 2)).unwrap();
                let mut map = NestedMap::new();
                map.insert(vec!["shared".to_string()], rank as i32).unwrap();

                let err = map.gather(&mut comm, 0).unwrap_err();
                assert!(matches!(err, sockmpi::Error::DuplicateGatherKeys { .. }));
            });
        }
    });
}

#[test]
fn single_rank_world_gathers_without_any_wire_traffic() {
    let mut comm = Communicator::connect(bootstrap_for("localhost", -1, [0u8; 64], 0, 1)).unwrap();
    let mut map = NestedMap::new();
    map.insert(vec!["only".to_string()], 7).unwrap();
    let tree = map.gather(&mut comm, 0).unwrap().unwrap();
    assert_eq!(tree.get(&["only"]), Some(&7));
}
