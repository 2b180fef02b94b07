//! Shared helpers for lockstep integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use lockstep::{GroupChannel, GroupConfig, GroupEndpoint, local_group};

pub const PACKET_SIZE: usize = 512;

/// An in-process cluster; node 0 is the master in every test.
pub struct Cluster {
    pub endpoints: Vec<Arc<GroupEndpoint>>,
}

impl Cluster {
    pub fn new(members: usize) -> Self {
        let config = GroupConfig {
            packet_size: PACKET_SIZE,
            pool_slots: 16,
            receive_timeout_ms: Some(5_000),
        };
        Self {
            endpoints: local_group(members, &config)
                .into_iter()
                .map(Arc::new)
                .collect(),
        }
    }

    pub fn members(&self) -> usize {
        self.endpoints.len()
    }

    pub fn group(&self, node: usize) -> Arc<dyn GroupChannel> {
        self.endpoints[node].clone()
    }

    /// Runs `node` on every member, each on its own thread, and returns the
    /// results in node order.
    pub fn run_concurrently<T, F>(&self, node: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize, Arc<dyn GroupChannel>) -> T + Sync,
    {
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.members())
                .map(|index| {
                    let group = self.group(index);
                    let node = &node;
                    scope.spawn(move || node(index, group))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("node thread panicked"))
                .collect()
        })
    }

    /// Runs `node` on the master and then on each slave, on this thread.
    pub fn run_in_order<T, F>(&self, mut node: F) -> Vec<T>
    where
        F: FnMut(usize, Arc<dyn GroupChannel>) -> T,
    {
        (0..self.members())
            .map(|index| node(index, self.group(index)))
            .collect()
    }
}

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn assert_all_equal<T: PartialEq + std::fmt::Debug>(results: &[T]) {
    for (node, result) in results.iter().enumerate().skip(1) {
        assert_eq!(result, &results[0], "node {node} diverged from the master");
    }
}
