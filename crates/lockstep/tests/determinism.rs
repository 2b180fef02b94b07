//! Determinism tests: every node observes the master's results.
//!
//! Nodes run on their own threads against a shared in-process group, so
//! slaves block on outcomes the master has not produced yet.

mod common;

use std::sync::Arc;

use common::{Cluster, assert_all_equal, init_tracing};
use lockstep::{
    ChannelConfig, EndianMode, FileConfig, FileSource, OpenFlags, ReplicatedChannel,
    ReplicatedFile, Role,
};
use lockstep_sim::{FaultOp, MemoryBackend, ReadStep, ScriptedSocket, codes};
use proptest::prelude::*;

fn native(buffer_size: usize) -> ChannelConfig {
    ChannelConfig {
        buffer_size,
        read_order: EndianMode::Native,
        write_order: EndianMode::Native,
        ..ChannelConfig::default()
    }
}

fn open_channel(
    node: usize,
    group: Arc<dyn lockstep::GroupChannel>,
    socket: Option<ScriptedSocket>,
    config: &ChannelConfig,
) -> ReplicatedChannel {
    match (node, socket) {
        (0, Some(socket)) => ReplicatedChannel::master(group, socket, config).unwrap(),
        _ => ReplicatedChannel::slave(group, config).unwrap(),
    }
}

/// What one node saw for one read call.
#[derive(Debug, Clone, PartialEq)]
enum Observed {
    Bytes(Vec<u8>),
    Error(String),
}

// ============================================================================
// Concurrent runs
// ============================================================================

#[test]
fn concurrent_nodes_read_the_same_stream() {
    init_tracing();
    let cluster = Cluster::new(4);
    let payload: Vec<u8> = (0..1_000u32).map(|i| (i * 7 % 251) as u8).collect();
    let config = native(64);

    let results = cluster.run_concurrently(|node, group| {
        let socket = (node == 0).then(|| {
            payload
                .chunks(33)
                .fold(ScriptedSocket::new(), |socket, chunk| socket.with_data(chunk.to_vec()))
                .with_eof()
        });
        let mut channel = open_channel(node, group, socket, &config);
        let mut seen = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = channel.read_bytes(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        channel.close().unwrap();
        seen
    });

    assert_eq!(results[0], payload);
    assert_all_equal(&results);
}

#[test]
fn concurrent_nodes_share_errors_and_timeouts() {
    init_tracing();
    let cluster = Cluster::new(3);
    let config = native(16);

    let results = cluster.run_concurrently(|node, group| {
        let socket = (node == 0).then(|| {
            ScriptedSocket::new()
                .with_data(b"abc".to_vec())
                .with_readiness(false)
                .with_step(ReadStep::Interrupted)
                .with_data(b"def".to_vec())
                .with_read_error(codes::ECONNRESET)
        });
        let mut channel = open_channel(node, group, socket, &config);
        let mut buf = [0u8; 8];
        let mut observed = Vec::new();
        for _ in 0..4 {
            let result = channel.read_bytes_timeout(&mut buf, std::time::Duration::from_millis(5));
            observed.push(match result {
                Ok(n) => Observed::Bytes(buf[..n].to_vec()),
                Err(error) => Observed::Error(format!("{error:?}")),
            });
        }
        observed
    });

    assert!(matches!(&results[0][0], Observed::Error(e) if e.starts_with("Timeout")));
    assert_eq!(results[0][1], Observed::Bytes(b"abc".to_vec()));
    assert_eq!(results[0][2], Observed::Bytes(b"def".to_vec()));
    assert!(matches!(&results[0][3], Observed::Error(e) if e.contains("FatalIo")));
    assert_all_equal(&results);
}

#[test]
fn concurrent_file_access_keeps_every_cursor_equal() {
    init_tracing();
    let cluster = Cluster::new(3);
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_file("/data/log", (0..200u8).collect::<Vec<_>>());
    backend.inject(FaultOp::Read, codes::EIO);

    let results = cluster.run_concurrently(|node, group| {
        let source = if node == 0 {
            FileSource::local(backend.clone(), "/data/log", OpenFlags::read_write())
        } else {
            FileSource::Remote
        };
        let mut file = ReplicatedFile::open(group, source, &FileConfig { buffer_size: 32 }).unwrap();
        assert_eq!(file.role() == Role::Master, node == 0);

        let mut log = Vec::new();
        let mut buf = [0u8; 20];
        log.push(format!("{:?}", file.read_extent(&mut buf).map(|n| buf[..n].to_vec())));
        for _ in 0..3 {
            log.push(format!("{:?}", file.read_extent(&mut buf).map(|n| buf[..n].to_vec())));
        }
        file.seek_to(190);
        log.push(format!("{:?}", file.write_extent(b"tail-of-file")));
        log.push(format!("{:?}", file.stat_size()));
        log.push(format!("{}", file.position()));
        file.close().unwrap();
        log
    });

    assert!(results[0][0].contains("FatalIo"));
    assert_eq!(results[0][5], "Ok(202)");
    assert_eq!(results[0][6], "202");
    assert_all_equal(&results);
    assert_eq!(backend.open_handles(), 0);
    let contents = backend.contents("/data/log").unwrap();
    assert_eq!(&contents[190..], b"tail-of-file");
}

// ============================================================================
// Randomized scripts
// ============================================================================

fn read_step() -> impl Strategy<Value = ReadStep> {
    prop_oneof![
        6 => prop::collection::vec(any::<u8>(), 1..40).prop_map(ReadStep::Data),
        1 => Just(ReadStep::Interrupted),
        1 => prop::sample::select(vec![codes::EIO, codes::ECONNRESET, codes::EPIPE])
            .prop_map(ReadStep::Fail),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any socket script, read in any sizes, yields the same observations
    /// on the master and on every slave.
    #[test]
    fn prop_random_scripts_replay_identically(
        steps in prop::collection::vec(read_step(), 0..12),
        sizes in prop::collection::vec(1usize..24, 1..30),
        buffer_size in 1usize..48,
    ) {
        let cluster = Cluster::new(3);
        let config = native(buffer_size);

        let results = cluster.run_in_order(|node, group| {
            let socket = (node == 0).then(|| {
                steps
                    .iter()
                    .cloned()
                    .fold(ScriptedSocket::new(), ScriptedSocket::with_step)
                    .with_eof()
            });
            let mut channel = open_channel(node, group, socket, &config);
            sizes
                .iter()
                .map(|&size| {
                    let mut buf = vec![0u8; size];
                    match channel.read_bytes(&mut buf) {
                        Ok(n) => Observed::Bytes(buf[..n].to_vec()),
                        Err(error) => Observed::Error(format!("{error:?}")),
                    }
                })
                .collect::<Vec<_>>()
        });

        for slave in &results[1..] {
            prop_assert_eq!(slave, &results[0]);
        }
    }
}
