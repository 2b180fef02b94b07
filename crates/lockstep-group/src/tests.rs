//! Unit tests for lockstep-group

use std::thread;
use std::time::Duration;

use lockstep_types::{ChannelId, NodeId};
use test_case::test_case;

use crate::{GroupChannel, GroupError, LocalGroup, LocalGroupConfig};

fn group(members: usize) -> Vec<crate::GroupEndpoint> {
    LocalGroup::new(
        members,
        LocalGroupConfig {
            packet_size: 64,
            pool_slots: 8,
            receive_timeout: Some(Duration::from_secs(5)),
        },
    )
}

// ============================================================================
// Channel lifecycle
// ============================================================================

#[test]
fn members_agree_on_channel_ids_when_opening_in_order() {
    let members = group(3);
    for _ in 0..4 {
        let ids: Vec<ChannelId> = members
            .iter()
            .map(|m| m.open_channel().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}

#[test]
fn endpoints_report_node_and_member_count() {
    let members = group(3);
    assert_eq!(members[2].node(), NodeId::new(2));
    assert_eq!(members[0].member_count(), 3);
    assert_eq!(members[1].packet_size(), 64);
}

#[test]
fn closed_channel_rejects_operations() {
    let members = group(2);
    let channel = members[0].open_channel().unwrap();
    members[0].close_channel(channel).unwrap();

    assert_eq!(
        members[0].broadcast(channel, b"late"),
        Err(GroupError::ChannelNotOpen { channel })
    );
    assert_eq!(
        members[0].close_channel(channel),
        Err(GroupError::ChannelNotOpen { channel })
    );
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn framed_message_is_delivered_as_one_unit() {
    let members = group(2);
    let channel = members[0].open_channel().unwrap();
    assert_eq!(members[1].open_channel().unwrap(), channel);

    members[0].broadcast(channel, b"HELLO").unwrap();
    members[0].broadcast(channel, b"WORLD").unwrap();
    members[0].finish_message(channel).unwrap();

    let packet = members[1].receive(channel).unwrap();
    assert_eq!(packet.as_slice(), b"HELLOWORLD");
}

#[test]
fn packets_and_messages_share_fifo_order() {
    let members = group(3);
    let channel = members[0].open_channel().unwrap();
    for slave in &members[1..] {
        slave.open_channel().unwrap();
    }

    for i in 0u8..10 {
        if i % 2 == 0 {
            let packet = members[0].pool().allocate_with(&[i]).unwrap();
            members[0].send(channel, packet).unwrap();
        } else {
            members[0].broadcast(channel, &[i]).unwrap();
            members[0].finish_message(channel).unwrap();
        }
    }

    for slave in &members[1..] {
        let received: Vec<u8> = (0..10)
            .map(|_| slave.receive(channel).unwrap().as_slice()[0])
            .collect();
        assert_eq!(received, (0..10).collect::<Vec<u8>>());
    }
}

#[test]
fn sender_does_not_receive_its_own_messages() {
    let members = LocalGroup::new(
        2,
        LocalGroupConfig {
            receive_timeout: Some(Duration::from_millis(20)),
            ..LocalGroupConfig::default()
        },
    );
    let channel = members[0].open_channel().unwrap();
    members[1].open_channel().unwrap();
    members[0].broadcast(channel, b"x").unwrap();
    members[0].finish_message(channel).unwrap();

    let err = members[0].receive(channel).unwrap_err();
    assert!(matches!(err, GroupError::Timeout { .. }));
}

#[test]
fn channels_are_independent() {
    let members = group(2);
    let a = members[0].open_channel().unwrap();
    let b = members[0].open_channel().unwrap();
    members[1].open_channel().unwrap();
    members[1].open_channel().unwrap();

    members[0].send(b, members[0].pool().allocate_with(b"bee").unwrap()).unwrap();
    members[0].send(a, members[0].pool().allocate_with(b"ay").unwrap()).unwrap();

    assert_eq!(members[1].receive(a).unwrap().as_slice(), b"ay");
    assert_eq!(members[1].receive(b).unwrap().as_slice(), b"bee");
}

#[test]
fn messages_sent_before_slave_opens_are_kept() {
    let members = group(2);
    let channel = members[0].open_channel().unwrap();
    members[0].broadcast(channel, b"early").unwrap();
    members[0].finish_message(channel).unwrap();
    members[0].close_channel(channel).unwrap();

    assert_eq!(members[1].open_channel().unwrap(), channel);
    assert_eq!(members[1].receive(channel).unwrap().as_slice(), b"early");
    members[1].close_channel(channel).unwrap();
}

#[test]
fn queued_counts_unreceived_messages_until_route_is_gone() {
    let members = group(2);
    let channel = members[0].open_channel().unwrap();
    assert_eq!(members[1].queued(channel), Some(0));

    members[0].broadcast(channel, b"one").unwrap();
    members[0].finish_message(channel).unwrap();
    assert_eq!(members[0].queued(channel), Some(0));
    assert_eq!(members[1].queued(channel), Some(1));

    members[1].open_channel().unwrap();
    members[1].receive(channel).unwrap();
    assert_eq!(members[1].queued(channel), Some(0));

    members[0].close_channel(channel).unwrap();
    assert_eq!(members[1].queued(channel), Some(0));
    members[1].close_channel(channel).unwrap();
    assert_eq!(members[0].queued(channel), None);
    assert_eq!(members[1].queued(channel), None);
}

#[test]
fn blocking_receive_across_threads() {
    let mut members = group(2);
    let slave = members.pop().unwrap();
    let master = members.pop().unwrap();

    let handle = thread::spawn(move || {
        let channel = slave.open_channel().unwrap();
        (0..100)
            .map(|_| slave.receive(channel).unwrap().as_slice().to_vec())
            .collect::<Vec<_>>()
    });

    let channel = master.open_channel().unwrap();
    for i in 0u32..100 {
        master.broadcast(channel, &i.to_le_bytes()).unwrap();
        master.finish_message(channel).unwrap();
    }

    let received = handle.join().unwrap();
    for (i, bytes) in received.iter().enumerate() {
        assert_eq!(bytes.as_slice(), (i as u32).to_le_bytes());
    }
}

#[test_case(65; "one byte over")]
#[test_case(1000; "far over")]
fn oversized_messages_are_rejected(size: usize) {
    let members = group(2);
    let channel = members[0].open_channel().unwrap();
    let err = members[0].broadcast(channel, &vec![0u8; size]).unwrap_err();
    assert_eq!(
        err,
        GroupError::MessageTooLarge {
            size,
            capacity: 64
        }
    );
}

#[test]
fn received_packets_return_to_receiver_pool() {
    let members = group(2);
    let channel = members[0].open_channel().unwrap();
    members[1].open_channel().unwrap();

    for _ in 0..5 {
        members[0].broadcast(channel, b"data").unwrap();
        members[0].finish_message(channel).unwrap();
        let packet = members[1].receive(channel).unwrap();
        members[1].free(packet);
    }

    let stats = members[1].pool().stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.created, 1, "one slot should be recycled");
}

// ============================================================================
// Property-Based Tests
// ============================================================================

use proptest::prelude::*;

proptest! {
    /// Property: every slave sees exactly the master's message sequence
    #[test]
    fn prop_all_members_observe_identical_sequence(
        messages in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..32),
        slaves in 1usize..4,
    ) {
        let members = group(slaves + 1);
        let channel = members[0].open_channel().unwrap();
        for slave in &members[1..] {
            slave.open_channel().unwrap();
        }
        for message in &messages {
            members[0].broadcast(channel, message).unwrap();
            members[0].finish_message(channel).unwrap();
        }
        for slave in &members[1..] {
            for message in &messages {
                let packet = slave.receive(channel).unwrap();
                prop_assert_eq!(packet.as_slice(), message.as_slice());
            }
        }
    }
}
