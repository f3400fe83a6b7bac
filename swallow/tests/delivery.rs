mod common;

use common::{Link, Mode, Simulation, SESSION_ID};
use rand::{rngs::StdRng, Rng, SeedableRng};
use swallow::{Config, DataPoint};

const LIMIT: u32 = 600_000;

fn messages(seed: u64, count: usize, max_len: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let len = rng.gen_range(1..=max_len);
            (0..len).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>()
        })
        .collect()
}

/// Queues every message on A up front and runs until B received as many.
fn transfer(sim: &mut Simulation, sent: &[Vec<u8>]) -> Vec<Vec<u8>> {
    for message in sent {
        assert_eq!(sim.a.connection.send(message).unwrap(), message.len());
    }

    let mut received = Vec::new();
    sim.run_until(LIMIT, |sim: &mut Simulation| {
        while let Ok(message) = sim.b.connection.recv_bytes() {
            received.push(message.to_vec());
        }
        received.len() >= sent.len()
    });
    received
}

#[test]
fn lossless_round_trip() {
    let config = Config::new(SESSION_ID);
    let mut sim = Simulation::new(config.clone(), config, Link::lossless());
    let sent = messages(10, 500, 3000);

    let received = transfer(&mut sim, &sent);
    assert_eq!(received, sent);

    sim.run_until(LIMIT, |sim: &mut Simulation| sim.a.connection.wait_send() == 0);
    let metrics = sim.a.connection.metrics();
    assert_eq!(metrics.get_count(DataPoint::SegmentsRetransmitted), 0);
    assert_eq!(
        metrics.get_count(DataPoint::SegmentsAcked),
        metrics.get_count(DataPoint::SegmentsSent)
    );
}

#[test]
fn duplicated_packets_are_delivered_once() {
    let link = Link::lossy(11).with_duplicates(25);
    let mut sim = Simulation::new(Mode::Fast.config(), Mode::Fast.config(), link);
    let sent = messages(12, 300, 2000);

    let received = transfer(&mut sim, &sent);
    assert_eq!(received, sent);
    assert!(sim.b.connection.metrics().get_count(DataPoint::SegmentsDuplicate) > 0);

    // Nothing further shows up once the link drains.
    let until = sim.now + 2000;
    sim.run_until(LIMIT, |sim: &mut Simulation| sim.now >= until);
    assert!(sim.b.connection.recv_bytes().is_err());
}

#[test]
fn large_messages_are_reassembled_over_a_lossy_link() {
    let config = Mode::Fast.config();
    let mss = config.max_segment_size();
    let mut sim = Simulation::new(config.clone(), config.clone(), Link::lossy(13));

    let mut rng = StdRng::seed_from_u64(14);
    let sizes = [
        1,
        mss - 1,
        mss,
        mss + 1,
        10_000,
        64 * 1024,
        config.max_message_size(),
    ];
    let sent: Vec<Vec<u8>> = sizes
        .iter()
        .map(|&len| (0..len).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>())
        .collect();

    let received = transfer(&mut sim, &sent);
    assert_eq!(received.len(), sent.len());
    for (received, sent) in received.iter().zip(sent.iter()) {
        assert_eq!(received.len(), sent.len());
        assert!(received == sent);
    }
}

#[test]
fn stream_mode_delivers_a_byte_stream() {
    let config = Mode::Fast.config().with_stream_mode(true);
    let mut sim = Simulation::new(config.clone(), config, Link::lossy(15));

    let chunks = messages(16, 400, 700);
    let expected: Vec<u8> = chunks.iter().flatten().cloned().collect();
    for chunk in &chunks {
        assert_eq!(sim.a.connection.send(chunk).unwrap(), chunk.len());
    }
    // Small writes are merged, so far fewer segments than writes are queued.
    assert!(sim.a.connection.wait_send() < chunks.len());

    let mut received = Vec::new();
    sim.run_until(LIMIT, |sim: &mut Simulation| {
        while let Ok(bytes) = sim.b.connection.recv_bytes() {
            assert!(bytes.len() <= sim.b.connection.mss());
            received.extend_from_slice(&bytes);
        }
        received.len() >= expected.len()
    });
    assert_eq!(received, expected);
}

#[test]
fn foreign_packets_are_rejected_by_session_id() {
    let config = Config::new(SESSION_ID).with_nodelay(1, 10, 2, false);
    let mut sim = Simulation::new(config.clone(), config, Link::lossless());
    sim.a.connection.send(b"hello").unwrap();
    sim.a.connection.update(0).unwrap();

    let mut packet = sim.a.take_outgoing().remove(0);
    assert_eq!(swallow::read_session_id(&packet), Some(SESSION_ID));

    packet[0] ^= 0xff;
    assert!(sim.b.connection.input(&packet).unwrap_err().is_malformed_input());
    assert!(sim.b.connection.recv_bytes().is_err());
    assert_eq!(
        sim.b.connection.metrics().get_count(DataPoint::PacketsInvalid),
        1
    );
}
