//! A pair of connections joined by a simulated link on a virtual millisecond clock.

#![allow(dead_code)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use swallow::{Config, ReliableConnection};

pub const SESSION_ID: u32 = 0x1122_3344;

#[derive(Copy, Clone, Debug)]
pub enum Direction {
    AToB,
    BToA,
}

struct DelayedPacket {
    deliver_at: u32,
    data: Vec<u8>,
}

/// Drops, delays and optionally duplicates packets. Each direction is a FIFO: a packet is only
/// delivered once every packet queued before it was.
pub struct Link {
    rng: StdRng,
    loss_percent: u32,
    duplicate_percent: u32,
    delay_min: u32,
    delay_max: u32,
    capacity: usize,
    a_to_b: VecDeque<DelayedPacket>,
    b_to_a: VecDeque<DelayedPacket>,
}

impl Link {
    pub fn lossless() -> Self {
        Self::new(0, 0, 1, 1)
    }

    /// 10% loss and 30 to 62 ms of delay in each direction.
    pub fn lossy(seed: u64) -> Self {
        Self::new(seed, 10, 30, 62)
    }

    pub fn new(seed: u64, loss_percent: u32, delay_min: u32, delay_max: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            loss_percent,
            duplicate_percent: 0,
            delay_min,
            delay_max,
            capacity: 1000,
            a_to_b: VecDeque::new(),
            b_to_a: VecDeque::new(),
        }
    }

    pub fn with_duplicates(mut self, duplicate_percent: u32) -> Self {
        self.duplicate_percent = duplicate_percent;
        self
    }

    pub fn send(&mut self, direction: Direction, now: u32, data: Vec<u8>) {
        if self.rng.gen_range(0..100) < self.loss_percent {
            return;
        }
        let copies = if self.rng.gen_range(0..100) < self.duplicate_percent {
            2
        } else {
            1
        };
        for _ in 0..copies {
            let delay = self.rng.gen_range(self.delay_min..=self.delay_max);
            let tunnel = match direction {
                Direction::AToB => &mut self.a_to_b,
                Direction::BToA => &mut self.b_to_a,
            };
            if tunnel.len() >= self.capacity {
                return;
            }
            tunnel.push_back(DelayedPacket {
                deliver_at: now + delay,
                data: data.clone(),
            });
        }
    }

    pub fn recv(&mut self, direction: Direction, now: u32) -> Option<Vec<u8>> {
        let tunnel = match direction {
            Direction::AToB => &mut self.a_to_b,
            Direction::BToA => &mut self.b_to_a,
        };
        if tunnel.front()?.deliver_at > now {
            return None;
        }
        tunnel.pop_front().map(|packet| packet.data)
    }
}

/// A connection and everything it has written to its output since the last `take_outgoing`.
pub struct Peer {
    pub connection: ReliableConnection,
    outbox: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Peer {
    pub fn new(config: Config) -> Self {
        let mut connection = ReliableConnection::with_config(config).unwrap();
        let outbox = Arc::new(Mutex::new(Vec::new()));
        let sink = outbox.clone();
        connection.set_output(move |packet: &[u8]| {
            sink.lock().unwrap().push(packet.to_vec());
            Ok(())
        });
        Self { connection, outbox }
    }

    pub fn take_outgoing(&self) -> Vec<Vec<u8>> {
        std::mem::replace(&mut *self.outbox.lock().unwrap(), Vec::new())
    }
}

pub struct Simulation {
    pub a: Peer,
    pub b: Peer,
    pub link: Link,
    pub now: u32,
}

impl Simulation {
    pub fn new(config_a: Config, config_b: Config, link: Link) -> Self {
        Self {
            a: Peer::new(config_a),
            b: Peer::new(config_b),
            link,
            now: 0,
        }
    }

    /// Updates both connections, moves their output onto the link, delivers every packet due by
    /// now, then advances the clock by one millisecond.
    pub fn step(&mut self) {
        let now = self.now;
        self.a.connection.update(now).unwrap();
        self.b.connection.update(now).unwrap();

        for packet in self.a.take_outgoing() {
            self.link.send(Direction::AToB, now, packet);
        }
        for packet in self.b.take_outgoing() {
            self.link.send(Direction::BToA, now, packet);
        }

        while let Some(packet) = self.link.recv(Direction::AToB, now) {
            self.b.connection.input(&packet).unwrap();
        }
        while let Some(packet) = self.link.recv(Direction::BToA, now) {
            self.a.connection.input(&packet).unwrap();
        }

        self.now += 1;
    }

    /// Steps until `done` returns true, failing the test after `limit` virtual millis.
    pub fn run_until<F>(&mut self, limit: u32, mut done: F)
    where
        F: FnMut(&mut Simulation) -> bool,
    {
        while !done(self) {
            assert!(
                self.now < limit,
                "not finished after {} virtual ms",
                limit
            );
            self.step();
        }
    }
}

/// The default, normal and fast presets of the echo scenario.
#[derive(Copy, Clone, Debug)]
pub enum Mode {
    Default,
    Normal,
    Fast,
}

impl Mode {
    pub fn config(self) -> Config {
        let config = Config::new(SESSION_ID).with_window_sizes(128, 128);
        match self {
            Mode::Default => config.with_nodelay(0, 10, 0, true),
            Mode::Normal => config.with_nodelay(0, 10, 0, false),
            Mode::Fast => config.with_nodelay(2, 10, 2, false).with_minimum_rto(10),
        }
    }
}
