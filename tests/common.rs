//! Test utilities & fixtures shared by the integration tests.
#![allow(dead_code)] // each test crate uses a different subset

use std::sync::{Arc, Mutex};

use meshpanel::errors::{Result, StateError};
use meshpanel::protocol::{MyNodeInfo, PortNum, Transport, User, Waypoint};
use meshpanel::types::{Destination, NodeNum};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Packet {
        payload: Vec<u8>,
        port: PortNum,
        destination: Destination,
    },
    Waypoint {
        waypoint: Waypoint,
        destination: Destination,
    },
}

/// Transport fake that records every send; can be switched to fail.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub sent: Arc<Mutex<Vec<Sent>>>,
    pub fail: Arc<Mutex<bool>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    fn record(&self, item: Sent) -> Result<u32> {
        if *self.fail.lock().unwrap() {
            return Err(StateError::Transport("radio unplugged".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(item);
        Ok(sent.len() as u32)
    }
}

impl Transport for RecordingTransport {
    fn send_packet(
        &self,
        payload: Vec<u8>,
        port: PortNum,
        destination: Destination,
        _channel: u32,
    ) -> Result<u32> {
        self.record(Sent::Packet {
            payload,
            port,
            destination,
        })
    }

    fn send_waypoint(
        &self,
        waypoint: &Waypoint,
        destination: Destination,
        _channel: u32,
    ) -> Result<u32> {
        self.record(Sent::Waypoint {
            waypoint: waypoint.clone(),
            destination,
        })
    }
}

pub fn hardware(num: NodeNum) -> MyNodeInfo {
    MyNodeInfo {
        my_node_num: num,
        ..Default::default()
    }
}

pub fn user_with_key(name: &str, key: &[u8]) -> User {
    User {
        long_name: name.to_string(),
        public_key: key.to_vec(),
        ..Default::default()
    }
}
