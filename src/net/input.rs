//! Client input ingestion
//!
//! Applies a client's input message to its liaison: acknowledgement, ping
//! sample, then the batched frames in arrival order.

use tracing::{debug, warn};

use crate::net::liaison::Liaison;
use crate::net::protocol::InputFrame;
use crate::scene::registry::Registry;
use crate::scene::Timestamp;

/// What happened to one input message
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InputReport {
    /// The client has not entered the scene; nothing was applied
    pub ignored: bool,
    /// Records dropped from the window by the acknowledgement
    pub acknowledged: usize,
    pub delivered: usize,
    /// Not newer than the last processed frame
    pub stale: usize,
    /// Outside the current tick and not the newest frame of the batch
    pub out_of_date: usize,
    /// No controlled pawn to receive them
    pub rejected: usize,
}

impl Liaison {
    /// Process one input message from the client
    ///
    /// # Arguments
    /// * `acknowledge` - Timestamp of the newest delta the client has applied
    /// * `ping` - Client-measured round trip in milliseconds
    /// * `frames` - Input frames in the order the client sampled them
    pub fn enqueue_input(
        &mut self,
        registry: &mut Registry,
        acknowledge: Timestamp,
        ping: u32,
        frames: Vec<InputFrame>,
    ) -> InputReport {
        let mut report = InputReport::default();
        if !self.receiving {
            report.ignored = true;
            return report;
        }

        report.acknowledged = self.acknowledge(acknowledge);
        self.ping.record(ping);

        let Some(controlled) = self.controlled else {
            if !frames.is_empty() {
                warn!(client = %self.client_id, frames = frames.len(), "input from client without a pawn");
                report.rejected = frames.len();
            }
            return report;
        };

        let previous = registry.previous_timestamp();
        let now = registry.timestamp();
        let newest = frames.len().saturating_sub(1);

        for (index, frame) in frames.into_iter().enumerate() {
            if frame.timestamp <= self.last_input {
                report.stale += 1;
                continue;
            }
            self.last_input = frame.timestamp;

            // The newest frame always counts as "now", so batching adds no lag
            let in_range = previous < frame.timestamp && frame.timestamp <= now;
            if !in_range && index != newest {
                debug!(client = %self.client_id, timestamp = frame.timestamp, "out-of-date input dropped");
                report.out_of_date += 1;
                continue;
            }

            match registry.deliver_input(controlled, frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(client = %self.client_id, error = %e, "input delivery failed");
                    report.rejected += 1;
                }
            }
        }
        report
    }

    /// Make the acknowledged record the baseline.
    ///
    /// # Returns
    /// Number of records dropped
    pub fn acknowledge(&mut self, timestamp: Timestamp) -> usize {
        if timestamp <= self.reference() {
            return 0;
        }
        match self.records.iter().position(|record| record.timestamp == timestamp) {
            Some(index) => {
                self.records.drain(..index);
                self.last_acknowledged = timestamp;
                index
            }
            None => {
                warn!(
                    client = %self.client_id,
                    acknowledge = timestamp,
                    reference = self.reference(),
                    "acknowledged timestamp not in window, ignored"
                );
                0
            }
        }
    }
}
