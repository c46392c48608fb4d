//! Telemetry sinks.
//!
//! Every tick phase reports through a [`TelemetryEvent`]. The engine stamps
//! each event into a [`TelemetryRecord`] and hands it to a
//! [`TelemetrySink`]. The default [`TracingSink`] writes one structured
//! `tracing` record per event, carrying the dotted event name, the tick,
//! and the JSON payload.

use cascade_types::{TelemetryEvent, TelemetryRecord};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Destination for telemetry records.
pub trait TelemetrySink: Send {
    /// Receive one record.
    fn emit(&mut self, record: &TelemetryRecord);
}

/// Writes every record as an `info` level `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&mut self, record: &TelemetryRecord) {
        match serde_json::to_string(&record.event) {
            Ok(payload) => info!(
                event = record.event.name(),
                tick = record.event.tick(),
                emitted_at = %record.emitted_at,
                payload = %payload,
                "telemetry"
            ),
            Err(e) => warn!(
                event = record.event.name(),
                error = %e,
                "Failed to serialize telemetry event"
            ),
        }
    }
}

/// Keeps records in memory. Used by tests and embedders that poll.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    records: Vec<TelemetryRecord>,
}

impl BufferSink {
    /// Create an empty buffer.
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Records received so far.
    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    /// Events received so far, without timestamps.
    pub fn events(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.records.iter().map(|record| &record.event)
    }

    /// Take every buffered record.
    pub fn drain(&mut self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut self.records)
    }
}

impl TelemetrySink for BufferSink {
    fn emit(&mut self, record: &TelemetryRecord) {
        self.records.push(record.clone());
    }
}

/// Forwards records to an unbounded channel, for consumers on another task.
///
/// Records sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TelemetryRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver that reads from it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TelemetryRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn emit(&mut self, record: &TelemetryRecord) {
        let _ = self.tx.send(record.clone());
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl TelemetrySink for NoOpSink {
    fn emit(&mut self, _record: &TelemetryRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stride(tick: u64) -> TelemetryRecord {
        TelemetryRecord::now(TelemetryEvent::StrideExec {
            tick,
            traversals: 1,
            total_flow: 0.25,
            active_nodes: 2,
            alpha_eff: 0.1,
        })
    }

    #[test]
    fn buffer_keeps_order_and_drains() {
        let mut sink = BufferSink::new();
        sink.emit(&stride(1));
        sink.emit(&stride(2));
        let ticks: Vec<u64> = sink.events().map(TelemetryEvent::tick).collect();
        assert_eq!(ticks, vec![1, 2]);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn channel_sink_forwards_until_closed() {
        let (mut sink, mut rx) = ChannelSink::new();
        sink.emit(&stride(5));
        assert_eq!(rx.try_recv().map(|r| r.event.tick()).ok(), Some(5));
        drop(rx);
        sink.emit(&stride(6));
    }

    #[test]
    fn tracing_and_noop_sinks_accept_records() {
        let record = stride(3);
        TracingSink.emit(&record);
        NoOpSink.emit(&record);
    }
}
