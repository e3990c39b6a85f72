//! Redis Streams Messaging
//!
//! Two stream abstractions share the Redis connection:
//! - `Rsmq`: consumer-group message queue for per-channel pub/sub with
//!   at-least-once delivery and SSE fan-out
//! - `RunBuffer`: per-run append/backfill/tail buffer without groups
//!
//! Broadcasting note: for the same channel, different consumer groups each
//! see ALL entries (broadcast) while consumers sharing a group split the
//! entries between them (work distribution). To give every SSE client the
//! whole stream, each subscription uses its own group.

mod buffer;
mod rsmq;
pub mod sse;

pub use buffer::RunBuffer;
pub use rsmq::Rsmq;

use serde_json::Value;
use tracing::warn;

use crate::config::Config;

/// Decodes the single `data` field of a stream entry into JSON.
///
/// Entries without the field or with undecodable payloads are skipped
/// (logged), never surfaced to consumers.
pub(crate) fn decode_entry_payload(
    entry_id: &str,
    map: &std::collections::HashMap<String, redis::Value>,
) -> Option<Value> {
    let field = map.get("data")?;
    let redis::Value::BulkString(bytes) = field else {
        return None;
    };
    match serde_json::from_slice::<Value>(bytes) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(entry_id = %entry_id, error = %e, "Skipping entry with undecodable payload");
            None
        }
    }
}

// ============================================
// CONFIG
// ============================================

/// Configuration for the Redis Streams layer
#[derive(Debug, Clone)]
pub struct MqConfig {
    /// Prefix for channel stream keys, e.g. "mq:channel:" -> "mq:channel:<channel_id>"
    pub stream_prefix: String,
    /// Prefix for run-buffer stream keys, e.g. "rsbuf:" -> "rsbuf:<run_id>"
    pub buffer_prefix: String,
    /// Prefix for consumer group names
    pub group_prefix: String,
    /// Entries kept per stream (XADD MAXLEN ~)
    pub maxlen: u64,
    /// Expiration (EXPIRE) refreshed on each append
    pub ttl_seconds: u64,
    /// Default blocking time for reads
    pub block_ms: u64,
    /// Entries read per XREADGROUP call
    pub read_count: usize,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            stream_prefix: "mq:channel:".to_string(),
            buffer_prefix: "rsbuf:".to_string(),
            group_prefix: "mq-consumer".to_string(),
            maxlen: 10_000,
            ttl_seconds: 3600,
            block_ms: 15_000,
            read_count: 10,
        }
    }
}

impl MqConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stream_prefix: config.redis_stream_mq_prefix.clone(),
            buffer_prefix: config.redis_stream_buffer_prefix.clone(),
            group_prefix: config.redis_stream_mq_group_prefix.clone(),
            maxlen: config.redis_stream_mq_maxlen,
            ttl_seconds: config.redis_stream_mq_ttl_seconds,
            block_ms: config.redis_stream_mq_block_ms,
            read_count: config.redis_stream_mq_read_count,
        }
    }

    /// Group used by producers to pre-create the stream's default group.
    pub fn default_group(&self) -> String {
        format!("{}-default", self.group_prefix)
    }

    /// Unique per-subscription group, which yields broadcast semantics.
    pub fn broadcast_group(&self, consumer_id: &str) -> String {
        format!("{}-{}", self.group_prefix, consumer_id)
    }
}

// ============================================
// CONSUME OPTIONS
// ============================================

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStart {
    /// XGROUP CREATE with id "0": replay the stream from the beginning.
    FromBeginning,
    /// XGROUP CREATE with id "$": only entries appended after creation.
    NewOnly,
}

impl StreamStart {
    pub fn start_id(self) -> &'static str {
        match self {
            StreamStart::FromBeginning => "0",
            StreamStart::NewOnly => "$",
        }
    }
}

/// Which cursor each XREADGROUP call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// ">": only entries never delivered to this group.
    NewEntries,
    /// "0": this consumer's delivered-but-unacknowledged entries first;
    /// the pump follows new entries once the pending list is drained.
    PendingEntries,
}

impl ReadMode {
    pub fn cursor(self) -> &'static str {
        match self {
            ReadMode::NewEntries => ">",
            ReadMode::PendingEntries => "0",
        }
    }
}

/// Options for one consume subscription
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Consumer group for this subscription. Unique group = broadcast,
    /// shared group = work distribution.
    pub group_id: String,
    pub start: StreamStart,
    pub mode: ReadMode,
    /// Acknowledge each entry after it is yielded
    pub auto_ack: bool,
    pub block_ms: Option<u64>,
    pub count: Option<usize>,
}

impl ConsumeOptions {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            start: StreamStart::FromBeginning,
            mode: ReadMode::NewEntries,
            auto_ack: true,
            block_ms: None,
            count: None,
        }
    }

    pub fn start(mut self, start: StreamStart) -> Self {
        self.start = start;
        self
    }

    pub fn mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }
}
