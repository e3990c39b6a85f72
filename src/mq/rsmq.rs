//! Redis Stream Message Queue
//!
//! Consumer-group message queue over Redis Streams (XADD, XREADGROUP, XACK)
//! with at-least-once delivery, automatic stream/group creation, consumer
//! cleanup on disconnect, and channel-based routing.
//!
//! Stored entry shape: a single `data` field carrying compact JSON, e.g.
//! `{ "data": "{\"sender\":\"alice\",\"text\":\"hello\",\"type\":\"message\"}" }`
//!
//! Stream IDs look like `1716400000000-0` (millisecond timestamp + sequence).

use std::time::Duration;

use redis::{
    aio::ConnectionManager,
    streams::{
        StreamAutoClaimReply, StreamId, StreamInfoConsumersReply, StreamInfoGroupsReply,
        StreamInfoStreamReply, StreamPendingReply, StreamReadOptions, StreamReadReply,
    },
    AsyncCommands, Client, RedisResult,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::{ConsumeOptions, MqConfig, ReadMode, StreamStart};
use crate::error::Result;

/// Channel capacity between the pump task and the consuming stream.
const CONSUME_CHANNEL_CAPACITY: usize = 64;

/// Back-off applied after a failed stream read before retrying.
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Read failures in a row before a consumer gives up and surfaces the error.
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 5;

#[derive(Clone)]
pub struct Rsmq {
    conn: ConnectionManager,
    config: MqConfig,
}

impl Rsmq {
    /// Connects to Redis
    pub async fn connect(url: &str, config: MqConfig) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(prefix = %config.stream_prefix, "Connected to Redis Streams message queue");

        Ok(Self { conn, config })
    }

    pub fn config(&self) -> &MqConfig {
        &self.config
    }

    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Redis key for a channel ID
    pub fn key(&self, channel_id: &str) -> String {
        format!("{}{}", self.config.stream_prefix, channel_id)
    }

    fn decode_entry(entry: &StreamId) -> Option<Value> {
        super::decode_entry_payload(&entry.id, &entry.map)
    }

    // -------------------- group management --------------------

    /// Creates the stream and consumer group if missing (idempotent).
    ///
    /// Redis command: XGROUP CREATE <stream> <group> <0|$> MKSTREAM
    pub async fn ensure_group(
        &self,
        channel_id: &str,
        group_id: &str,
        start: StreamStart,
    ) -> Result<()> {
        let key = self.key(channel_id);
        let mut conn = self.conn.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&key)
            .arg(group_id)
            .arg(start.start_id())
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                debug!(group = %group_id, stream = %key, "Created consumer group");
                Ok(())
            }
            // Group already exists, that's fine
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // -------------------- producers --------------------

    /// Sends a message to the channel.
    ///
    /// Redis commands (pipelined):
    ///     XADD <stream> MAXLEN ~ <maxlen> * data <json>
    ///     EXPIRE <stream> <ttl>
    ///
    /// Returns the assigned entry ID (e.g. "1763006032172-0").
    pub async fn send(&self, channel_id: &str, data: &Value) -> Result<String> {
        let key = self.key(channel_id);
        self.ensure_group(channel_id, &self.config.default_group(), StreamStart::FromBeginning)
            .await?;

        let payload = serde_json::to_string(data)?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.cmd("XADD")
            .arg(&key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.maxlen)
            .arg("*")
            .arg("data")
            .arg(&payload);
        pipe.cmd("EXPIRE").arg(&key).arg(self.config.ttl_seconds);

        let (entry_id, _): (String, i64) = pipe.query_async(&mut conn).await?;

        debug!(stream = %key, entry_id = %entry_id, "Sent message");
        Ok(entry_id)
    }

    /// Broadcasts an event to all consumers of the channel.
    ///
    /// Convenience wrapper that stores `{ "type": event_type, "payload": payload }`.
    pub async fn broadcast(
        &self,
        channel_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<String> {
        let data = json!({ "type": event_type, "payload": payload });
        self.send(channel_id, &data).await
    }

    // -------------------- consumers --------------------

    /// Consumes messages from the channel using consumer groups.
    ///
    /// Yields `Ok((entry_id, payload))` in entry-id order; each entry is
    /// acknowledged after the yield when `auto_ack` is set. Pending-first
    /// subscriptions drain this consumer's pending list, then follow new
    /// entries. Read errors are retried with back-off; a read that keeps
    /// failing yields the error as the final item. The consumer is removed
    /// from its group when the returned stream is dropped or the pump
    /// stops.
    pub fn consume(
        &self,
        channel_id: &str,
        consumer_id: &str,
        opts: ConsumeOptions,
    ) -> ReceiverStream<Result<(String, Value)>> {
        self.consume_with_disconnect_check(channel_id, consumer_id, || false, opts)
    }

    /// Same as [`Rsmq::consume`], but polls `is_disconnected` before every
    /// read iteration and terminates cleanly once it turns true. Used by
    /// SSE handlers to stop when the client goes away.
    pub fn consume_with_disconnect_check<F>(
        &self,
        channel_id: &str,
        consumer_id: &str,
        is_disconnected: F,
        opts: ConsumeOptions,
    ) -> ReceiverStream<Result<(String, Value)>>
    where
        F: Fn() -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CONSUME_CHANNEL_CAPACITY);
        let rsmq = self.clone();
        let channel_id = channel_id.to_string();
        let consumer_id = consumer_id.to_string();

        tokio::spawn(async move {
            rsmq.pump(&channel_id, &consumer_id, opts, is_disconnected, tx)
                .await;
        });

        ReceiverStream::new(rx)
    }

    async fn pump<F>(
        &self,
        channel_id: &str,
        consumer_id: &str,
        opts: ConsumeOptions,
        is_disconnected: F,
        tx: mpsc::Sender<Result<(String, Value)>>,
    ) where
        F: Fn() -> bool,
    {
        let key = self.key(channel_id);
        let block_ms = opts.block_ms.unwrap_or(self.config.block_ms);
        let count = opts.count.unwrap_or(self.config.read_count);
        let mut cursor = opts.mode.cursor();
        let mut consecutive_failures = 0u32;

        if let Err(e) = self.ensure_group(channel_id, &opts.group_id, opts.start).await {
            warn!(stream = %key, group = %opts.group_id, error = %e, "Error creating consumer group");
        }

        debug!(stream = %key, consumer = %consumer_id, group = %opts.group_id, "Consumer started");

        'pump: loop {
            // Disconnect check runs before every blocking read
            if is_disconnected() || tx.is_closed() {
                debug!(stream = %key, consumer = %consumer_id, "Client disconnected, stopping consumer");
                break;
            }

            let entries = match self
                .read_group(&key, &opts.group_id, consumer_id, cursor, count, block_ms)
                .await
            {
                Ok(entries) => {
                    consecutive_failures = 0;
                    entries
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                        error!(stream = %key, consumer = %consumer_id, error = %e,
                            "Giving up after repeated read failures");
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    error!(stream = %key, error = %e, "Error reading from stream");
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                    continue;
                }
            };

            // A pending-first subscription follows the live stream once its
            // pending list is drained
            if entries.is_empty() && cursor == ReadMode::PendingEntries.cursor() {
                debug!(stream = %key, consumer = %consumer_id,
                    "Pending entries drained, switching to new entries");
                cursor = ReadMode::NewEntries.cursor();
                continue;
            }

            for (entry_id, payload) in entries {
                if tx.send(Ok((entry_id.clone(), payload))).await.is_err() {
                    break 'pump;
                }

                if opts.auto_ack {
                    if let Err(e) = self.ack(channel_id, &opts.group_id, &entry_id).await {
                        warn!(stream = %key, entry_id = %entry_id, error = %e, "Failed to acknowledge entry");
                    }
                }
            }
        }

        // Cleanup: remove consumer from group on disconnect (best-effort)
        match self
            .delete_consumer(channel_id, &opts.group_id, consumer_id)
            .await
        {
            Ok(_) => debug!(stream = %key, consumer = %consumer_id, "Removed consumer"),
            Err(e) => warn!(stream = %key, consumer = %consumer_id, error = %e, "Error removing consumer"),
        }
    }

    async fn read_group(
        &self,
        key: &str,
        group_id: &str,
        consumer_id: &str,
        cursor: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(String, Value)>> {
        let read_opts = StreamReadOptions::default()
            .group(group_id, consumer_id)
            .count(count)
            .block(block_ms as usize);

        let mut conn = self.conn.clone();
        let reply: StreamReadReply = match conn.xread_options(&[key], &[cursor], &read_opts).await {
            Ok(reply) => reply,
            // A blocking read that expires with no entries is not an error
            Err(e) if e.to_string().contains("timeout") => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                if let Some(payload) = Self::decode_entry(&entry) {
                    entries.push((entry.id, payload));
                }
            }
        }
        Ok(entries)
    }

    /// Acknowledges one entry. Redis command: XACK <stream> <group> <entry_id>
    pub async fn ack(&self, channel_id: &str, group_id: &str, entry_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let acked: u64 = redis::cmd("XACK")
            .arg(self.key(channel_id))
            .arg(group_id)
            .arg(entry_id)
            .query_async(&mut conn)
            .await?;
        Ok(acked)
    }

    /// Claims entries stuck pending on other consumers (failure recovery).
    ///
    /// Redis command: XAUTOCLAIM <stream> <group> <consumer> <min-idle> 0-0 COUNT <n>
    pub async fn claim_pending(
        &self,
        channel_id: &str,
        group_id: &str,
        consumer_id: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<(String, Value)>> {
        let mut conn = self.conn.clone();
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(self.key(channel_id))
            .arg(group_id)
            .arg(consumer_id)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let claimed = reply
            .claimed
            .iter()
            .filter_map(|entry| Self::decode_entry(entry).map(|payload| (entry.id.clone(), payload)))
            .collect();
        Ok(claimed)
    }

    // -------------------- management helpers --------------------

    /// Stream length. Redis command: XLEN <stream>
    pub async fn length(&self, channel_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.xlen(self.key(channel_id)).await?)
    }

    /// Count of pending (unacknowledged) entries for a group.
    ///
    /// Redis command: XPENDING <stream> <group>
    pub async fn pending_count(&self, channel_id: &str, group_id: &str) -> u64 {
        let key = self.key(channel_id);
        let mut conn = self.conn.clone();
        let reply: RedisResult<StreamPendingReply> = redis::cmd("XPENDING")
            .arg(&key)
            .arg(group_id)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(StreamPendingReply::Data(data)) => data.count as u64,
            Ok(StreamPendingReply::Empty) => 0,
            Err(e) => {
                warn!(stream = %key, error = %e, "Error getting pending count");
                0
            }
        }
    }

    /// Trims the stream. Redis command: XTRIM <stream> MAXLEN ~ <maxlen>
    pub async fn trim(&self, channel_id: &str, maxlen: u64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let trimmed: u64 = redis::cmd("XTRIM")
            .arg(self.key(channel_id))
            .arg("MAXLEN")
            .arg("~")
            .arg(maxlen)
            .query_async(&mut conn)
            .await?;
        Ok(trimmed)
    }

    /// Sets TTL on the stream. Redis command: EXPIRE <stream> <ttl>
    pub async fn expire(&self, channel_id: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.expire(self.key(channel_id), ttl_seconds as i64).await?)
    }

    /// Deletes the channel stream. Redis command: DEL <stream>
    pub async fn delete(&self, channel_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.del(self.key(channel_id)).await?)
    }

    /// Removes a consumer from a group.
    ///
    /// Redis command: XGROUP DELCONSUMER <stream> <group> <consumer>
    pub async fn delete_consumer(
        &self,
        channel_id: &str,
        group_id: &str,
        consumer_id: &str,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pending: u64 = redis::cmd("XGROUP")
            .arg("DELCONSUMER")
            .arg(self.key(channel_id))
            .arg(group_id)
            .arg(consumer_id)
            .query_async(&mut conn)
            .await?;
        Ok(pending)
    }

    /// Stream info. Redis command: XINFO STREAM <stream>
    ///
    /// Returns an empty object when the stream does not exist.
    pub async fn info(&self, channel_id: &str) -> Value {
        let key = self.key(channel_id);
        let mut conn = self.conn.clone();
        let reply: RedisResult<StreamInfoStreamReply> = redis::cmd("XINFO")
            .arg("STREAM")
            .arg(&key)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(info) => json!({
                "length": info.length,
                "last_generated_id": info.last_generated_id,
                "groups": info.groups,
                "first_entry_id": info.first_entry.id,
                "last_entry_id": info.last_entry.id,
            }),
            Err(e) => {
                warn!(stream = %key, error = %e, "Error getting stream info");
                json!({})
            }
        }
    }

    /// Consumer group info. Redis command: XINFO GROUPS <stream>
    pub async fn group_info(&self, channel_id: &str) -> Vec<Value> {
        let key = self.key(channel_id);
        let mut conn = self.conn.clone();
        let reply: RedisResult<StreamInfoGroupsReply> = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(&key)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(info) => info
                .groups
                .iter()
                .map(|g| {
                    json!({
                        "name": g.name,
                        "consumers": g.consumers,
                        "pending": g.pending,
                        "last_delivered_id": g.last_delivered_id,
                    })
                })
                .collect(),
            Err(e) => {
                warn!(stream = %key, error = %e, "Error getting group info");
                Vec::new()
            }
        }
    }

    /// Consumers of one group. Redis command: XINFO CONSUMERS <stream> <group>
    pub async fn consumers_info(&self, channel_id: &str, group_id: &str) -> Vec<Value> {
        let key = self.key(channel_id);
        let mut conn = self.conn.clone();
        let reply: RedisResult<StreamInfoConsumersReply> = redis::cmd("XINFO")
            .arg("CONSUMERS")
            .arg(&key)
            .arg(group_id)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(info) => info
                .consumers
                .iter()
                .map(|c| {
                    json!({
                        "name": c.name,
                        "pending": c.pending,
                        "idle": c.idle,
                    })
                })
                .collect(),
            Err(e) => {
                warn!(stream = %key, group = %group_id, error = %e, "Error getting consumers info");
                Vec::new()
            }
        }
    }
}

// Stream behaviour (replay, same-group distribution, ack bookkeeping) is
// covered by the Redis-backed cases in tests/integration_tests.rs.
