//! Redis Stream Run Buffer
//!
//! Per-run chunk buffer over Redis Streams: append + backfill + tail,
//! no consumer groups. Keys are `rsbuf:<run_id>`. Lets a reconnecting
//! client replay chunks produced while it was away and then follow the
//! live tail of the run.

use redis::{
    aio::ConnectionManager,
    streams::{StreamRangeReply, StreamReadOptions, StreamReadReply},
    AsyncCommands,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use super::{MqConfig, Rsmq};
use crate::error::Result;

const TAIL_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct RunBuffer {
    conn: ConnectionManager,
    config: MqConfig,
}

impl RunBuffer {
    /// Builds a run buffer sharing the queue's Redis connection.
    pub fn new(rsmq: &Rsmq) -> Self {
        Self {
            conn: rsmq.connection(),
            config: rsmq.config().clone(),
        }
    }

    /// Redis key for a run ID
    pub fn key(&self, run_id: &str) -> String {
        format!("{}{}", self.config.buffer_prefix, run_id)
    }

    // -------------------- producers --------------------

    /// Appends an entry to the run stream.
    ///
    /// Redis commands (pipelined):
    ///     XADD <stream> MAXLEN ~ <maxlen> * data <json>
    ///     EXPIRE <stream> <ttl>
    pub async fn append(&self, run_id: &str, data: &Value) -> Result<String> {
        let key = self.key(run_id);
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
        Ok(entry_id)
    }

    /// Appends the final `{"type": "done"}` record to mark completion.
    pub async fn finish(&self, run_id: &str) -> Result<String> {
        self.append(run_id, &json!({ "type": "done" })).await
    }

    // -------------------- consumers --------------------

    /// Reads entries newer than `after_id`, in batches of `count`.
    ///
    /// Redis command: XRANGE <stream> (<after_id> + COUNT <n>
    pub async fn backfill(
        &self,
        run_id: &str,
        after_id: &str,
        count: usize,
    ) -> Result<Vec<(String, Value)>> {
        let key = self.key(run_id);
        let mut conn = self.conn.clone();
        let mut entries = Vec::new();
        let mut last = after_id.to_string();

        loop {
            // "(" makes the lower bound exclusive, so reads resume after `last`
            let reply: StreamRangeReply = conn
                .xrange_count(&key, format!("({last}"), "+", count)
                .await?;
            if reply.ids.is_empty() {
                break;
            }
            last = reply.ids.last().map(|e| e.id.clone()).unwrap_or(last);
            for entry in reply.ids {
                if let Some(payload) = super::decode_entry_payload(&entry.id, &entry.map) {
                    entries.push((entry.id, payload));
                }
            }
        }

        Ok(entries)
    }

    /// Blocks and yields new entries after `after_id`.
    ///
    /// Redis command: XREAD BLOCK <ms> STREAMS <stream> <last_id>
    pub fn tail(&self, run_id: &str, after_id: &str) -> ReceiverStream<(String, Value)> {
        let (tx, rx) = mpsc::channel(TAIL_CHANNEL_CAPACITY);
        let buffer = self.clone();
        let run_id = run_id.to_string();
        let mut last_id = after_id.to_string();

        tokio::spawn(async move {
            let key = buffer.key(&run_id);
            let block_ms = buffer.config.block_ms;

            loop {
                if tx.is_closed() {
                    debug!(stream = %key, "Tail consumer dropped, stopping");
                    break;
                }

                let read_opts = StreamReadOptions::default().block(block_ms as usize);
                let mut conn = buffer.conn.clone();
                let reply: redis::RedisResult<StreamReadReply> = conn
                    .xread_options(&[&key], &[last_id.as_str()], &read_opts)
                    .await;

                let reply = match reply {
                    Ok(reply) => reply,
                    Err(e) if e.to_string().contains("timeout") => continue,
                    Err(e) => {
                        error!(stream = %key, error = %e, "Error tailing stream");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };

                for stream_key in reply.keys {
                    for entry in stream_key.ids {
                        last_id = entry.id.clone();
                        if let Some(payload) = super::decode_entry_payload(&entry.id, &entry.map) {
                            if tx.send((entry.id, payload)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        ReceiverStream::new(rx)
    }

    // -------------------- management helpers --------------------

    /// Stream length. Redis command: XLEN <stream>
    pub async fn length(&self, run_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.xlen(self.key(run_id)).await?)
    }

    /// Last entry ID. Redis command: XREVRANGE <stream> + - COUNT 1
    pub async fn last_id(&self, run_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrevrange_count(self.key(run_id), "+", "-", 1).await?;
        Ok(reply.ids.first().map(|e| e.id.clone()))
    }

    /// Trims the stream. Redis command: XTRIM <stream> MAXLEN ~ <maxlen>
    pub async fn trim(&self, run_id: &str, maxlen: u64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let trimmed: u64 = redis::cmd("XTRIM")
            .arg(self.key(run_id))
            .arg("MAXLEN")
            .arg("~")
            .arg(maxlen)
            .query_async(&mut conn)
            .await?;
        Ok(trimmed)
    }

    /// Sets TTL on the stream. Redis command: EXPIRE <stream> <ttl>
    pub async fn expire(&self, run_id: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.expire(self.key(run_id), ttl_seconds as i64).await?)
    }

    /// Deletes the run stream. Redis command: DEL <stream>
    pub async fn delete(&self, run_id: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.del(self.key(run_id)).await?)
    }

    /// Reads a bounded range of entries. Redis command: XRANGE <stream> <start> <end> COUNT <n>
    pub async fn range(
        &self,
        run_id: &str,
        start: &str,
        end: &str,
        count: usize,
    ) -> Result<Vec<(String, Value)>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrange_count(self.key(run_id), start, end, count).await?;
        Ok(reply
            .ids
            .into_iter()
            .filter_map(|entry| {
                super::decode_entry_payload(&entry.id, &entry.map)
                    .map(|payload| (entry.id, payload))
            })
            .collect())
    }
}
