//! Integration Tests for the Gateway
//!
//! Uses wiremock for the agent runtime and attachment CDN. Cases that
//! need a live Redis are marked #[ignore]; run them with a local Redis:
//!     cargo test --test integration_tests -- --ignored

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use tokio_stream::StreamExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lingo_gateway::agent::{parse_chunk, AgentClient, AssistantId, ParsedChunk};
use lingo_gateway::collector::{collector_for, AGENT_TRANSLATION_A1};
use lingo_gateway::fetch::AttachmentFetcher;
use lingo_gateway::models::MessageFile;
use lingo_gateway::mq::{ConsumeOptions, MqConfig, ReadMode, RunBuffer, Rsmq, StreamStart};
use lingo_gateway::orchestrator::build_prompt;

// ============================================
// AGENT STREAM (wiremock)
// ============================================

/// SSE body of a run that greets, gets interrupted, then flushes one
/// trailing token.
fn hitl_run_body() -> String {
    concat!(
        "event: metadata\n",
        "data: {\"run_id\":\"run-1\",\"attempt\":1}\n\n",
        "event: tasks\n",
        "data: {\"id\":\"t-1\",\"name\":\"analyze_original_text\",\"input\":{\"messages\":[]},\"triggers\":[\"branch:to:analyze_original_text\"]}\n\n",
        "event: events\n",
        "data: {\"event\":\"on_chat_model_stream\",\"data\":{\"chunk\":{\"content\":\"Which \",\"type\":\"AIMessageChunk\",\"tool_call_chunks\":[]}}}\n\n",
        "event: updates\n",
        "data: {\"__interrupt__\":[{\"value\":{\"cause\":\"ASKU found\",\"msg\":\"Please specify target language\"},\"id\":\"i-1\"}]}\n\n",
        "event: events\n",
        "data: {\"event\":\"on_chat_model_end\",\"data\":{}}\n\n",
    )
    .to_string()
}

async fn mock_agent(run_body: String) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "thread_id": "thread-1" })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread-1/runs/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(run_body, "text/event-stream"))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn test_agent_run_streams_chunks_in_order() {
    let server = mock_agent(hitl_run_body()).await;
    let client = AgentClient::new(&server.uri(), 5).unwrap();

    let thread_id = client.create_thread().await.unwrap();
    assert_eq!(thread_id, "thread-1");

    let mut stream = client
        .run_new_task("user01", "task-1", &thread_id, AssistantId::TaskTranslation, "안녕?")
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(chunk) = stream.next().await {
        events.push(chunk.unwrap().event);
    }

    assert_eq!(events, vec!["metadata", "tasks", "events", "updates", "events"]);
}

#[tokio::test]
async fn test_agent_run_surfaces_interrupt_and_run_id() {
    let server = mock_agent(hitl_run_body()).await;
    let client = AgentClient::new(&server.uri(), 5).unwrap();

    let mut stream = client
        .run_new_task("user01", "task-1", "thread-1", AssistantId::TaskTranslation, "안녕?")
        .await
        .unwrap();

    let mut run_id = None;
    let mut interrupt_msg = None;
    let mut streamed_text = String::new();

    while let Some(chunk) = stream.next().await {
        let raw = chunk.unwrap();
        let Some(parsed) = parse_chunk(&raw) else {
            continue;
        };
        match &parsed {
            ParsedChunk::Metadata { run_id: id } => run_id = Some(id.clone()),
            ParsedChunk::Events {
                is_ai_message,
                chunk_data,
                ..
            } if *is_ai_message => {
                streamed_text.push_str(chunk_data.as_deref().unwrap_or_default());
            }
            _ => {}
        }
        if parsed.is_interrupted() {
            interrupt_msg = parsed.interrupt_msg().map(str::to_string);
        }
    }

    assert_eq!(run_id.as_deref(), Some("run-1"));
    assert_eq!(
        interrupt_msg.as_deref(),
        Some("Please specify target language")
    );
    assert_eq!(streamed_text, "Which ");
}

#[tokio::test]
async fn test_hitl_resume_request_reaches_the_same_thread() {
    let server = mock_agent(
        concat!(
            "event: metadata\n",
            "data: {\"run_id\":\"run-2\",\"attempt\":1}\n\n",
            "event: events\n",
            "data: {\"event\":\"on_chat_model_stream\",\"data\":{\"chunk\":{\"content\":\"Done.\",\"type\":\"AIMessageChunk\",\"tool_call_chunks\":[]}}}\n\n",
        )
        .to_string(),
    )
    .await;
    let client = AgentClient::new(&server.uri(), 5).unwrap();

    let mut stream = client
        .run_hitl_task(
            "user01",
            "task-1",
            "thread-1",
            AssistantId::TaskTranslation,
            "English, adult, web novel",
        )
        .await
        .unwrap();

    let mut chunks = 0;
    while let Some(chunk) = stream.next().await {
        chunk.unwrap();
        chunks += 1;
    }
    assert_eq!(chunks, 2);

    // Exactly one streaming request against the resumed thread
    let requests = server.received_requests().await.unwrap();
    let run_requests: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == "/threads/thread-1/runs/stream")
        .collect();
    assert_eq!(run_requests.len(), 1);

    let body: serde_json::Value = serde_json::from_slice(&run_requests[0].body).unwrap();
    assert!(body["input"].is_null());
    assert_eq!(body["command"]["resume"], "English, adult, web novel");
}

#[tokio::test]
async fn test_agent_http_errors_are_categorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = AgentClient::new(&server.uri(), 5).unwrap();
    let err = client.create_thread().await.unwrap_err();
    assert!(matches!(
        err,
        lingo_gateway::error::GatewayError::UpstreamHttp { status: 500, .. }
    ));
}

// ============================================
// TRANSLATION ARTIFACT (stream -> collector)
// ============================================

#[tokio::test]
async fn test_translation_stream_builds_segmented_artifact() {
    // Token-by-token AI output assembling metadata + marked body
    let tokens = [
        "{\\\"summary\\\":\\\"s\\\"}",
        "<translated_text>",
        "┼1┼Hello.",
        "┼2┼World.",
        "</translated_text>",
    ];
    let mut body = String::new();
    for token in tokens {
        body.push_str("event: events\n");
        body.push_str(&format!(
            "data: {{\"event\":\"on_chat_model_stream\",\"data\":{{\"chunk\":{{\"content\":\"{token}\",\"type\":\"AIMessageChunk\",\"tool_call_chunks\":[]}}}}}}\n\n"
        ));
    }

    let server = mock_agent(body).await;
    let client = AgentClient::new(&server.uri(), 5).unwrap();
    let mut collector = collector_for(AGENT_TRANSLATION_A1).unwrap();

    let mut stream = client
        .run_new_task("user01", "tr-1", "thread-1", AssistantId::TaskTranslation, "{}")
        .await
        .unwrap();

    while let Some(chunk) = stream.next().await {
        let raw = chunk.unwrap();
        if let Some(ParsedChunk::Events {
            is_ai_message: true,
            chunk_data: Some(text),
            ..
        }) = parse_chunk(&raw)
        {
            collector.append_ai_content(&text);
        }
    }

    let artifact = collector.format_result();
    assert_eq!(artifact["metadata"], json!({ "summary": "s" }));
    assert_eq!(
        artifact["segments"],
        json!([
            { "sid": 1, "text": "Hello." },
            { "sid": 2, "text": "World." },
        ])
    );
}

// ============================================
// ATTACHMENT INGESTION (wiremock)
// ============================================

#[tokio::test]
async fn test_txt_attachments_are_appended_to_the_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("CTX"))
        .mount(&server)
        .await;

    let fetcher = AttachmentFetcher::new(5).unwrap();
    let files = vec![
        MessageFile {
            url: format!("{}/files/a.txt", server.uri()),
            name: "a.txt".to_string(),
            mime_type: "text/plain".to_string(),
            extension: "txt".to_string(),
            size: 3,
        },
        MessageFile {
            url: format!("{}/files/b.png", server.uri()),
            name: "b.png".to_string(),
            mime_type: "image/png".to_string(),
            extension: "png".to_string(),
            size: 10,
        },
    ];

    let prompt = build_prompt(&fetcher, "original_prompt", &files).await;
    assert_eq!(prompt, "original_prompt\n\nCTX");

    // The png is never fetched
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/files/b.png"));
}

#[tokio::test]
async fn test_failed_attachment_fetch_keeps_the_run_alive() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/missing.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = AttachmentFetcher::new(5).unwrap();
    let files = vec![MessageFile {
        url: format!("{}/files/missing.txt", server.uri()),
        name: "missing.txt".to_string(),
        mime_type: "text/plain".to_string(),
        extension: "txt".to_string(),
        size: 1,
    }];

    let prompt = build_prompt(&fetcher, "original_prompt", &files).await;
    assert_eq!(prompt, "original_prompt");
}

// ============================================
// RSMQ INVARIANTS (requires Redis)
// ============================================

const REDIS_URL: &str = "redis://127.0.0.1:6379";

fn test_mq_config(suffix: &str) -> MqConfig {
    MqConfig {
        stream_prefix: format!("test:mq:{suffix}:"),
        block_ms: 500,
        ..MqConfig::default()
    }
}

#[tokio::test]
#[ignore = "requires Redis at 127.0.0.1:6379"]
async fn test_distinct_groups_each_replay_the_full_stream() {
    let rsmq = Rsmq::connect(REDIS_URL, test_mq_config("broadcast"))
        .await
        .unwrap();
    let channel = uuid::Uuid::now_v7().to_string();

    let mut sent = Vec::new();
    for i in 1..=3 {
        let id = rsmq
            .send(&channel, &json!({ "type": "message", "seq": i }))
            .await
            .unwrap();
        sent.push(id);
    }

    for consumer in ["s1", "s2"] {
        let opts = ConsumeOptions::new(format!("group-{consumer}"))
            .start(StreamStart::FromBeginning);
        let mut stream = rsmq.consume(&channel, consumer, opts);

        let mut received = Vec::new();
        while received.len() < 3 {
            let (entry_id, _) = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out waiting for entries")
                .expect("stream ended early")
                .expect("stream read failed");
            received.push(entry_id);
        }

        // Every subscriber with its own group observes the identical
        // sequence, in entry-id order
        assert_eq!(received, sent, "consumer {consumer} saw a different sequence");
    }

    rsmq.delete(&channel).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis at 127.0.0.1:6379"]
async fn test_same_group_partitions_entries() {
    let rsmq = Rsmq::connect(REDIS_URL, test_mq_config("partition"))
        .await
        .unwrap();
    let channel = uuid::Uuid::now_v7().to_string();

    let mut sent = HashSet::new();
    for i in 1..=10 {
        let id = rsmq
            .send(&channel, &json!({ "type": "message", "seq": i }))
            .await
            .unwrap();
        sent.insert(id);
    }

    let opts = ConsumeOptions::new("shared-group").start(StreamStart::FromBeginning);
    let mut a = rsmq.consume(&channel, "worker-a", opts.clone());
    let mut b = rsmq.consume(&channel, "worker-b", opts);

    let mut seen_a = HashSet::new();
    let mut seen_b = HashSet::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while seen_a.len() + seen_b.len() < 10 && tokio::time::Instant::now() < deadline {
        tokio::select! {
            next = a.next() => {
                if let Some(Ok((id, _))) = next {
                    seen_a.insert(id);
                }
            }
            next = b.next() => {
                if let Some(Ok((id, _))) = next {
                    seen_b.insert(id);
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    // Union covers everything, intersection is empty
    let union: HashSet<_> = seen_a.union(&seen_b).cloned().collect();
    assert_eq!(union, sent);
    assert!(seen_a.is_disjoint(&seen_b));

    rsmq.delete(&channel).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis at 127.0.0.1:6379"]
async fn test_ensure_group_is_idempotent() {
    let rsmq = Rsmq::connect(REDIS_URL, test_mq_config("idempotent"))
        .await
        .unwrap();
    let channel = uuid::Uuid::now_v7().to_string();

    for _ in 0..3 {
        rsmq.ensure_group(&channel, "group-x", StreamStart::FromBeginning)
            .await
            .unwrap();
    }

    let groups = rsmq.group_info(&channel).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["name"], "group-x");

    rsmq.delete(&channel).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis at 127.0.0.1:6379"]
async fn test_pending_first_subscription_then_follows_new_entries() {
    let rsmq = Rsmq::connect(REDIS_URL, test_mq_config("pending"))
        .await
        .unwrap();
    let channel = uuid::Uuid::now_v7().to_string();

    rsmq.send(&channel, &json!({ "type": "message", "seq": 1 }))
        .await
        .unwrap();
    rsmq.send(&channel, &json!({ "type": "message", "seq": 2 }))
        .await
        .unwrap();

    // Deliver both entries to the consumer without acking, so they sit in
    // its pending list
    rsmq.ensure_group(&channel, "group-p", StreamStart::FromBeginning)
        .await
        .unwrap();
    let client = redis::Client::open(REDIS_URL).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
        .arg("GROUP")
        .arg("group-p")
        .arg("worker-p")
        .arg("COUNT")
        .arg(10)
        .arg("STREAMS")
        .arg(rsmq.key(&channel))
        .arg(">")
        .query_async(&mut conn)
        .await
        .unwrap();

    let opts = ConsumeOptions::new("group-p")
        .start(StreamStart::FromBeginning)
        .mode(ReadMode::PendingEntries);
    let mut stream = rsmq.consume(&channel, "worker-p", opts);

    let mut seqs = Vec::new();
    for _ in 0..2 {
        let (_, payload) = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for pending entries")
            .expect("stream ended early")
            .expect("stream read failed");
        seqs.push(payload["seq"].as_i64().unwrap());
    }
    assert_eq!(seqs, vec![1, 2]);

    // Once the pending list is drained the subscription follows the live
    // stream
    rsmq.send(&channel, &json!({ "type": "message", "seq": 3 }))
        .await
        .unwrap();
    let (_, payload) = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for new entry")
        .expect("stream ended early")
        .expect("stream read failed");
    assert_eq!(payload["seq"], 3);

    rsmq.delete(&channel).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis at 127.0.0.1:6379"]
async fn test_run_buffer_backfill_and_finish() {
    let rsmq = Rsmq::connect(REDIS_URL, test_mq_config("rsbuf"))
        .await
        .unwrap();
    let buffer = RunBuffer::new(&rsmq);
    let run_id = uuid::Uuid::now_v7().to_string();

    buffer
        .append(
            &run_id,
            &json!({ "type": "model_stream_chunk", "payload": { "message": "Hello" } }),
        )
        .await
        .unwrap();
    buffer
        .append(
            &run_id,
            &json!({ "type": "model_stream_chunk", "payload": { "message": " world" } }),
        )
        .await
        .unwrap();
    buffer.finish(&run_id).await.unwrap();

    let entries = buffer.backfill(&run_id, "0-0", 100).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].1["payload"]["message"], "Hello");
    assert_eq!(entries[1].1["payload"]["message"], " world");
    assert_eq!(entries[2].1["type"], "done");

    // Resuming after the first entry skips what was already seen
    let resumed = buffer.backfill(&run_id, &entries[0].0, 100).await.unwrap();
    assert_eq!(resumed.len(), 2);

    buffer.delete(&run_id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis at 127.0.0.1:6379"]
async fn test_dropped_subscription_removes_its_consumer() {
    let rsmq = Rsmq::connect(REDIS_URL, test_mq_config("cleanup"))
        .await
        .unwrap();
    let channel = uuid::Uuid::now_v7().to_string();

    rsmq.send(&channel, &json!({ "type": "message" })).await.unwrap();

    let opts = ConsumeOptions::new("group-y").start(StreamStart::FromBeginning);
    let mut stream = rsmq.consume(&channel, "ephemeral", opts);
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.next()).await;

    // Dropping the stream stops the pump within one read cycle
    drop(stream);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let consumers = rsmq.consumers_info(&channel, "group-y").await;
    assert!(consumers.is_empty());

    rsmq.delete(&channel).await.unwrap();
}
