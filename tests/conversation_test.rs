mod helpers;

use helpers::test_env;
use mnemo::store::ObjectStore;
use serde_json::{json, Value};

fn session_payload(messages: Vec<Value>) -> Value {
    json!({
        "sessionId": "sess-1",
        "project": "acme",
        "createdAt": "2026-08-01T09:00:00Z",
        "messages": messages,
    })
}

fn four_messages() -> Vec<Value> {
    vec![
        json!({"role": "user", "content": "How do I paginate the API?"}),
        json!({"role": "assistant", "content": "Use the cursor parameter."}),
        json!({"role": "user", "content": "And what about rate limits?"}),
        json!({"role": "assistant", "content": "100 requests per minute."}),
    ]
}

#[tokio::test]
async fn incremental_indexing_add_unchanged_update() {
    let env = test_env();

    // First pass: one new session, two exchanges
    let first = env
        .context
        .dispatch(
            "index_conversations",
            json!({ "sessions": [session_payload(four_messages())] }),
        )
        .await
        .unwrap();
    assert_eq!(first.value, json!({"added": 1, "updated": 0, "unchanged": 0}));

    let stats = env
        .context
        .dispatch("conversation_stats", json!({}))
        .await
        .unwrap();
    assert_eq!(stats.value["indexed_exchanges"], json!(2));
    assert_eq!(stats.value["sessions"], json!(1));

    // Identical payload: unchanged
    let second = env
        .context
        .dispatch(
            "index_conversations",
            json!({ "sessions": [session_payload(four_messages())] }),
        )
        .await
        .unwrap();
    assert_eq!(second.value, json!({"added": 0, "updated": 0, "unchanged": 1}));

    // Two more messages: updated, three exchanges
    let mut extended = four_messages();
    extended.push(json!({"role": "user", "content": "Is there a retry header?"}));
    extended.push(json!({"role": "assistant", "content": "Yes, Retry-After."}));
    let third = env
        .context
        .dispatch(
            "index_conversations",
            json!({ "sessions": [session_payload(extended)] }),
        )
        .await
        .unwrap();
    assert_eq!(third.value, json!({"added": 0, "updated": 1, "unchanged": 0}));

    let stats = env
        .context
        .dispatch("conversation_stats", json!({}))
        .await
        .unwrap();
    assert_eq!(stats.value["indexed_exchanges"], json!(3));
    assert_eq!(stats.value["sessions"], json!(1));
}

#[tokio::test]
async fn identical_reindex_leaves_index_blob_byte_equal() {
    let env = test_env();
    let payload = json!({ "sessions": [session_payload(four_messages())] });

    env.context
        .dispatch("index_conversations", payload.clone())
        .await
        .unwrap();
    let before = env
        .store
        .read("conversations/index.json")
        .await
        .unwrap()
        .unwrap()
        .content;

    let report = env
        .context
        .dispatch("index_conversations", payload)
        .await
        .unwrap();
    assert_eq!(report.value["unchanged"], json!(1));

    let after = env
        .store
        .read("conversations/index.json")
        .await
        .unwrap()
        .unwrap()
        .content;
    assert_eq!(before, after);
}

#[tokio::test]
async fn indexed_exchanges_are_searchable() {
    let env = test_env();
    env.context
        .dispatch(
            "index_conversations",
            json!({ "sessions": [session_payload(four_messages())] }),
        )
        .await
        .unwrap();

    // The embedded text layout is "[project] prompt\n\nResponse: answer"
    let hits = env
        .context
        .dispatch(
            "search_conversations",
            json!({
                "query": "[acme] How do I paginate the API?\n\nResponse: Use the cursor parameter.",
                "limit": 1
            }),
        )
        .await
        .unwrap();
    let results = hits.value["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0]["id"],
        json!("conversations/exchanges/sess-1-0.txt")
    );
    assert!(results[0]["text"]
        .as_str()
        .unwrap()
        .contains("Use the cursor parameter."));
}

#[tokio::test]
async fn expand_returns_window_around_exchange() {
    let env = test_env();
    // Eight messages: four exchanges at indexes 0, 2, 4, 6
    let messages: Vec<Value> = (0..4)
        .flat_map(|i| {
            vec![
                json!({"role": "user", "content": format!("Question number {i}?")}),
                json!({"role": "assistant", "content": format!("Answer number {i}.")}),
            ]
        })
        .collect();
    env.context
        .dispatch(
            "index_conversations",
            json!({ "sessions": [session_payload(messages)] }),
        )
        .await
        .unwrap();

    // All exchanges without a target
    let all = env
        .context
        .dispatch("expand_conversation", json!({"sessionId": "sess-1"}))
        .await
        .unwrap();
    assert_eq!(all.value["exchanges"].as_array().unwrap().len(), 4);

    // ±2 window around the last exchange: clipped to the three at the end
    let windowed = env
        .context
        .dispatch(
            "expand_conversation",
            json!({"sessionId": "sess-1", "exchangeId": "sess-1-6"}),
        )
        .await
        .unwrap();
    let ids: Vec<&str> = windowed.value["exchanges"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["sess-1-2", "sess-1-4", "sess-1-6"]);
}

#[tokio::test]
async fn expand_unknown_session_is_an_error() {
    let env = test_env();
    let outcome = env
        .context
        .dispatch("expand_conversation", json!({"sessionId": "nope"}))
        .await
        .unwrap();
    assert!(outcome.is_error);
}

#[tokio::test]
async fn reindex_replaces_stale_exchanges() {
    let env = test_env();
    env.context
        .dispatch(
            "index_conversations",
            json!({ "sessions": [session_payload(four_messages())] }),
        )
        .await
        .unwrap();

    // Rewrite history: different content at the same indexes
    let rewritten = vec![
        json!({"role": "user", "content": "Completely different question?"}),
        json!({"role": "assistant", "content": "Completely different answer."}),
    ];
    env.context
        .dispatch(
            "index_conversations",
            json!({ "sessions": [session_payload(rewritten)] }),
        )
        .await
        .unwrap();

    let stats = env
        .context
        .dispatch("conversation_stats", json!({}))
        .await
        .unwrap();
    assert_eq!(stats.value["indexed_exchanges"], json!(1));

    // The old second exchange is no longer stored
    assert!(env
        .store
        .read("conversations/exchanges/sess-1-2.txt")
        .await
        .unwrap()
        .is_none());
}
