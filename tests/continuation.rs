//! Truncation continuation through the public facade, in both regimes.

mod common;

use async_trait::async_trait;
use common::{chunk, client, reply, ScriptedExecutor, Step};
use futures::StreamExt;
use qianfan_chat::client::{AlternateBackend, AlternateCall};
use qianfan_chat::{
    BlockingReply, ChatCompletion, CompletionRequest, Config, Error, Message, MessageRole,
    Messages, Reply, Response, Result,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn conversation() -> Messages {
    Messages::from(vec![
        Message::system("你是一个写作助手"),
        Message::user("写一篇长文"),
    ])
}

#[tokio::test]
async fn complete_reply_is_returned_unchanged() {
    let exec = ScriptedExecutor::new(vec![Step::Single(reply("hello", false))]);
    let chat = client(exec.clone());

    let resp = chat
        .complete(CompletionRequest::new(conversation()).auto_concat_truncate(true))
        .await
        .unwrap()
        .into_response()
        .unwrap();

    assert_eq!(resp.result, "hello");
    assert!(!resp.is_truncated);
    assert_eq!(resp.get("id"), Some(&json!("as-test")));
    assert_eq!(exec.calls(), 1);
}

#[tokio::test]
async fn truncated_reply_is_concatenated() {
    let exec = ScriptedExecutor::new(vec![
        Step::Single(reply("ab", true)),
        Step::Single(reply("cd", false)),
    ]);
    let chat = client(exec.clone());

    let resp = chat
        .complete(CompletionRequest::new(conversation()).auto_concat_truncate(true))
        .await
        .unwrap()
        .into_response()
        .unwrap();

    assert_eq!(resp.result, "abcd");
    assert_eq!(resp.get("result"), Some(&json!("abcd")));
    assert!(!resp.is_truncated);

    let requests = exec.requests();
    assert_eq!(requests.len(), 2);
    let follow_up = requests[1].messages.as_slice();
    assert_eq!(follow_up.len(), 4);
    assert_eq!(follow_up[2], Message::assistant("ab"));
    assert_eq!(follow_up[3], Message::user("继续"));
    assert!(!requests[1].stream);
}

#[tokio::test]
async fn follow_up_reuses_the_original_call_settings() {
    let exec = ScriptedExecutor::new(vec![
        Step::Single(reply("ab", true)),
        Step::Single(reply("cd", false)),
    ]);
    let chat = client(exec.clone());

    chat.complete(
        CompletionRequest::new(conversation())
            .model("ERNIE-Bot")
            .endpoint("my_service")
            .retry_count(3)
            .request_timeout(Duration::from_secs(5))
            .backoff_factor(0.5)
            .temperature(0.7)
            .auto_concat_truncate(true),
    )
    .await
    .unwrap();

    let requests = exec.requests();
    assert_eq!(requests.len(), 2);
    let (first, follow_up) = (&requests[0], &requests[1]);
    assert_eq!(follow_up.model.as_deref(), Some("ERNIE-Bot"));
    assert_eq!(follow_up.endpoint.as_deref(), Some("my_service"));
    assert_eq!(follow_up.model, first.model);
    assert_eq!(follow_up.endpoint, first.endpoint);
    assert_eq!(follow_up.options, first.options);
    assert_eq!(follow_up.options.retry_count, 3);
    assert_eq!(follow_up.options.request_timeout, Duration::from_secs(5));
    assert_eq!(follow_up.params, first.params);
    assert_eq!(follow_up.params.get("temperature"), Some(&json!(0.7)));
}

#[tokio::test]
async fn each_round_extends_the_conversation_by_two() {
    let exec = ScriptedExecutor::new(vec![
        Step::Single(reply("one ", true)),
        Step::Single(reply("two ", true)),
        Step::Single(reply("three", false)),
    ]);
    let chat = client(exec.clone());

    let resp = chat
        .complete(CompletionRequest::new(conversation()).auto_concat_truncate(true))
        .await
        .unwrap()
        .into_response()
        .unwrap();
    assert_eq!(resp.result, "one two three");

    let lens: Vec<usize> = exec.requests().iter().map(|r| r.messages.len()).collect();
    assert_eq!(lens, vec![2, 4, 6]);

    let last = exec.requests()[2].messages.clone();
    let roles: Vec<MessageRole> = last.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
        ]
    );
    assert_eq!(last.as_slice()[4].content, "two ");
}

#[tokio::test]
async fn caller_buffer_is_not_mutated() {
    let exec = ScriptedExecutor::new(vec![
        Step::Single(reply("ab", true)),
        Step::Single(reply("cd", false)),
    ]);
    let chat = client(exec.clone());
    let messages = conversation();

    chat.complete(CompletionRequest::new(&messages).auto_concat_truncate(true))
        .await
        .unwrap();

    assert_eq!(messages, conversation());
}

#[tokio::test]
async fn truncation_is_reported_when_concatenation_is_off() {
    let exec = ScriptedExecutor::new(vec![Step::Single(reply("ab", true))]);
    let chat = client(exec.clone());

    let resp = chat
        .complete(CompletionRequest::new(conversation()))
        .await
        .unwrap()
        .into_response()
        .unwrap();

    assert_eq!(resp.result, "ab");
    assert!(resp.is_truncated);
    assert_eq!(exec.calls(), 1);
}

#[tokio::test]
async fn stream_replays_every_chunk_of_every_call() {
    let exec = ScriptedExecutor::new(vec![
        Step::Stream(vec![chunk("a", false, false), chunk("b", true, true)]),
        Step::Stream(vec![chunk("c", false, false), chunk("d", false, true)]),
    ]);
    let chat = client(exec.clone());

    let stream = chat
        .complete(
            CompletionRequest::new(conversation())
                .stream()
                .auto_concat_truncate(true),
        )
        .await
        .unwrap()
        .into_stream()
        .unwrap();
    let chunks: Vec<Response> = stream.map(|r| r.unwrap()).collect().await;

    let texts: Vec<&str> = chunks.iter().map(|r| r.result.as_str()).collect();
    assert_eq!(texts, vec!["a", "b", "c", "d"]);
    assert!(chunks[1].is_truncated);
    assert!(!chunks[3].is_truncated);
    // is_end comes through as each call reported it
    assert!(chunks[1].is_end);

    let requests = exec.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].stream);
    assert_eq!(requests[1].messages.as_slice()[2], Message::assistant("ab"));
}

#[tokio::test]
async fn complete_stream_is_not_continued() {
    let exec = ScriptedExecutor::new(vec![Step::Stream(vec![
        chunk("a", false, false),
        chunk("b", false, false),
        chunk("c", false, true),
    ])]);
    let chat = client(exec.clone());

    let chunks: Vec<Response> = chat
        .complete(
            CompletionRequest::new(conversation())
                .stream()
                .auto_concat_truncate(true),
        )
        .await
        .unwrap()
        .into_stream()
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;

    let texts: Vec<&str> = chunks.iter().map(|r| r.result.as_str()).collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
    assert_eq!(exec.calls(), 1);
}

#[tokio::test]
async fn stream_round_cap_stops_endless_truncation() {
    let exec = ScriptedExecutor::new(vec![
        Step::Stream(vec![chunk("a", true, true)]),
        Step::Stream(vec![chunk("b", true, true)]),
    ]);
    let chat = client(exec.clone());

    let items: Vec<Result<Response>> = chat
        .complete(
            CompletionRequest::new(conversation())
                .stream()
                .auto_concat_truncate(true)
                .max_continuation_rounds(1),
        )
        .await
        .unwrap()
        .into_stream()
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap().result, "a");
    assert_eq!(items[1].as_ref().unwrap().result, "b");
    assert!(matches!(
        items[2],
        Err(Error::ContinuationLimitExceeded { rounds: 1 })
    ));
    assert_eq!(exec.calls(), 2);
}

#[tokio::test]
async fn stream_error_ends_the_sequence() {
    let exec = ScriptedExecutor::new(vec![
        Step::Stream(vec![chunk("a", true, true)]),
        Step::BrokenStream(
            vec![chunk("b", false, false)],
            Error::Api {
                code: 336100,
                message: "internal error".into(),
            },
        ),
    ]);
    let chat = client(exec.clone());

    let items: Vec<Result<Response>> = chat
        .complete(
            CompletionRequest::new(conversation())
                .stream()
                .auto_concat_truncate(true),
        )
        .await
        .unwrap()
        .into_stream()
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 3);
    assert!(items[0].is_ok() && items[1].is_ok());
    assert!(matches!(items[2], Err(Error::Api { code: 336100, .. })));
}

#[tokio::test]
async fn failed_continuation_aborts_the_reply() {
    let exec = ScriptedExecutor::new(vec![
        Step::Single(reply("ab", true)),
        Step::Fail(Error::Api {
            code: 18,
            message: "Open api qps request limit reached".into(),
        }),
    ]);
    let chat = client(exec);

    let err = chat
        .complete(CompletionRequest::new(conversation()).auto_concat_truncate(true))
        .await
        .unwrap_err();
    assert_eq!(err.api_code(), Some(18));
}

#[tokio::test]
async fn round_cap_stops_endless_truncation() {
    let exec = ScriptedExecutor::new(vec![
        Step::Single(reply("a", true)),
        Step::Single(reply("b", true)),
        Step::Single(reply("c", true)),
    ]);
    let chat = client(exec.clone());

    let err = chat
        .complete(
            CompletionRequest::new(conversation())
                .auto_concat_truncate(true)
                .max_continuation_rounds(2),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ContinuationLimitExceeded { rounds: 2 }));
    assert_eq!(exec.calls(), 3);
}

#[tokio::test]
async fn mismatched_reply_shape_is_a_contract_violation() {
    let exec = ScriptedExecutor::new(vec![Step::Stream(vec![chunk("a", true, true)])]);
    let chat = client(exec);

    let err = chat
        .complete(CompletionRequest::new(conversation()).auto_concat_truncate(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContractViolation { .. }));
}

#[tokio::test]
async fn raw_records_are_validated_before_any_call() {
    let exec = ScriptedExecutor::new(vec![]);
    let chat = client(exec.clone());
    let records: Vec<Value> = vec![
        json!({"role": "user", "content": "hi"}),
        json!({"role": "user"}),
    ];

    let err = chat.complete(CompletionRequest::new(records)).await.unwrap_err();

    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(exec.calls(), 0);
}

#[tokio::test]
async fn raw_records_are_sent_as_messages() {
    let exec = ScriptedExecutor::new(vec![Step::Single(reply("ok", false))]);
    let chat = client(exec.clone());
    let records: Vec<Value> = vec![json!({"role": "user", "content": "hi"})];

    chat.complete(CompletionRequest::new(records).temperature(0.5))
        .await
        .unwrap();

    let body = exec.requests()[0].body();
    assert_eq!(body["messages"], json!([{"role": "user", "content": "hi"}]));
    assert_eq!(body["temperature"], json!(0.5));
    assert_eq!(body["stream"], json!(false));
}

#[test]
fn blocking_reply_is_concatenated() {
    let exec = ScriptedExecutor::new(vec![
        Step::Single(reply("ab", true)),
        Step::Single(reply("cd", false)),
    ]);
    let chat = client(exec.clone());
    let messages = conversation();

    let resp = chat
        .complete_blocking(CompletionRequest::new(&messages).auto_concat_truncate(true))
        .unwrap()
        .into_response()
        .unwrap();

    assert_eq!(resp.result, "abcd");
    assert_eq!(exec.requests()[1].messages.len(), 4);
    assert_eq!(messages.len(), 2);
}

#[test]
fn blocking_stream_replays_every_chunk() {
    let exec = ScriptedExecutor::new(vec![
        Step::Stream(vec![chunk("a", false, false), chunk("b", true, true)]),
        Step::Stream(vec![chunk("c", false, false), chunk("d", false, true)]),
    ]);
    let chat = client(exec.clone());

    let reply = chat
        .complete_blocking(
            CompletionRequest::new(conversation())
                .stream()
                .auto_concat_truncate(true),
        )
        .unwrap();
    assert!(reply.is_stream());

    let chunks: Vec<Response> = reply.into_stream().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(chunks.len(), 4);
    assert_eq!(
        chunks.iter().map(|r| r.result.as_str()).collect::<String>(),
        "abcd"
    );
    assert!(!chunks[3].is_truncated);
    assert_eq!(exec.calls(), 2);
}

#[test]
fn blocking_round_cap() {
    let exec = ScriptedExecutor::new(vec![
        Step::Stream(vec![chunk("a", true, true)]),
        Step::Stream(vec![chunk("b", true, true)]),
    ]);
    let chat = client(exec);

    let items: Vec<Result<Response>> = chat
        .complete_blocking(
            CompletionRequest::new(conversation())
                .stream()
                .auto_concat_truncate(true)
                .max_continuation_rounds(1),
        )
        .unwrap()
        .into_stream()
        .unwrap()
        .collect();

    assert_eq!(items.len(), 3);
    assert!(matches!(
        items[2],
        Err(Error::ContinuationLimitExceeded { rounds: 1 })
    ));
}

/// Alternate backend that records its calls and answers with a truncated reply.
#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<AlternateCall>>,
}

impl RecordingBackend {
    fn answer(&self, call: AlternateCall) -> Response {
        self.calls.lock().unwrap().push(call);
        Response::from_value(reply("from alternate", true)).unwrap()
    }
}

#[async_trait]
impl AlternateBackend for RecordingBackend {
    async fn create(&self, call: AlternateCall) -> Result<Reply> {
        Ok(Reply::Single(self.answer(call)))
    }

    fn create_blocking(&self, call: AlternateCall) -> Result<BlockingReply> {
        Ok(BlockingReply::Single(self.answer(call)))
    }
}

fn client_with_alternate(
    exec: Arc<ScriptedExecutor>,
    backend: Arc<RecordingBackend>,
    disabled: bool,
) -> ChatCompletion {
    let config = Config {
        disable_alternate_backend: disabled,
        ..Config::default()
    };
    ChatCompletion::builder()
        .config(config)
        .access_token("token-123")
        .executor(exec)
        .alternate_backend(backend)
        .build()
        .unwrap()
}

#[tokio::test]
async fn compatible_model_goes_to_alternate_backend() {
    let exec = ScriptedExecutor::new(vec![]);
    let backend = Arc::new(RecordingBackend::default());
    let chat = client_with_alternate(exec.clone(), backend.clone(), false);

    let resp = chat
        .complete(
            CompletionRequest::new(conversation())
                .model("ERNIE-Bot")
                .auto_concat_truncate(true)
                .top_p(0.8),
        )
        .await
        .unwrap()
        .into_response()
        .unwrap();

    // returned as-is, no continuation
    assert!(resp.is_truncated);
    assert_eq!(exec.calls(), 0);

    let calls = backend.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].model, "ernie-bot-3.5");
    assert_eq!(calls[0].credentials.access_token.as_deref(), Some("token-123"));
    assert_eq!(calls[0].params["top_p"], json!(0.8));
    assert_eq!(calls[0].params["messages"].as_array().map(Vec::len), Some(2));
}

#[test]
fn blocking_alternate_lowercases_model() {
    let exec = ScriptedExecutor::new(vec![]);
    let backend = Arc::new(RecordingBackend::default());
    let chat = client_with_alternate(exec, backend.clone(), false);

    chat.complete_blocking(CompletionRequest::new(conversation()).model("ERNIE-Bot-turbo"))
        .unwrap();

    assert_eq!(backend.calls.lock().unwrap()[0].model, "ernie-bot-turbo");
}

#[tokio::test]
async fn other_models_and_disabled_config_stay_native() {
    let backend = Arc::new(RecordingBackend::default());

    let exec = ScriptedExecutor::new(vec![Step::Single(reply("native", false))]);
    let chat = client_with_alternate(exec.clone(), backend.clone(), false);
    chat.complete(CompletionRequest::new(conversation()).model("Llama-2-7b-chat"))
        .await
        .unwrap();
    assert_eq!(exec.calls(), 1);

    let exec = ScriptedExecutor::new(vec![Step::Single(reply("native", false))]);
    let chat = client_with_alternate(exec.clone(), backend.clone(), true);
    chat.complete(CompletionRequest::new(conversation()).model("ERNIE-Bot"))
        .await
        .unwrap();
    assert_eq!(exec.calls(), 1);

    assert!(backend.calls.lock().unwrap().is_empty());
}
