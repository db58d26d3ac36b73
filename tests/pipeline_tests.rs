//! End-to-end request pipeline behavior over a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::Notify;

use common::{harness, harness_with_prompt, request, text_source, RecordingPresenter, Reply};
use parley::assistant::{Assistant, ExecutionMode, Submission};
use parley::config::ParleyConfig;
use parley::context::RequestContext;
use parley::phase::Phase;
use parley::pipeline::{Destination, PromptRequest, RequestOutcome};
use parley::streaming::StreamEventKind;
use parley::types::{Message, Role};

fn bare(prompt: &str) -> PromptRequest {
    PromptRequest::builder()
        .prompt(prompt)
        .source(text_source(""))
        .build()
}

fn shape(messages: &[Message]) -> Vec<(Role, String)> {
    messages.iter().map(|m| (m.role, m.text())).collect()
}

async fn wait_for_phase(ctx: &RequestContext, phase: Phase) {
    let mut rx = ctx.phases().watch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.phase == phase))
        .await
        .expect("phase not reached")
        .unwrap();
}

#[tokio::test]
async fn messages_follow_system_thread_query_user_order() {
    let config = ParleyConfig::builder().thread_enabled(true).build();
    let h = harness_with_prompt(config, &["be brief"]);
    h.ctx.conversation().queue(Message::user("earlier context"));

    h.pipeline.run(bare("one")).await.unwrap();
    h.pipeline.run(bare("two")).await.unwrap();

    let requests = h.transport.requests();
    assert_eq!(
        shape(&requests[0].messages),
        vec![
            (Role::System, "be brief".to_string()),
            (Role::User, "earlier context".to_string()),
            (Role::User, "one".to_string()),
        ]
    );
    assert_eq!(
        shape(&requests[1].messages),
        vec![
            (Role::System, "be brief".to_string()),
            (Role::User, "one".to_string()),
            (Role::Assistant, "Mock response".to_string()),
            (Role::User, "earlier context".to_string()),
            (Role::User, "two".to_string()),
        ]
    );
    assert_eq!(h.ctx.conversation().thread.len(), 4);
    assert_eq!(h.ctx.conversation().last_response, "Mock response");
}

#[tokio::test]
async fn thread_is_untouched_when_thread_mode_is_off() {
    let h = harness(ParleyConfig::default());

    h.pipeline.run(bare("one")).await.unwrap();
    h.pipeline.run(bare("two")).await.unwrap();

    assert_eq!(
        shape(&h.transport.requests()[1].messages),
        vec![(Role::User, "two".to_string())]
    );
    assert!(h.ctx.conversation().thread.is_empty());
}

#[tokio::test]
async fn user_message_carries_prompt_and_both_sources() {
    let h = harness(ParleyConfig::default());
    let req = PromptRequest::builder()
        .prompt("Compare:")
        .source(text_source("left"))
        .additional_source(text_source("right"))
        .build();

    h.pipeline.run(req).await.unwrap();

    let user = h.transport.requests()[0].messages.last().cloned().unwrap();
    let parts: Vec<String> = user
        .content
        .iter()
        .map(|p| match p {
            parley::types::ContentPart::Text { text } => text.clone(),
            parley::types::ContentPart::Image(_) => String::new(),
        })
        .collect();
    assert_eq!(parts, vec!["Compare:", "left", "right"]);
}

#[tokio::test]
async fn atomic_mode_records_one_chunk() {
    let h = harness(ParleyConfig::builder().streaming(false).build());
    h.transport.push_text(&["whole ", "answer"]);

    let result = h.pipeline.run(request("go")).await.unwrap();
    assert_eq!(result.text(), "whole answer");

    let session = h.ctx.streaming().current().unwrap();
    assert_eq!(
        session.event_kinds(),
        vec![StreamEventKind::Chunk, StreamEventKind::Complete]
    );
    assert_eq!(h.ctx.phases().current().phase, Phase::Done);
}

#[tokio::test]
async fn background_run_is_presented_when_done() {
    let h = harness(ParleyConfig::default());
    h.transport.push_text(&["shown"]);
    let presenter = Arc::new(RecordingPresenter::default());

    let handle = h.pipeline.run_async(request("go")).unwrap();
    assert_eq!(handle.request_id(), Some("req-1"));
    h.ctx
        .dispatcher()
        .present_when_done(handle.clone(), presenter.clone())
        .await
        .unwrap();

    assert!(handle.is_done());
    assert_eq!(*presenter.shown.lock().unwrap(), vec!["shown".to_string()]);
    assert!(presenter.failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn handle_cancel_stops_a_hung_stream() {
    let h = harness(ParleyConfig::default());
    h.transport.push(Reply::Hang);

    let handle = h.pipeline.run_async(request("go")).unwrap();
    wait_for_phase(&h.ctx, Phase::Streaming).await;

    assert!(handle.cancel());
    assert!(handle.wait(Some(Duration::from_secs(5))).await);

    let result = handle.value().cloned().unwrap();
    assert_eq!(result.outcome, RequestOutcome::Cancelled);
    assert_eq!(result.text(), "");
    assert_eq!(h.ctx.phases().current().phase, Phase::Cancelled);

    let events = h.ctx.streaming().current().unwrap().events();
    let last = events.last().unwrap();
    assert_eq!(last.kind, StreamEventKind::CancelExecuted);
    assert_eq!(last.get_bool("emitted"), Some(true));
}

#[tokio::test]
async fn assistant_cancel_records_request_and_execution() {
    let h = harness(ParleyConfig::default());
    h.transport.push(Reply::Hang);
    let assistant = Assistant::new(h.pipeline.clone());

    assert!(!assistant.cancel("escape"));

    let Submission::Pending(handle) = assistant
        .submit(request("go"), "hotkey", ExecutionMode::Background)
        .await
        .unwrap()
    else {
        panic!("expected a background submission");
    };
    wait_for_phase(&h.ctx, Phase::Streaming).await;

    assert!(assistant.cancel("escape"));
    assert!(handle.wait(Some(Duration::from_secs(5))).await);

    let session = h.ctx.streaming().current().unwrap();
    let kinds = session.event_kinds();
    assert_eq!(
        kinds,
        vec![StreamEventKind::CancelRequested, StreamEventKind::CancelExecuted]
    );
    assert_eq!(session.events()[0].get_str("source"), Some("escape"));
    assert!(!h.ctx.phases().is_in_flight());
}

#[tokio::test]
async fn cancelled_worker_leaves_the_next_request_alone() {
    let h = harness(ParleyConfig::default());
    let release = Arc::new(Notify::new());
    h.transport.push(Reply::Hang);
    h.transport
        .push(Reply::WaitThen(release.clone(), vec!["second answer".into()]));
    let assistant = Assistant::new(h.pipeline.clone());

    let Submission::Pending(first) = assistant
        .submit(request("first"), "hotkey", ExecutionMode::Background)
        .await
        .unwrap()
    else {
        panic!("expected a background submission");
    };
    wait_for_phase(&h.ctx, Phase::Streaming).await;

    // The first worker has not observed the cancel yet when the next
    // request is admitted.
    assert!(assistant.cancel("escape"));
    let Submission::Pending(second) = assistant
        .submit(request("second"), "hotkey", ExecutionMode::Background)
        .await
        .unwrap()
    else {
        panic!("expected the second submission to be admitted");
    };

    assert!(first.wait(Some(Duration::from_secs(5))).await);
    assert_eq!(first.value().unwrap().outcome, RequestOutcome::Cancelled);

    let mut rx = h.ctx.phases().watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.phase == Phase::Streaming && s.request_id.as_deref() == Some("req-2")),
    )
    .await
    .expect("second request never streamed")
    .unwrap();

    let state = h.ctx.phases().current();
    assert_eq!(state.request_id.as_deref(), Some("req-2"));
    assert!(state.is_in_flight());
    assert!(!state.cancel_requested);
    assert!(!h.ctx.phases().is_cancel_requested());
    assert_eq!(h.ctx.streaming().snapshot().request_id, "req-2");

    release.notify_one();
    assert!(second.wait(Some(Duration::from_secs(5))).await);
    let result = second.value().unwrap();
    assert_eq!(result.outcome, RequestOutcome::Completed);
    assert_eq!(result.text(), "second answer");
    assert_eq!(h.ctx.phases().current().phase, Phase::Done);
    assert_eq!(h.ctx.streaming().snapshot().text, "second answer");
}

#[tokio::test]
async fn cancel_before_execution_skips_transport() {
    let h = harness(ParleyConfig::default());
    let rid = h.ctx.phases().emit_begin_send(None);
    h.ctx.phases().emit_cancel();

    let mut session = h
        .pipeline
        .session(Destination::Default)
        .with_request_id(rid.clone());
    session
        .prepare("go", text_source("x").as_ref(), None)
        .unwrap();
    let response = session.execute().await;

    assert_eq!(response.outcome, RequestOutcome::Cancelled);
    assert_eq!(response.request_id, rid);
    assert_eq!(h.transport.call_count(), 0);

    let events = h.ctx.streaming().current().unwrap().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, StreamEventKind::CancelExecuted);
    assert_eq!(events[0].get_bool("emitted"), Some(false));
}

#[tokio::test]
async fn stale_handle_cannot_cancel_a_newer_request() {
    let h = harness(ParleyConfig::default());
    let old = h.pipeline.run_async(request("old")).unwrap();
    assert!(old.wait(Some(Duration::from_secs(5))).await);

    let newer = h.ctx.phases().emit_begin_send(None);
    assert!(!old.cancel());

    let state = h.ctx.phases().current();
    assert_eq!(state.phase, Phase::Sending);
    assert_eq!(state.request_id, Some(newer));
    assert!(!h.ctx.phases().is_cancel_requested());
}

#[tokio::test(start_paused = true)]
async fn request_timeout_fails_the_request() {
    let config = ParleyConfig::builder()
        .streaming(false)
        .request_timeout_ms(1_000)
        .build();
    let h = harness(config);
    h.transport.push(Reply::Hang);

    let result = h.pipeline.run(request("go")).await.unwrap();
    assert_eq!(
        result.outcome,
        RequestOutcome::Failed {
            error: "Timeout after 1000ms".to_string()
        }
    );
    assert_eq!(h.ctx.phases().current().phase, Phase::Error);
}

#[tokio::test(start_paused = true)]
async fn idle_stream_times_out_after_last_chunk() {
    let config = ParleyConfig::builder().stream_idle_timeout_ms(500).build();
    let h = harness(config);
    h.transport.push(Reply::Hang);

    let result = h.pipeline.run(request("go")).await.unwrap();
    assert!(matches!(result.outcome, RequestOutcome::Failed { ref error } if error.contains("500ms")));

    let snapshot = h.ctx.streaming().snapshot();
    assert!(snapshot.errored);
    assert_eq!(h.ctx.phases().current().phase, Phase::Error);
}

#[tokio::test]
async fn result_presentation_uses_destination_rules() {
    let h = harness(ParleyConfig::default());
    let long = vec!["line"; 61].join("\n");
    h.transport.push(Reply::Chunks(vec![long.clone()]));

    let req = PromptRequest::builder()
        .prompt("go")
        .source(text_source("x"))
        .destination(Destination::Clipboard)
        .build();
    let result = h.pipeline.run(req).await.unwrap();

    assert_eq!(result.destination, Destination::Clipboard);
    let presentation = result.presentation_for(Destination::Paste);
    assert!(presentation.open_browser);
    assert_eq!(presentation.browser_lines.len(), 61);
    assert_eq!(presentation.paste_text, long);
}

#[tokio::test]
async fn unset_destination_uses_configured_default() {
    let config = ParleyConfig::builder()
        .default_destination(Destination::Browser)
        .build();
    let h = harness(config);

    let defaulted = h.pipeline.run(request("go")).await.unwrap();
    assert_eq!(defaulted.destination, Destination::Browser);

    let explicit = PromptRequest::builder()
        .prompt("go")
        .source(text_source("x"))
        .destination(Destination::Paste)
        .build();
    let chosen = h.pipeline.run(explicit).await.unwrap();
    assert_eq!(chosen.destination, Destination::Paste);
}
