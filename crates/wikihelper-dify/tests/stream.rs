use bytes::Bytes;
use futures::{StreamExt, stream};
use wikihelper_dify::error::DifyError;
use wikihelper_dify::stream::{
    AnswerAssembler, EventKind, Frame, StreamEvent, decode_events, parse_line,
};

/// Feed `chunks` through the decoder as if they were network reads.
async fn collect(chunks: &[&str]) -> Vec<Result<StreamEvent, DifyError>> {
    let body = stream::iter(
        chunks
            .iter()
            .map(|c| Ok::<_, std::io::Error>(Bytes::from(c.to_string())))
            .collect::<Vec<_>>(),
    );
    decode_events(body).collect().await
}

#[test]
fn parse_line_classifies_frames() {
    assert_eq!(parse_line("").unwrap(), Frame::Heartbeat);
    assert_eq!(parse_line("   \r").unwrap(), Frame::Heartbeat);
    assert_eq!(parse_line("data: ").unwrap(), Frame::Heartbeat);
    assert_eq!(parse_line("data: [DONE]").unwrap(), Frame::Done);
    assert_eq!(parse_line("data:[DONE]\r").unwrap(), Frame::Done);
    assert_eq!(parse_line("event: ping").unwrap(), Frame::Ignored);
    assert_eq!(parse_line(": keep-alive").unwrap(), Frame::Ignored);

    assert!(matches!(
        parse_line("data: {not json"),
        Err(DifyError::StreamParse(_))
    ));
    assert!(matches!(
        parse_line("data: [1, 2]"),
        Err(DifyError::StreamParse(_))
    ));
}

#[test]
fn answer_falls_back_to_delta_then_content() {
    let event = StreamEvent::from_json(r#"{"event":"message_delta","delta":"a"}"#).unwrap();
    assert_eq!(event.kind, EventKind::MessageDelta);
    assert_eq!(event.answer.as_deref(), Some("a"));

    let event = StreamEvent::from_json(r#"{"event":"message","content":"b"}"#).unwrap();
    assert_eq!(event.answer.as_deref(), Some("b"));

    let event =
        StreamEvent::from_json(r#"{"event":"message","answer":"c","delta":"ignored"}"#).unwrap();
    assert_eq!(event.answer.as_deref(), Some("c"));

    let event = StreamEvent::from_json(r#"{"event":"workflow_started"}"#).unwrap();
    assert_eq!(event.kind, EventKind::Other("workflow_started".to_string()));
    assert_eq!(event.answer, None);
}

#[test]
fn empty_ids_are_absent() {
    let event = StreamEvent::from_json(
        r#"{"event":"message","answer":"x","conversation_id":"","message_id":"m1"}"#,
    )
    .unwrap();
    assert_eq!(event.conversation_id, None);
    assert_eq!(event.message_id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn assembles_answer_across_split_chunks() {
    let events = collect(&[
        "data: {\"event\": \"message\", \"answer\": \"Hel\", \"conver",
        "sation_id\": \"c-1\", \"message_id\": \"m-1\"}\n\n",
        "data: {\"event\": \"message\", \"answer\": \"lo, \"}\n\ndata: {\"event\": \"mess",
        "age\", \"answer\": \"世界\"}\n\n",
        "data: {\"event\": \"message_end\", \"conversation_id\": \"c-1\", \"message_id\": \"m-1\", ",
        "\"metadata\": {\"usage\": {\"prompt_tokens\": 10, \"completion_tokens\": 5, \"total_tokens\": 15}, ",
        "\"retriever_resources\": [{\"dataset_id\": \"d1\", \"dataset_name\": \"Wiki\", ",
        "\"document_name\": \"Onboarding\", \"segment_id\": \"s1\", \"score\": 0.87, ",
        "\"content\": \"Day one checklist\", \"position\": 1}]}}\n\n",
    ])
    .await;

    let mut assembler = AnswerAssembler::new();
    let mut chunks = Vec::new();
    for event in &events {
        let event = event.as_ref().expect("no stream errors");
        if let Some(chunk) = assembler.apply(event) {
            chunks.push(chunk);
        }
    }

    assert_eq!(chunks, vec!["Hel", "lo, ", "世界"]);
    assert!(assembler.is_finished());

    let answer = assembler.into_answer();
    assert_eq!(answer.text, "Hello, 世界");
    assert_eq!(answer.conversation_id.as_deref(), Some("c-1"));
    assert_eq!(answer.message_id.as_deref(), Some("m-1"));
    assert_eq!(answer.usage.map(|u| u.total()), Some(15));
    assert_eq!(answer.references.len(), 1);
    assert_eq!(answer.references[0].label(), "Onboarding: Day one checklist");
    assert_eq!(answer.references[0].score, Some(0.87));
}

#[tokio::test]
async fn stream_stops_after_message_end() {
    let events = collect(&[
        "data: {\"event\": \"message\", \"answer\": \"a\"}\n",
        "data: {\"event\": \"message_end\"}\n",
        "data: {\"event\": \"message\", \"answer\": \"late\"}\n",
    ])
    .await;

    let kinds: Vec<_> = events
        .into_iter()
        .map(|e| e.expect("no stream errors").kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::Message, EventKind::MessageEnd]);
}

#[tokio::test]
async fn agent_message_end_also_terminates() {
    let events = collect(&[
        "data: {\"event\": \"agent_message\", \"answer\": \"a\"}\n",
        "data: {\"event\": \"agent_message_end\"}\n",
        "data: {\"event\": \"agent_message\", \"answer\": \"late\"}\n",
    ])
    .await;
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn done_sentinel_ends_stream_without_event() {
    let events = collect(&[
        ": comment\n",
        "event: message\n",
        "data: {\"event\": \"message\", \"answer\": \"a\"}\n\n",
        "data: [DONE]\n\n",
        "data: {\"event\": \"message\", \"answer\": \"b\"}\n\n",
    ])
    .await;

    assert_eq!(events.len(), 1);
    let event = events[0].as_ref().unwrap();
    assert_eq!(event.answer.as_deref(), Some("a"));
}

#[tokio::test]
async fn trailing_line_without_newline_is_decoded() {
    let events = collect(&["data: {\"event\": \"message\", \"answer\": \"tail\"}"]).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].as_ref().unwrap().answer.as_deref(), Some("tail"));
}

#[tokio::test]
async fn error_event_becomes_api_error() {
    let events = collect(&[
        "data: {\"event\": \"message\", \"answer\": \"par\"}\n\n",
        "data: {\"event\": \"error\", \"status\": 400, \"code\": \"provider_quota_exceeded\", \"message\": \"quota exceeded\"}\n\n",
        "data: {\"event\": \"message\", \"answer\": \"never\"}\n\n",
    ])
    .await;

    assert_eq!(events.len(), 2);
    match &events[1] {
        Err(DifyError::Api {
            status,
            code,
            message,
        }) => {
            assert_eq!(*status, Some(400));
            assert_eq!(code, "provider_quota_exceeded");
            assert_eq!(message, "quota exceeded");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_record_ends_stream_with_parse_error() {
    let events = collect(&[
        "data: {\"event\": \"message\", \"answer\": \"ok\"}\n",
        "data: {\"event\": \"message\", \"answer\": \n",
        "data: {\"event\": \"message\", \"answer\": \"never\"}\n",
    ])
    .await;

    assert_eq!(events.len(), 2);
    assert!(events[0].is_ok());
    assert!(matches!(events[1], Err(DifyError::StreamParse(_))));
}

#[tokio::test]
async fn transport_error_is_reported() {
    let body = stream::iter(vec![
        Ok(Bytes::from_static(b"data: {\"event\": \"message\", \"answer\": \"a\"}\n")),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        )),
        Ok(Bytes::from_static(b"data: {\"event\": \"message\", \"answer\": \"b\"}\n")),
    ]);

    let events: Vec<_> = decode_events(body).collect().await;
    assert_eq!(events.len(), 2);
    match &events[1] {
        Err(DifyError::Transport(msg)) => assert!(msg.contains("connection reset")),
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_body_yields_nothing() {
    let events = collect(&[]).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn null_metadata_fields_keep_usage_and_references() {
    let events = collect(&[
        "data: {\"event\": \"message\", \"answer\": \"ok\"}\n\n",
        "data: {\"event\": \"message_end\", \"metadata\": {\"usage\": {\"total_tokens\": 3}, ",
        "\"retriever_resources\": [{\"dataset_name\": null, \"document_name\": \"Handbook\", ",
        "\"segment_id\": null, \"content\": \"Leave policy\"}]}}\n\n",
    ])
    .await;

    let mut assembler = AnswerAssembler::new();
    for event in &events {
        assembler.apply(event.as_ref().expect("no stream errors"));
    }
    assert!(assembler.is_finished());
    assert_eq!(assembler.usage().map(|u| u.total()), Some(3));
    assert_eq!(assembler.references().len(), 1);
    assert_eq!(assembler.references()[0].label(), "Handbook: Leave policy");
}

#[tokio::test]
async fn null_resource_list_keeps_usage() {
    let events = collect(&[
        "data: {\"event\": \"message_end\", \"metadata\": {\"usage\": {\"total_tokens\": 3}, \"retriever_resources\": null}}\n",
    ])
    .await;

    let event = events[0].as_ref().expect("no stream errors");
    let metadata = event.metadata.as_ref().expect("metadata kept");
    assert!(metadata.retriever_resources.is_empty());
    assert_eq!(metadata.usage.map(|u| u.total()), Some(3));
}

#[tokio::test]
async fn malformed_resource_drops_only_itself() {
    let events = collect(&[
        "data: {\"event\": \"message_end\", \"metadata\": {\"usage\": {\"total_tokens\": 9}, ",
        "\"retriever_resources\": [{\"document_name\": \"Bad\", \"score\": \"high\"}, ",
        "{\"document_name\": \"Good\"}]}}\n",
    ])
    .await;

    let mut assembler = AnswerAssembler::new();
    assembler.apply(events[0].as_ref().expect("no stream errors"));
    assert_eq!(assembler.usage().map(|u| u.total()), Some(9));
    assert_eq!(assembler.references().len(), 1);
    assert_eq!(assembler.references()[0].document_name, "Good");
}
