use super::*;
use serde_json::json;

fn sample_comment() -> CommentView {
    CommentView {
        id: "c1".to_owned(),
        report_id: "report-42".to_owned(),
        author_id: "u-1".to_owned(),
        author_display_name: "asha".to_owned(),
        author_role: Role::Citizen,
        body: "fixed?".to_owned(),
        created_at: 1_700_000_000_000,
    }
}

#[test]
fn join_complaint_carries_bare_report_id() {
    let value = serde_json::to_value(ClientEvent::JoinComplaint("report-42".into())).expect("serialize");
    assert_eq!(value, json!({"event": "join-complaint", "data": "report-42"}));
}

#[test]
fn new_comment_uses_camel_case_payload() {
    let event = ClientEvent::NewComment(NewComment { report_id: "report-42".into(), comment: sample_comment() });
    let value = serde_json::to_value(&event).expect("serialize");

    assert_eq!(value["event"], "new-comment");
    assert_eq!(value["data"]["reportId"], "report-42");
    assert_eq!(value["data"]["comment"]["authorDisplayName"], "asha");
    assert_eq!(value["data"]["comment"]["authorRole"], "CITIZEN");
    assert_eq!(value["data"]["comment"]["createdAt"], 1_700_000_000_000_i64);
}

#[test]
fn vote_change_decodes_from_wire_shape() {
    let event: ClientEvent =
        decode(r#"{"event":"vote-change","data":{"reportId":"report-7","voteCount":4}}"#).expect("decode");
    assert_eq!(event, ClientEvent::VoteChange(VoteCount { report_id: "report-7".into(), vote_count: 4 }));
    assert_eq!(event.name(), "vote-change");
    assert_eq!(event.report_id(), "report-7");
}

#[test]
fn negative_vote_count_is_rejected() {
    let result: Result<ClientEvent, _> =
        decode(r#"{"event":"vote-change","data":{"reportId":"report-7","voteCount":-1}}"#);
    assert!(matches!(result, Err(CodecError::Json(_))));
}

#[test]
fn unknown_event_name_is_a_codec_error() {
    let result: Result<ClientEvent, _> = decode(r#"{"event":"teleport","data":{}}"#);
    let err = result.expect_err("unknown event must fail");
    assert_eq!(err.error_code(), "E_BAD_EVENT");
}

#[test]
fn chat_cleared_accepts_empty_payload() {
    let event: ServerEvent = decode(r#"{"event":"chat-cleared","data":{}}"#).expect("decode");
    assert_eq!(event, ServerEvent::ChatCleared(ChatCleared::default()));
    assert_eq!(event.report_id(), None);
}

#[test]
fn chat_cleared_omits_missing_report_id() {
    let text = encode(&ServerEvent::ChatCleared(ChatCleared::default())).expect("encode");
    assert_eq!(text, r#"{"event":"chat-cleared","data":{}}"#);
}

#[test]
fn status_change_serializes_screaming_snake_status() {
    let event = ServerEvent::ComplaintStatusChanged(StatusChange {
        report_id: "report-5".into(),
        status: ReportStatus::InProgress,
    });
    let value = serde_json::to_value(&event).expect("serialize");
    assert_eq!(value, json!({"event": "complaint-status-changed", "data": {"reportId": "report-5", "status": "IN_PROGRESS"}}));
}

#[test]
fn report_status_parses_case_insensitively() {
    assert_eq!("resolved".parse::<ReportStatus>(), Ok(ReportStatus::Resolved));
    assert_eq!(" In_Progress ".parse::<ReportStatus>(), Ok(ReportStatus::InProgress));
    assert_eq!("closed".parse::<ReportStatus>(), Err(UnknownStatus("closed".into())));
}

#[test]
fn role_from_stored_defaults_to_citizen() {
    assert_eq!(Role::from_stored("ADMIN"), Role::Admin);
    assert_eq!(Role::from_stored("admin"), Role::Admin);
    assert_eq!(Role::from_stored("USER"), Role::Citizen);
    assert!(!Role::Citizen.is_admin());
}

#[test]
fn membership_events_are_not_broadcasts() {
    assert!(BroadcastEvent::from_client(ClientEvent::JoinComplaint("r".into())).is_none());
    assert!(BroadcastEvent::from_client(ClientEvent::LeaveComplaint("r".into())).is_none());
}

#[test]
fn new_comment_becomes_room_scoped_comment_received() {
    let event = ClientEvent::NewComment(NewComment { report_id: "report-42".into(), comment: sample_comment() });
    let broadcast = BroadcastEvent::from_client(event).expect("broadcast");

    assert_eq!(broadcast.kind, BroadcastKind::CommentPosted);
    assert!(!broadcast.kind.is_global());
    assert_eq!(broadcast.report_id, "report-42");
    assert_eq!(broadcast.body, ServerEvent::CommentReceived(sample_comment()));
}

#[test]
fn clear_chat_body_names_its_report() {
    let broadcast =
        BroadcastEvent::from_client(ClientEvent::ClearChat(ReportRef { report_id: "report-9".into() })).expect("broadcast");
    assert_eq!(broadcast.kind, BroadcastKind::CommentCleared);
    assert_eq!(broadcast.body.report_id(), Some("report-9"));
}

#[test]
fn status_update_is_the_only_global_kind() {
    let broadcast = BroadcastEvent::from_client(ClientEvent::StatusUpdate(StatusChange {
        report_id: "report-5".into(),
        status: ReportStatus::Resolved,
    }))
    .expect("broadcast");

    assert_eq!(broadcast.kind, BroadcastKind::StatusChanged);
    assert!(broadcast.kind.is_global());
    assert!(!BroadcastKind::VoteChanged.is_global());
    assert!(!BroadcastKind::CommentCleared.is_global());
}

#[test]
fn error_event_carries_code_and_message() {
    let err = decode::<ClientEvent>("not json").expect_err("invalid json");
    let event = ServerEvent::error(&err);
    let ServerEvent::Error(body) = event else {
        panic!("expected error event");
    };
    assert_eq!(body.code, "E_BAD_EVENT");
    assert!(body.message.starts_with("invalid event json"));
}

#[test]
fn now_ms_is_positive() {
    assert!(now_ms() > 0);
}
