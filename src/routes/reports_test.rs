use super::*;
use crate::services::policy::Action;
use crate::state::test_helpers;
use serde_json::json;

#[test]
fn service_errors_map_to_http_status() {
    assert_eq!(service_error_status(&ServiceError::Unauthorized(Action::PostComment)), StatusCode::UNAUTHORIZED);
    assert_eq!(service_error_status(&ServiceError::Forbidden(Action::ClearComments)), StatusCode::FORBIDDEN);
    assert_eq!(service_error_status(&ServiceError::EmptyComment), StatusCode::BAD_REQUEST);
    assert_eq!(
        service_error_status(&ServiceError::Store(StoreError::ReportNotFound("r".into()))),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        service_error_status(&ServiceError::Store(StoreError::Database(sqlx::Error::PoolTimedOut))),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn error_body_carries_code_and_retryable() {
    let body = ErrorResponse::from_error(&ServiceError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)));
    assert_eq!(body.code, "E_STORE");
    assert!(body.retryable);
}

// =============================================================================
// Live HTTP
// =============================================================================

#[tokio::test]
async fn comment_flow_over_http() {
    let addr = test_helpers::spawn_server(test_helpers::test_app_state()).await;
    let base = format!("http://{addr}/api/reports/report-1");
    let http = reqwest::Client::new();

    let created: CommentView = http
        .post(format!("{base}/comments"))
        .bearer_auth("citizen-token")
        .json(&json!({ "body": "  streetlight out  " }))
        .send()
        .await
        .expect("post")
        .error_for_status()
        .expect("2xx")
        .json()
        .await
        .expect("comment json");
    assert_eq!(created.body, "streetlight out");
    assert_eq!(created.author_display_name, "resident");

    let listed: Vec<CommentView> = http
        .get(format!("{base}/comments"))
        .send()
        .await
        .expect("get")
        .json()
        .await
        .expect("list json");
    assert_eq!(listed, vec![created]);
}

#[tokio::test]
async fn empty_comment_is_400_with_code() {
    let addr = test_helpers::spawn_server(test_helpers::test_app_state()).await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/reports/report-1/comments"))
        .bearer_auth("citizen-token")
        .json(&json!({ "body": "   " }))
        .send()
        .await
        .expect("post");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json().await.expect("error json");
    assert_eq!(body.code, "E_EMPTY_COMMENT");
}

#[tokio::test]
async fn clear_requires_admin() {
    let addr = test_helpers::spawn_server(test_helpers::test_app_state()).await;
    let url = format!("http://{addr}/api/reports/report-2/comments");
    let http = reqwest::Client::new();

    let as_citizen = http
        .delete(&url)
        .header("cookie", "session_token=citizen-token")
        .send()
        .await
        .expect("delete");
    assert_eq!(as_citizen.status(), reqwest::StatusCode::FORBIDDEN);

    let as_admin: ClearedResponse = http
        .delete(&url)
        .bearer_auth("admin-token")
        .send()
        .await
        .expect("delete")
        .json()
        .await
        .expect("cleared json");
    assert_eq!(as_admin, ClearedResponse { cleared: 0 });
}

#[tokio::test]
async fn vote_toggle_and_anonymous_read() {
    let addr = test_helpers::spawn_server(test_helpers::test_app_state()).await;
    let url = format!("http://{addr}/api/reports/report-3/vote");
    let http = reqwest::Client::new();

    let anonymous_toggle = http.post(&url).send().await.expect("post");
    assert_eq!(anonymous_toggle.status(), reqwest::StatusCode::UNAUTHORIZED);

    let toggled: VoteView = http
        .post(&url)
        .bearer_auth("citizen-token")
        .send()
        .await
        .expect("post")
        .json()
        .await
        .expect("vote json");
    assert_eq!(toggled, VoteView { voted: true, count: 1 });

    let anonymous: VoteView = http.get(&url).send().await.expect("get").json().await.expect("vote json");
    assert_eq!(anonymous, VoteView { voted: false, count: 1 });
}

#[tokio::test]
async fn status_update_is_admin_only() {
    let addr = test_helpers::spawn_server(test_helpers::test_app_state()).await;
    let url = format!("http://{addr}/api/reports/report-1/status");
    let http = reqwest::Client::new();

    let denied = http
        .put(&url)
        .bearer_auth("citizen-token")
        .json(&json!({ "status": "RESOLVED" }))
        .send()
        .await
        .expect("put");
    assert_eq!(denied.status(), reqwest::StatusCode::FORBIDDEN);

    let updated: StatusResponse = http
        .put(&url)
        .bearer_auth("admin-token")
        .json(&json!({ "status": "IN_PROGRESS" }))
        .send()
        .await
        .expect("put")
        .json()
        .await
        .expect("status json");
    assert_eq!(updated, StatusResponse { report_id: "report-1".into(), status: ReportStatus::InProgress });

    let read: StatusResponse = http.get(&url).send().await.expect("get").json().await.expect("status json");
    assert_eq!(read.status, ReportStatus::InProgress);
}

#[tokio::test]
async fn unknown_report_is_404() {
    let addr = test_helpers::spawn_server(test_helpers::test_app_state()).await;
    let response = reqwest::get(format!("http://{addr}/api/reports/nope/comments")).await.expect("get");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
