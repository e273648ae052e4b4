use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use school_api::{
    build_router,
    config::Config,
    services::email::RecordingMailer,
    store::memory::{MemoryIdentity, MemoryStore},
    AppState,
};

struct TestApp {
    router: Router,
    state: AppState,
    store: Arc<MemoryStore>,
    identity: Arc<MemoryIdentity>,
    mailer: Arc<RecordingMailer>,
}

fn app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MemoryIdentity::new());
    let mailer = Arc::new(RecordingMailer::new());
    let state = AppState::new(
        store.clone(),
        identity.clone(),
        Some(mailer.clone()),
        None,
        Arc::new(Config::for_tests()),
    );
    TestApp {
        router: build_router(state.clone()),
        state,
        store,
        identity,
        mailer,
    }
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let res = router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Registers "Lincoln High" and returns (token, school id).
async fn register_school(router: &Router) -> (String, String) {
    let (status, body) = send(
        router,
        "POST",
        "/auth/sign-up",
        None,
        Some(json!({
            "email": "Principal@Lincoln.edu",
            "password": "secret1",
            "confirm_password": "secret1",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "school_name": "Lincoln High"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["school"]["id"].as_str().unwrap().to_string(),
    )
}

async fn register_member(router: &Router, school_id: &str, email: &str, role: &str) -> String {
    let (status, body) = send(
        router,
        "POST",
        "/auth/sign-up",
        None,
        Some(json!({
            "email": email,
            "password": "secret1",
            "first_name": "Grace",
            "last_name": "Hopper",
            "role": role,
            "school_id": school_id
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_connected_store() {
    let t = app();
    let (status, body) = send(&t.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn sign_up_creates_school_and_admin() {
    let t = app();
    let (token, school_id) = register_school(&t.router).await;

    let (status, me) = send(&t.router, "GET", "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["email"], "principal@lincoln.edu");
    assert_eq!(me["user"]["role"], "school_admin");
    assert_eq!(me["user"]["school_id"], school_id);
    assert_eq!(me["school"]["name"], "Lincoln High");
    assert_eq!(me["school"]["admin_id"], me["user"]["id"]);
    assert!(me["user"].get("temp_password").is_none());
}

#[tokio::test]
async fn duplicate_sign_up_is_rejected() {
    let t = app();
    register_school(&t.router).await;

    let (status, _) = send(
        &t.router,
        "POST",
        "/auth/sign-up",
        None,
        Some(json!({
            "email": "principal@lincoln.edu",
            "password": "secret1",
            "first_name": "Ada",
            "last_name": "Again",
            "school_name": "Lincoln Again"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(t.identity.account_count(), 1);
}

#[tokio::test]
async fn failed_sign_up_leaves_no_login_behind() {
    let t = app();
    t.store.fail_writes(Some("write rejected"));

    let (status, _) = send(
        &t.router,
        "POST",
        "/auth/sign-up",
        None,
        Some(json!({
            "email": "principal@lincoln.edu",
            "password": "secret1",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "school_name": "Lincoln High"
        })),
    )
    .await;
    assert!(status.is_server_error() || status.is_client_error());
    assert_eq!(t.identity.account_count(), 0);
}

#[tokio::test]
async fn sign_out_revokes_the_token() {
    let t = app();
    let (token, _) = register_school(&t.router).await;

    let (status, _) = send(&t.router, "POST", "/auth/sign-out", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&t.router, "GET", "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sign_in_with_wrong_password_is_unauthorized() {
    let t = app();
    register_school(&t.router).await;

    let (status, _) = send(
        &t.router,
        "POST",
        "/auth/sign-in",
        None,
        Some(json!({ "email": "principal@lincoln.edu", "password": "wrong-one" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &t.router,
        "POST",
        "/auth/sign-in",
        None,
        Some(json!({ "email": "principal@lincoln.edu", "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let t = app();
    let (status, _) = send(&t.router, "GET", "/teachers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn new_teacher_is_pending_until_provisioned() {
    let t = app();
    let (token, school_id) = register_school(&t.router).await;

    let (status, created) = send(
        &t.router,
        "POST",
        "/teachers",
        Some(&token),
        Some(json!({
            "email": "Jane@Lincoln.edu",
            "first_name": "Jane",
            "last_name": "Doe",
            "employee_id": "T-100"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["role"], "teacher");
    assert_eq!(created["school_id"], school_id);
    assert_eq!(created["auth_status"], "pending");

    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    t.state.pipeline.on_user_created(id).await.unwrap();

    assert!(t.identity.has_account(id));
    assert_eq!(t.mailer.sent_to("jane@lincoln.edu").len(), 1);

    let (_, rows) = send(&t.router, "GET", "/teachers", Some(&token), None).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["auth_status"], "complete");
}

#[tokio::test]
async fn deactivated_teacher_leaves_the_active_list() {
    let t = app();
    let (token, _) = register_school(&t.router).await;

    let (_, created) = send(
        &t.router,
        "POST",
        "/teachers",
        Some(&token),
        Some(json!({ "email": "jane@lincoln.edu", "first_name": "Jane", "last_name": "Doe" })),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let (status, _) = send(&t.router, "DELETE", &format!("/teachers/{id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, active) = send(&t.router, "GET", "/teachers", Some(&token), None).await;
    assert!(active.as_array().unwrap().is_empty());

    let (_, all) = send(&t.router, "GET", "/teachers?include_inactive=true", Some(&token), None).await;
    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0]["is_active"], false);
}

#[tokio::test]
async fn teacher_page_rejects_student_role() {
    let t = app();
    let (token, _) = register_school(&t.router).await;

    let (status, _) = send(
        &t.router,
        "POST",
        "/teachers",
        Some(&token),
        Some(json!({
            "email": "kid@lincoln.edu",
            "first_name": "Kid",
            "last_name": "Smith",
            "role": "student"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn teachers_cannot_create_members_or_send_bulk_mail() {
    let t = app();
    let (_, school_id) = register_school(&t.router).await;
    let teacher = register_member(&t.router, &school_id, "grace@lincoln.edu", "teacher").await;

    let (status, _) = send(
        &t.router,
        "POST",
        "/students",
        Some(&teacher),
        Some(json!({ "email": "kid@lincoln.edu", "first_name": "Kid", "last_name": "Smith" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &t.router,
        "POST",
        "/functions/bulk-notification-email",
        Some(&teacher),
        Some(json!({
            "recipients": [{ "email": "p@x.com", "name": "P" }],
            "subject": "Hi",
            "content": "Hello",
            "schoolId": school_id
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(t.mailer.sent().is_empty());
    assert_eq!(t.store.email_log_count(), 0);
}

#[tokio::test]
async fn admin_bulk_notification_reports_each_delivery() {
    let t = app();
    let (token, school_id) = register_school(&t.router).await;
    t.mailer.reject("bounce@x.com");

    let (status, body) = send(
        &t.router,
        "POST",
        "/functions/bulk-notification-email",
        Some(&token),
        Some(json!({
            "recipients": [
                { "email": "p1@x.com", "name": "Parent One" },
                { "email": "bounce@x.com", "name": "Parent Two" }
            ],
            "subject": "Closure",
            "content": "School is closed tomorrow",
            "schoolId": school_id
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["totalSent"], 2);
    assert_eq!(body["successful"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(t.store.email_log_count(), 2);

    let (status, logs) = send(&t.router, "GET", "/email-logs", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn attendance_saves_are_idempotent_per_student_and_day() {
    let t = app();
    let (token, _) = register_school(&t.router).await;

    let (status, class) = send(
        &t.router,
        "POST",
        "/classes",
        Some(&token),
        Some(json!({ "name": "Grade 5", "grade": "5", "section": "A" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{class}");
    let class_id = class["id"].as_str().unwrap().to_string();

    let (status, student) = send(
        &t.router,
        "POST",
        "/students",
        Some(&token),
        Some(json!({
            "email": "kid@lincoln.edu",
            "first_name": "Kid",
            "last_name": "Smith",
            "class_id": class_id
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{student}");
    let student_id = student["id"].as_str().unwrap().to_string();

    let (status, sheet) = send(
        &t.router,
        "GET",
        &format!("/attendance?class_id={class_id}&date=2024-03-04"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{sheet}");
    assert_eq!(sheet["roster"].as_array().unwrap().len(), 1);

    let save = |status: &str| {
        json!({
            "class_id": class_id,
            "date": "2024-03-04",
            "marks": [{ "student_id": student_id, "status": status }]
        })
    };

    let (status, first) = send(&t.router, "PUT", "/attendance", Some(&token), Some(save("present"))).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["inserted"], 1);

    let (_, second) = send(&t.router, "PUT", "/attendance", Some(&token), Some(save("late"))).await;
    assert_eq!(second["inserted"], 0);
    assert_eq!(second["updated"], 1);
    assert_eq!(t.store.attendance_count(), 1);
}

#[tokio::test]
async fn students_only_see_published_announcements_addressed_to_them() {
    let t = app();
    let (token, school_id) = register_school(&t.router).await;
    let student = register_member(&t.router, &school_id, "kid@lincoln.edu", "student").await;

    for (title, audience, status) in [
        ("For students", json!(["students"]), "published"),
        ("For teachers", json!(["teachers"]), "published"),
        ("Everyone", json!(["all"]), "published"),
        ("Draft", json!([]), "draft"),
    ] {
        let (code, body) = send(
            &t.router,
            "POST",
            "/announcements",
            Some(&token),
            Some(json!({
                "title": title,
                "content": "Details",
                "target_audience": audience,
                "status": status
            })),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED, "{body}");
    }

    let (_, admin_view) = send(&t.router, "GET", "/announcements", Some(&token), None).await;
    assert_eq!(admin_view.as_array().unwrap().len(), 4);

    let (_, student_view) = send(&t.router, "GET", "/announcements", Some(&student), None).await;
    let mut titles: Vec<&str> = student_view
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["title"].as_str().unwrap())
        .collect();
    titles.sort();
    assert_eq!(titles, ["Everyone", "For students"]);

    let (status, _) = send(
        &t.router,
        "POST",
        "/announcements",
        Some(&student),
        Some(json!({ "title": "Nope", "content": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn navigation_follows_the_role() {
    let t = app();
    let (token, school_id) = register_school(&t.router).await;
    let parent = register_member(&t.router, &school_id, "mum@lincoln.edu", "parent").await;

    let (_, admin_nav) = send(&t.router, "GET", "/navigation", Some(&token), None).await;
    let (_, parent_nav) = send(&t.router, "GET", "/navigation", Some(&parent), None).await;

    let hrefs = |v: &Value| -> Vec<String> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|i| i["href"].as_str().unwrap().to_string())
            .collect()
    };
    assert!(hrefs(&admin_nav).contains(&"/dashboard/settings".to_string()));
    let parent_hrefs = hrefs(&parent_nav);
    assert!(parent_hrefs.contains(&"/dashboard/billing".to_string()));
    assert!(!parent_hrefs.contains(&"/dashboard/students".to_string()));
}

#[tokio::test]
async fn school_profile_is_editable_by_its_admin_only() {
    let t = app();
    let (token, school_id) = register_school(&t.router).await;
    let teacher = register_member(&t.router, &school_id, "grace@lincoln.edu", "teacher").await;

    let (status, _) = send(
        &t.router,
        "PUT",
        "/school",
        Some(&teacher),
        Some(json!({ "name": "Hijacked" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, school) = send(
        &t.router,
        "PUT",
        "/school",
        Some(&token),
        Some(json!({ "name": "Lincoln High School" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{school}");
    assert_eq!(school["name"], "Lincoln High School");
}

#[tokio::test]
async fn password_reset_reports_a_rejected_send() {
    let t = app();
    let (token, _) = register_school(&t.router).await;
    let body = json!({ "email": "principal@lincoln.edu", "resetLink": "https://x/reset" });

    let (status, sent) = send(
        &t.router,
        "POST",
        "/functions/password-reset-email",
        Some(&token),
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["success"], true);

    t.mailer.reject("principal@lincoln.edu");
    let (status, rejected) = send(
        &t.router,
        "POST",
        "/functions/password-reset-email",
        Some(&token),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{rejected}");
    assert_eq!(rejected["success"], false);
    assert_eq!(t.store.email_log_count(), 2);
}
