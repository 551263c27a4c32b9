// tests/exam_flow_tests.rs

use std::sync::Arc;

use chrono::{Duration, Utc};
use exam_core::{
    config::Config,
    models::{exam::Exam, question::Question},
    routes,
    state::AppState,
    store::MemoryStore,
    utils::jwt::sign_jwt,
};
use serde_json::{Value, json};
use sqlx::types::Json;
use url::Url;

const SECRET: &str = "exam_flow_test_secret";

struct TestApp {
    address: String,
    state: AppState,
}

impl TestApp {
    fn token(&self, participant_id: i64) -> String {
        sign_jwt(participant_id, "employee", SECRET, 600).unwrap()
    }

    fn admin_token(&self) -> String {
        sign_jwt(1000, "admin", SECRET, 600).unwrap()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

fn test_config() -> Config {
    Config {
        database_url: None,
        jwt_secret: SECRET.to_string(),
        rust_log: "error".to_string(),
        port: 0,
        grace_seconds: 5,
        rank_retry_limit: 3,
        certificate_base_url: Url::parse("http://files.test/").unwrap(),
        seed_path: None,
    }
}

fn exam(id: i64, passing_score: i32, questions_per_exam: Option<i32>) -> Exam {
    Exam {
        id,
        title: format!("Exam {}", id),
        description: None,
        duration: 30,
        passing_score,
        start_time: None,
        end_time: None,
        randomize_questions: false,
        questions_per_exam,
    }
}

fn question(id: i64, correct: &str) -> Question {
    Question {
        id,
        prompt: format!("Question {}", id),
        options: Json(
            ["A", "B", "C", "D"]
                .into_iter()
                .map(|k| (k.to_string(), format!("Option {}", k)))
                .collect(),
        ),
        correct_answer: correct.to_string(),
        difficulty: None,
        subject: None,
    }
}

/// Seeds an in-memory store and serves the app on a random port.
async fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());

    // Exam 1: two questions, pass mark 50
    store.insert_exam(exam(1, 50, None)).await;
    store.assign_question(1, question(1, "A")).await;
    store.assign_question(1, question(2, "B")).await;

    // Exam 2: four questions, only the first two are served
    store.insert_exam(exam(2, 60, Some(2))).await;
    for (id, answer) in [(21, "A"), (22, "B"), (23, "C"), (24, "D")] {
        store.assign_question(2, question(id, answer)).await;
    }

    // Exam 3: closed yesterday
    let mut closed = exam(3, 50, None);
    closed.end_time = Some(Utc::now() - Duration::days(1));
    store.insert_exam(closed).await;

    for (id, name) in [(1, "Dana"), (2, "Sam"), (3, "Lee")] {
        store.insert_participant(id, name).await;
    }

    let state = AppState::new(test_config(), store);
    let app = routes::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        state,
    }
}

#[tokio::test]
async fn unknown_path_is_404() {
    let app = spawn_app().await;
    let response = reqwest::get(app.url("/random_path_that_does_not_exist"))
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn missing_or_bad_token_is_401() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(app.url("/api/exams/1/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let forged = sign_jwt(1, "employee", "some_other_secret", 600).unwrap();
    let response = client
        .post(app.url("/api/exams/1/start"))
        .bearer_auth(forged)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(app.url("/api/admin/exams/1/ranks"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = client
        .post(app.url("/api/admin/exams/1/ranks"))
        .bearer_auth(app.admin_token())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn start_hides_answers_and_rejects_second_start() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(app.url("/api/exams/1/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let body: Value = response.json().await.unwrap();
    let questions = body["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 2);
    assert!(questions.iter().all(|q| q.get("correct_answer").is_none()));
    assert_eq!(body["exam"]["passing_score"], 50);

    let response = client
        .post(app.url("/api/exams/1/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SESSION_ALREADY_ACTIVE");
}

#[tokio::test]
async fn start_outside_window_or_unknown_exam_fails() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(app.url("/api/exams/3/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "EXAM_CLOSED");

    let response = client
        .post(app.url("/api/exams/404/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn half_right_passes_at_fifty_percent() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    client
        .post(app.url("/api/exams/1/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();

    let response = client
        .post(app.url("/api/exams/1/submit"))
        .bearer_auth(app.token(1))
        .json(&json!({
            "answers": { "1": "A", "2": "C" },
            "clientScore": 2,
            "clientPercentage": 100.0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["score"], 1);
    assert_eq!(body["result"]["total_questions"], 2);
    assert_eq!(body["result"]["percentage"], 50);
    assert_eq!(body["result"]["status"], "passed");
    assert_eq!(body["message"], "Congratulations! You passed the exam.");
}

#[tokio::test]
async fn truncated_exam_scores_only_served_questions() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(app.url("/api/exams/2/start"))
        .bearer_auth(app.token(2))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let served: Vec<i64> = body["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["id"].as_i64().unwrap())
        .collect();
    assert_eq!(served, vec![21, 22]);

    let response = client
        .post(app.url("/api/exams/2/submit"))
        .bearer_auth(app.token(2))
        .json(&json!({ "answers": { "21": "A", "22": "B", "23": "C" } }))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["score"], 2);
    assert_eq!(body["result"]["total_questions"], 2);
    assert_eq!(body["result"]["percentage"], 100);
}

#[tokio::test]
async fn submit_without_session_is_rejected() {
    let app = spawn_app().await;
    let response = reqwest::Client::new()
        .post(app.url("/api/exams/1/submit"))
        .bearer_auth(app.token(3))
        .json(&json!({ "answers": { "1": "A" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NO_ACTIVE_SESSION");
}

#[tokio::test]
async fn negative_total_time_is_a_bad_request() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    client
        .post(app.url("/api/exams/1/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();

    let response = client
        .post(app.url("/api/exams/1/submit"))
        .bearer_auth(app.token(1))
        .json(&json!({ "answers": {}, "total_time": -5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn concurrent_submits_store_one_result() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    client
        .post(app.url("/api/exams/1/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();

    let submit = || {
        client
            .post(app.url("/api/exams/1/submit"))
            .bearer_auth(app.token(1))
            .json(&json!({ "answers": { "1": "A", "2": "B" } }))
            .send()
    };
    let (first, second) = tokio::join!(submit(), submit());
    let mut statuses = vec![
        first.unwrap().status().as_u16(),
        second.unwrap().status().as_u16(),
    ];
    statuses.sort();
    assert_eq!(statuses, vec![200, 409]);

    let (results, total) = app
        .state
        .results
        .results_for_participant(1, 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn deadline_allows_grace_then_rejects() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let now = Utc::now();

    // Participant 1 is 3 seconds past the deadline, inside the grace period
    app.state
        .sessions
        .start_session(1, 1, now - Duration::minutes(30) - Duration::seconds(3))
        .await
        .unwrap();
    // Participant 2 is 6 seconds past it
    app.state
        .sessions
        .start_session(1, 2, now - Duration::minutes(30) - Duration::seconds(6))
        .await
        .unwrap();

    let response = client
        .post(app.url("/api/exams/1/submit"))
        .bearer_auth(app.token(1))
        .json(&json!({ "answers": { "1": "A" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .post(app.url("/api/exams/1/submit"))
        .bearer_auth(app.token(2))
        .json(&json!({ "answers": { "1": "A" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "EXAM_TIME_EXCEEDED");

    // The late attempt stored nothing
    let (_, total) = app
        .state
        .results
        .results_for_participant(2, 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn autosave_is_visible_on_resume() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    client
        .post(app.url("/api/exams/1/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();

    for answers in [json!({ "1": "B", "2": "B" }), json!({ "1": "A" })] {
        let response = client
            .put(app.url("/api/exams/1/autosave"))
            .bearer_auth(app.token(1))
            .json(&json!({ "answers": answers }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    let response = client
        .get(app.url("/api/exams/1/session"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["answers"], json!({ "1": "A" }));
    assert_eq!(body["questions"].as_array().unwrap().len(), 2);
    assert!(body["time_left"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn empty_autosave_clears_saved_answers() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    client
        .post(app.url("/api/exams/1/start"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();

    for answers in [json!({ "1": "A" }), json!({})] {
        let response = client
            .put(app.url("/api/exams/1/autosave"))
            .bearer_auth(app.token(1))
            .json(&json!({ "answers": answers }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    let body: Value = client
        .get(app.url("/api/exams/1/session"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["answers"], json!({}));
}

#[tokio::test]
async fn leaderboard_orders_by_percentage_then_time() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let now = Utc::now();

    // (participant, answers, seconds ago started, reported seconds)
    // Participant 2 claims zero seconds; ranking uses the server's clock.
    let attempts = [
        (1, json!({ "1": "A", "2": "C" }), 100, 100),
        (2, json!({ "1": "A", "2": "B" }), 300, 0),
        (3, json!({ "1": "A", "2": "B" }), 200, 200),
    ];

    for (participant_id, answers, started_secs_ago, total_time) in attempts {
        app.state
            .sessions
            .start_session(1, participant_id, now - Duration::seconds(started_secs_ago))
            .await
            .unwrap();
        let response = client
            .post(app.url("/api/exams/1/submit"))
            .bearer_auth(app.token(participant_id))
            .json(&json!({ "answers": answers, "totalTime": total_time }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    let response = client
        .post(app.url("/api/admin/exams/1/ranks"))
        .bearer_auth(app.admin_token())
        .send()
        .await
        .unwrap();
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["ranked"], 3);

    let response = client
        .get(app.url("/api/exams/1/leaderboard?limit=10"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();
    let board: Vec<Value> = response.json().await.unwrap();

    let order: Vec<(i64, i64)> = board
        .iter()
        .map(|e| {
            (
                e["participant_id"].as_i64().unwrap(),
                e["rank"].as_i64().unwrap(),
            )
        })
        .collect();
    assert_eq!(order, vec![(3, 1), (2, 2), (1, 3)]);
    assert_eq!(board[0]["participant_name"], "Lee");
}

#[tokio::test]
async fn leaderboard_rejects_out_of_range_limit() {
    let app = spawn_app().await;
    let response = reqwest::Client::new()
        .get(app.url("/api/exams/1/leaderboard?limit=0"))
        .bearer_auth(app.token(1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = spawn_app().await;
    let response = reqwest::get(app.url("/api-docs/openapi.json")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let doc: Value = response.json().await.unwrap();
    assert!(doc["paths"]["/api/exams/{exam_id}/submit"].is_object());
}
