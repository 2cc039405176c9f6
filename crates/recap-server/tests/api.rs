//! End-to-end API tests against the in-process router

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use zip::write::SimpleFileOptions;

use recap_core::MemoryContentStore;
use recap_payments::{AvocadoPayConfig, AvocadoPayGateway, GatewayRegistry, hmac_sha256_hex};
use recap_pipeline::StaticFetcher;
use recap_runtime::ScriptedProvider;
use recap_server::{AppState, ServerConfig, Services, router};

const ARCHIVE: &str = "mem://export.zip";
const BROKEN: &str = "mem://broken.zip";
const WEBHOOK_SECRET: &str = "whsec_test";

fn document() -> Value {
    json!({
        "titulo": "Ana & Bia",
        "metricas_temporais": {
            "inicio": "01/01/2024",
            "fim": "31/12/2024",
            "constancia_conversa": "Vocês conversaram 300 dias de um total de 365 dias"
        },
        "tipo_de_amizade": {
            "nome_criativo": "Dupla do Caos",
            "descricao": "Memes, áudios e risadas.",
            "por_que": "Porque nada sai como planejado.",
            "pilares": "lealdade@ humor # paciência",
            "exemplo_real": {"autor": "Ana", "message": "bora?", "hour": "22:10"}
        },
        "fechamento": "Até o próximo ano!"
    })
}

fn chat_zip() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("_chat.txt", SimpleFileOptions::default())
        .unwrap();
    writer
        .write_all("[01/01/2024 10:00] Ana: oi\n[01/01/2024 10:01] Bia: oii".as_bytes())
        .unwrap();
    writer.finish().unwrap().into_inner()
}

struct TestApp {
    app: Router,
    state: AppState,
}

fn test_app(development: bool) -> TestApp {
    let zip = chat_zip();
    let truncated = zip[..zip.len() / 2].to_vec();
    let fetcher = StaticFetcher::new()
        .with(ARCHIVE, zip)
        .with(BROKEN, truncated);

    let mut avocadopay = AvocadoPayConfig::new("key");
    avocadopay.webhook_secret = Some(WEBHOOK_SECRET.into());

    let config = ServerConfig {
        development,
        ..ServerConfig::default()
    };
    let state = AppState::new(
        config,
        Services {
            provider: Arc::new(ScriptedProvider::always(document().to_string())),
            fetcher: Arc::new(fetcher),
            content: Arc::new(MemoryContentStore::new()),
            gateways: GatewayRegistry::new().with(Arc::new(AvocadoPayGateway::new(avocadopay))),
        },
    )
    .unwrap();

    TestApp {
        app: router(state.clone()),
        state,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(post_request(uri, body.to_string(), None)).await
    }

    async fn create_job(&self, user_id: &str, archive_ref: Option<&str>, process: bool) -> String {
        let (status, body) = self
            .post(
                "/jobs",
                &json!({
                    "userId": user_id,
                    "userPhotoRef": "photos/u.jpg",
                    "friendPhotoRef": "photos/f.jpg",
                    "archiveRef": archive_ref,
                    "process": process,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["jobId"].as_str().unwrap().to_string()
    }
}

fn post_request(uri: &str, body: String, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-avocadopay-signature", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn paid_credits(payment_id: &str, user_id: &str, credits: u64) -> String {
    json!({
        "event": "billing.paid",
        "id": payment_id,
        "metadata": {"type": "credits", "userId": user_id, "credits": credits}
    })
    .to_string()
}

#[tokio::test]
async fn test_health_lists_providers() {
    let app = test_app(false);
    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["llmProvider"], "Scripted");
    assert_eq!(body["paymentProviders"], json!(["avocadopay"]));
}

#[tokio::test]
async fn test_free_trial_job_completes_without_touching_ledger() {
    let app = test_app(false);
    let job_id = app.create_job("U", Some(ARCHIVE), false).await;

    let (status, job) = app.post("/process", &json!({"jobId": job_id})).await;
    assert_eq!(status, StatusCode::OK, "{job}");
    assert_eq!(job["status"], "completed");
    assert_eq!(job["ephemeral"], true);
    assert_eq!(job["title"], "Ana & Bia");
    assert!(job["contentRef"].is_string());

    let response = app
        .app
        .clone()
        .oneshot(
            Request::get(format!("/jobs/{job_id}/content"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=3600"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let content: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(content["titulo"], "Ana & Bia");

    assert_eq!(app.state.ledger.balance("U").unwrap(), 0);
    let (_, credits) = app.get("/users/U/credits").await;
    assert_eq!(credits["credits"], 0);
}

#[tokio::test]
async fn test_background_run_after_job_creation() {
    let app = test_app(false);
    let job_id = app.create_job("U", Some(ARCHIVE), true).await;

    let mut status = Value::Null;
    for _ in 0..200 {
        let (_, job) = app.get(&format!("/jobs/{job_id}")).await;
        status = job["status"].clone();
        if status != "processing" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, "completed");

    let (_, metadata) = app.get(&format!("/jobs/{job_id}/metadata")).await;
    assert_eq!(
        metadata,
        json!({"userPic": "photos/u.jpg", "friendPic": "photos/f.jpg"})
    );
}

#[tokio::test]
async fn test_job_with_credit_debits_once() {
    let app = test_app(false);
    app.state.ledger.credit("U", 2).unwrap();

    let (status, body) = app
        .post(
            "/jobs",
            &json!({"userId": "U", "userPhotoRef": "a", "friendPhotoRef": "b"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ephemeral"], false);
    assert_eq!(body["credits"], 1);
    assert_eq!(app.state.ledger.balance("U").unwrap(), 1);

    let (_, listing) = app.get("/users/U/jobs").await;
    assert_eq!(listing["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_content_is_404_until_completed() {
    let app = test_app(false);
    let job_id = app.create_job("U", None, false).await;

    let (status, body) = app.get(&format!("/jobs/{job_id}/content")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = app.get("/jobs/0000aaaa/content").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_truncated_archive_fails_job() {
    let app = test_app(false);
    let job_id = app.create_job("U", None, false).await;

    let (status, body) = app
        .post("/process", &json!({"jobId": job_id, "archiveRef": BROKEN}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "CORRUPT_ARCHIVE");
    assert!(body.get("details").is_none());

    let (_, job) = app.get(&format!("/jobs/{job_id}")).await;
    assert_eq!(job["status"], "failed");
    assert!(job.get("contentRef").is_none());
}

#[tokio::test]
async fn test_development_errors_carry_details() {
    let app = test_app(true);
    let job_id = app.create_job("U", None, false).await;

    let (status, body) = app
        .post("/process", &json!({"jobId": job_id, "archiveRef": BROKEN}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"].as_str().unwrap().contains("CorruptArchive"));
}

#[tokio::test]
async fn test_webhook_retry_credits_once() {
    let app = test_app(false);
    let payload = paid_credits("p1", "U", 5);

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let signature = hmac_sha256_hex(WEBHOOK_SECRET, payload.as_bytes());
        let (status, body) = app
            .send(post_request(
                "/webhooks/avocadopay",
                payload.clone(),
                Some(signature),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["received"], true);
        outcomes.push(body["outcome"].clone());
    }

    assert_eq!(outcomes, vec![json!("credits_applied"), json!("duplicate_credit")]);
    assert_eq!(app.state.ledger.balance("U").unwrap(), 5);
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let app = test_app(false);
    let payload = paid_credits("p2", "U", 5);

    let (status, body) = app
        .send(post_request(
            "/webhooks/avocadopay",
            payload.clone(),
            Some(hmac_sha256_hex("wrong secret", payload.as_bytes())),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    let (status, _) = app
        .send(post_request("/webhooks/avocadopay", payload, None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.state.ledger.balance("U").unwrap(), 0);
}

#[tokio::test]
async fn test_unsigned_dev_mode_webhook_credits_nothing() {
    let app = test_app(false);
    let payload = json!({
        "event": "billing.paid",
        "devMode": true,
        "id": "forged_1",
        "metadata": {"type": "credits", "userId": "mallory", "credits": 1000}
    })
    .to_string();

    let (status, body) = app
        .send(post_request("/webhooks/avocadopay", payload, None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_SIGNATURE");
    assert_eq!(app.state.ledger.balance("mallory").unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_bodies_are_400() {
    let app = test_app(false);

    let (status, body) = app
        .send(post_request("/webhooks/avocadopay", "{not json".into(), None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_BODY");

    let (status, body) = app
        .send(post_request("/jobs", "{\"userId\":".into(), None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_checkout_routes_by_provider() {
    let app = test_app(false);
    let body = json!({"amount": "7.00", "credits": 5, "userId": "U"});

    let (status, _) = app.post("/checkout/paypal", &body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, error) = app.post("/checkout/stripe", &body).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["code"], "PAYMENTS_DISABLED");

    let (status, error) = app
        .post(
            "/checkout/avocadopay",
            &json!({"amount": "7.00", "credits": 5, "retrospectiveId": "j1", "userId": "U"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "VALIDATION_ERROR");
}
