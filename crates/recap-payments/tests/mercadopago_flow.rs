//! Mercado Pago checkout and webhook flow against a local fake API

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use recap_core::{CreditLedger, MemoryCreditLedger, MemoryJobStore, NoopTrigger};
use recap_payments::{
    CheckoutRequest, EventStatus, MercadoPagoConfig, MercadoPagoGateway, PaymentError,
    PaymentGateway, PaymentMetadata, ReconcileOutcome, WebhookOutcome, WebhookReconciler,
    hmac_sha256_hex,
};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal_macros::dec;
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct FakeApi {
    preference_calls: Arc<AtomicUsize>,
}

async fn create_preference(
    State(api): State<FakeApi>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    api.preference_calls.fetch_add(1, Ordering::SeqCst);
    if body.get("auto_return").is_some() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "auto_return invalid. back_url.success must be defined"})),
        );
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "id": "pref_1",
            "init_point": "https://mp.example/checkout?pref_id=pref_1",
            "sandbox_init_point": "https://sandbox.mp.example/checkout?pref_id=pref_1",
        })),
    )
}

async fn get_payment(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    let reference = PaymentMetadata::credits("user_42", 5).to_reference();
    match id.as_str() {
        "9001" => (
            StatusCode::OK,
            Json(json!({
                "id": 9001,
                "status": "approved",
                "status_detail": "accredited",
                "external_reference": reference,
                "live_mode": true,
            })),
        ),
        _ => (StatusCode::NOT_FOUND, Json(json!({"message": "not found"}))),
    }
}

async fn spawn_fake_api() -> (String, FakeApi) {
    let api = FakeApi::default();
    let app = Router::new()
        .route("/checkout/preferences", post(create_preference))
        .route("/v1/payments/{id}", get(get_payment))
        .with_state(api.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), api)
}

fn gateway(api_base: &str, secret: Option<&str>) -> MercadoPagoGateway {
    let mut config = MercadoPagoConfig::new("APP_USR-token");
    config.api_base = api_base.to_string();
    config.webhook_secret = secret.map(Into::into);
    MercadoPagoGateway::new(config)
}

fn signed(secret: &str, body: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let value = format!("sha256={}", hmac_sha256_hex(secret, body));
    headers.insert("x-signature", HeaderValue::from_str(&value).unwrap());
    headers
}

#[tokio::test]
async fn test_checkout_retries_without_auto_return() {
    let (base, api) = spawn_fake_api().await;

    let request = CheckoutRequest {
        amount: dec!(7.00),
        description: "5 créditos".into(),
        success_url: "https://recap.example/payment-success".into(),
        failure_url: "https://recap.example/payment-failure".into(),
        pending_url: None,
        notification_url: None,
        metadata: PaymentMetadata::credits("user_42", 5),
        payer_email: None,
    };

    let checkout = gateway(&base, None).create_checkout(&request).await.unwrap();
    assert_eq!(checkout.checkout_url, "https://mp.example/checkout?pref_id=pref_1");
    assert_eq!(checkout.external_id.as_deref(), Some("pref_1"));
    assert_eq!(api.preference_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_signed_webhook_credits_once() {
    let (base, _) = spawn_fake_api().await;
    let gateway = gateway(&base, Some("mp_secret"));

    let ledger = Arc::new(MemoryCreditLedger::new());
    let reconciler = WebhookReconciler::new(
        ledger.clone(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(NoopTrigger),
    );

    let body = br#"{"type":"payment","action":"payment.updated","data":{"id":"9001"}}"#;
    let headers = signed("mp_secret", body);

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let WebhookOutcome::Event(event) = gateway.parse_webhook(body, &headers).await.unwrap()
        else {
            panic!("expected payment event");
        };
        assert_eq!(event.status, EventStatus::Approved);
        assert_eq!(event.external_payment_id.as_deref(), Some("9001"));
        outcomes.push(reconciler.reconcile(&event));
    }

    assert!(matches!(
        outcomes[0],
        ReconcileOutcome::CreditsApplied { credits: 5, balance: 5, .. }
    ));
    assert!(matches!(outcomes[1], ReconcileOutcome::DuplicateCredit { .. }));
    assert!(matches!(outcomes[2], ReconcileOutcome::DuplicateCredit { .. }));
    assert_eq!(ledger.balance("user_42").unwrap(), 5);
}

#[tokio::test]
async fn test_unknown_payment_is_upstream_error() {
    let (base, _) = spawn_fake_api().await;
    let gateway = gateway(&base, Some("mp_secret"));

    let body = br#"{"type":"payment","data":{"id":"777"}}"#;
    let err = gateway
        .parse_webhook(body, &signed("mp_secret", body))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Upstream { .. }));
}

#[tokio::test]
async fn test_manual_lookup() {
    let (base, _) = spawn_fake_api().await;

    let event = gateway(&base, None).fetch_event("9001").await.unwrap();
    assert_eq!(event.metadata.user_id.as_deref(), Some("user_42"));
    assert_eq!(event.metadata.credits, Some(5));
    assert!(!event.test);
}
