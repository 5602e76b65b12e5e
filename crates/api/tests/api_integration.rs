//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::ManualClock;
use domain::{BuyerId, ProductId, SellerId};
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::services::{
    InMemoryCartStore, InMemoryCarrier, InMemoryInventoryLedger, InMemoryPaymentGateway,
    RecordingNotificationSink,
};
use saga::{Collaborators, SignatureVerifier};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    gateway: InMemoryPaymentGateway,
    signer: SignatureVerifier,
}

impl TestApp {
    fn new() -> Self {
        let config = api::Config::default();
        let gateway = InMemoryPaymentGateway::new();
        let collaborators = Collaborators {
            inventory: Arc::new(InMemoryInventoryLedger::new()),
            payments: Arc::new(gateway.clone()),
            carrier: Arc::new(InMemoryCarrier::new()),
            notifications: Arc::new(RecordingNotificationSink::new()),
            carts: Arc::new(InMemoryCartStore::new()),
        };
        let clock = ManualClock::new("2026-03-02T09:00:00Z".parse().unwrap());
        let state = api::create_state(
            InMemoryEventStore::new(),
            collaborators,
            &config,
            Arc::new(clock),
        );
        Self {
            app: api::create_app(state, get_metrics_handle()),
            gateway,
            signer: SignatureVerifier::new(config.webhook_secret.expose()),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, &body)).await
    }

    async fn product(&self, seller_id: SellerId, units: u64) -> ProductId {
        let product_id = ProductId::new();
        let (status, _) = self
            .post(
                "/products",
                json!({
                    "product_id": product_id,
                    "seller_id": seller_id,
                    "name": "Rice, 1kg",
                    "unit_price": 100,
                    "lot_size": 5,
                    "quantity_available": units,
                    "low_stock_threshold": 0
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        product_id
    }

    async fn buy_now(&self, buyer_id: BuyerId, product_id: ProductId, lots: u32) -> (StatusCode, Value) {
        self.post(
            "/checkout/buy-now",
            json!({"buyer_id": buyer_id, "product_id": product_id, "lot_quantity": lots}),
        )
        .await
    }

    async fn verify(&self, intent: &str, payment_ref: &str) -> (StatusCode, Value) {
        self.post(
            "/payments/verify",
            json!({
                "payment_intent_id": intent,
                "payment_ref": payment_ref,
                "signature": self.signer.sign_confirmation(intent, payment_ref)
            }),
        )
        .await
    }

    /// Buys two lots and pays for them; returns the order id.
    async fn paid_order(&self, buyer_id: BuyerId, product_id: ProductId) -> String {
        let (_, receipt) = self.buy_now(buyer_id, product_id, 2).await;
        let intent = receipt["payment_intent_id"].as_str().unwrap().to_string();
        let payment_ref = self.gateway.capture(&intent).await;
        let (status, _) = self.verify(&intent, &payment_ref).await;
        assert_eq!(status, StatusCode::OK);
        receipt["orders"][0]["order_id"].as_str().unwrap().to_string()
    }
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();
    let (status, json) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();
    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_buy_now_and_verify() {
    let app = TestApp::new();
    let seller = SellerId::new();
    let buyer = BuyerId::new();
    let product = app.product(seller, 20).await;

    let (status, receipt) = app.buy_now(buyer, product, 2).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["amount"], 1000);
    let order_id = receipt["orders"][0]["order_id"].as_str().unwrap().to_string();

    let (_, pending) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(pending["status"], "PaymentPending");
    assert_eq!(pending["payment_status"], "Pending");

    let intent = receipt["payment_intent_id"].as_str().unwrap();
    let payment_ref = app.gateway.capture(intent).await;
    let (status, outcome) = app.verify(intent, &payment_ref).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["confirmed"][0], order_id.as_str());

    let (status, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "Confirmed");
    assert_eq!(order["payment_status"], "Paid");
    assert_eq!(order["platform_fee"], 50);
    assert_eq!(order["seller_net"], 950);
    assert_eq!(order["can_cancel"], true);
    assert_eq!(order["can_return"], false);
    assert!(order["history"].as_array().unwrap().len() >= 2);

    // a second confirmation is a no-op
    let (status, again) = app.verify(intent, &payment_ref).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["already_verified"][0], order_id.as_str());
}

#[tokio::test]
async fn test_checkout_shortfall_reports_available_lots() {
    let app = TestApp::new();
    let product = app.product(SellerId::new(), 14).await;

    let (status, json) = app.buy_now(BuyerId::new(), product, 3).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["available_lots"], 2);
}

#[tokio::test]
async fn test_verify_rejects_bad_signature() {
    let app = TestApp::new();
    let product = app.product(SellerId::new(), 20).await;
    let (_, receipt) = app.buy_now(BuyerId::new(), product, 1).await;
    let intent = receipt["payment_intent_id"].as_str().unwrap();
    let payment_ref = app.gateway.capture(intent).await;

    let (status, _) = app
        .post(
            "/payments/verify",
            json!({"payment_intent_id": intent, "payment_ref": payment_ref, "signature": "00ff"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let order_id = receipt["orders"][0]["order_id"].as_str().unwrap();
    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "PaymentPending");
}

#[tokio::test]
async fn test_verify_unknown_intent_is_not_found() {
    let app = TestApp::new();
    let (status, _) = app.verify("pi_unknown", "pay_unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_declined_payment_is_payment_required() {
    let app = TestApp::new();
    let product = app.product(SellerId::new(), 20).await;
    let (_, receipt) = app.buy_now(BuyerId::new(), product, 1).await;
    let intent = receipt["payment_intent_id"].as_str().unwrap();
    let payment_ref = app.gateway.decline(intent).await;

    let (status, json) = app.verify(intent, &payment_ref).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["error"], "payment could not be verified");

    let order_id = receipt["orders"][0]["order_id"].as_str().unwrap();
    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "Cancelled");
    assert_eq!(order["payment_status"], "Failed");
}

#[tokio::test]
async fn test_payment_webhook_requires_signature() {
    let app = TestApp::new();
    let product = app.product(SellerId::new(), 20).await;
    let (_, receipt) = app.buy_now(BuyerId::new(), product, 1).await;
    let intent = receipt["payment_intent_id"].as_str().unwrap();
    let payment_ref = app.gateway.capture(intent).await;
    let body = serde_json::to_vec(&json!({
        "event": "payment.captured",
        "payload": {"payment_intent_id": intent, "payment_ref": payment_ref}
    }))
    .unwrap();

    let unsigned = Request::builder()
        .method("POST")
        .uri("/payments/webhook")
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = app.send(unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let signed = Request::builder()
        .method("POST")
        .uri("/payments/webhook")
        .header("x-payment-signature", app.signer.sign(&body))
        .body(Body::from(body))
        .unwrap();
    let (status, json) = app.send(signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "verified");
    assert_eq!(json["confirmed"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cart_checkout_splits_by_seller() {
    let app = TestApp::new();
    let buyer = BuyerId::new();
    let first = app.product(SellerId::new(), 50).await;
    let second = app.product(SellerId::new(), 50).await;

    let (status, cart) = app
        .post(
            "/carts",
            json!({
                "buyer_id": buyer,
                "lines": [
                    {"product_id": first, "lot_quantity": 1},
                    {"product_id": second, "lot_quantity": 3}
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, receipt) = app
        .post(
            "/checkout/cart",
            json!({"cart_id": cart["cart_id"], "shipping_fee": 200}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["orders"].as_array().unwrap().len(), 2);
    assert_eq!(receipt["amount"], 2200);

    let shipping: i64 = receipt["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["shipping_fee"].as_i64().unwrap())
        .sum();
    assert_eq!(shipping, 200);
}

#[tokio::test]
async fn test_fulfilment_and_refused_cancellation() {
    let app = TestApp::new();
    let seller = SellerId::new();
    let buyer = BuyerId::new();
    let product = app.product(seller, 20).await;
    let order_id = app.paid_order(buyer, product).await;

    let (status, _) = app
        .post(
            &format!("/orders/{order_id}/ship"),
            json!({"seller_id": SellerId::new()}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, shipped) = app
        .post(&format!("/orders/{order_id}/ship"), json!({"seller_id": seller}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shipped["status"], "Shipped");
    assert!(shipped["shipment"]["awb_code"].as_str().is_some());

    let (status, json) = app
        .post(
            &format!("/orders/{order_id}/cancel"),
            json!({"actor": {"role": "buyer", "id": buyer}, "reason": "too slow"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["current_status"], "Shipped");
    assert!(json["reason"].as_str().unwrap().contains("carrier"));

    let (status, update) = app
        .post(
            "/shipments/webhook",
            json!({"order_id": order_id, "status": "DELIVERED"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(update["status"], "Delivered");

    let (_, order) = app.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["can_return"], true);
    assert!(order["return_window_expires_at"].as_str().is_some());
}

#[tokio::test]
async fn test_buyer_cancel_before_packing_restores_stock() {
    let app = TestApp::new();
    let buyer = BuyerId::new();
    let product = app.product(SellerId::new(), 20).await;
    let order_id = app.paid_order(buyer, product).await;

    let (status, order) = app
        .post(
            &format!("/orders/{order_id}/cancel"),
            json!({"actor": {"role": "buyer", "id": buyer}, "reason": "ordered twice"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "Cancelled");
    assert_eq!(order["refund"]["amount"], 1000);

    let refunds = app.gateway.refunds().await;
    assert_eq!(refunds.len(), 1);
}

#[tokio::test]
async fn test_payouts_and_platform_fee() {
    let app = TestApp::new();

    let (status, pending) = app.get("/payouts/pending").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending, json!([]));

    let (status, _) = app
        .post(
            "/payouts/complete",
            json!({"seller_id": SellerId::new(), "reference": "UTR-1"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, fee) = app
        .send(json_request(
            "PUT",
            "/settings/platform-fee",
            &json!({"bps": 750, "updated_by": "ops"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fee["bps"], 750);
    assert_eq!(fee["display"], "7.50%");

    let (status, _) = app
        .send(json_request(
            "PUT",
            "/settings/platform-fee",
            &json!({"bps": 20000, "updated_by": "ops"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_order_lookup_errors() {
    let app = TestApp::new();

    let (status, _) = app.get("/orders/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let (status, _) = app.get(&format!("/orders/{missing}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get(&format!("/orders/{missing}/events")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_order_events_are_listed_in_order() {
    let app = TestApp::new();
    let product = app.product(SellerId::new(), 20).await;
    let order_id = app.paid_order(BuyerId::new(), product).await;

    let (status, events) = app.get(&format!("/orders/{order_id}/events")).await;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap();
    assert_eq!(events[0]["event_type"], "OrderPlaced");
    assert_eq!(events[0]["version"], 1);
    assert!(
        events
            .iter()
            .any(|e| e["event_type"] == "PaymentConfirmed")
    );
}
