//! Router tests against the in-memory billing store

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use auditora_billing::{
        BillingConfig, BillingService, GatewayConfig, MemoryStore, PlanCatalog, ResourceStatus,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::auth::{JwtManager, OWNER_ROLE};
    use crate::routes::create_router;
    use crate::state::AppState;

    const JWT_SECRET: &str = "test-jwt-secret-key-for-testing-only";

    struct TestApp {
        store: MemoryStore,
        state: AppState,
    }

    impl TestApp {
        fn new() -> Self {
            let store = MemoryStore::new();
            let config = BillingConfig::new(
                GatewayConfig {
                    integrity_secret: "test_integrity_secret".to_string(),
                    events_secret: "test_events_secret".to_string(),
                    currency: "COP".to_string(),
                },
                PlanCatalog::standard(),
            );
            let billing = BillingService::new(config, Arc::new(store.clone()));
            let state = AppState::new(billing, JwtManager::new(JWT_SECRET, 24));
            Self { store, state }
        }

        fn router(&self) -> Router {
            create_router(self.state.clone())
        }

        fn token(&self, user_id: Uuid, role: &str, tenant: Option<Uuid>) -> String {
            self.state
                .jwt_manager
                .generate_token(user_id, role, tenant)
                .unwrap()
        }

        async fn send(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        fn webhook_body(&self, event: &str, reference: &str, status: &str, amount: i64) -> Value {
            let transaction_id = format!("tx-{}", reference);
            let timestamp = 1_767_225_600_i64;
            let checksum = self.state.billing.webhooks.verifier().checksum(
                &transaction_id,
                status,
                amount,
                timestamp,
            );
            json!({
                "event": event,
                "timestamp": timestamp,
                "data": {"transaction": {
                    "id": transaction_id,
                    "status": status,
                    "amount_in_cents": amount,
                    "reference": reference
                }},
                "signature": {"checksum": checksum}
            })
        }

        async fn purchase(&self, token: &str, plan: &str, period: &str) -> (String, i64) {
            let (status, body) = self
                .send(
                    Method::POST,
                    "/api/v1/payments/reference",
                    Some(token),
                    Some(json!({"plan": plan, "period": period})),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            (
                body["referencia"].as_str().unwrap().to_string(),
                body["monto"].as_i64().unwrap(),
            )
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body) = app.send(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_reference_requires_owner() {
        let app = TestApp::new();
        let body = json!({"plan": "basico", "period": "mes"});

        let (status, err) = app
            .send(Method::POST, "/api/v1/payments/reference", None, Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(err["code"], 401);

        let auditor = app.token(Uuid::new_v4(), "auditor", Some(Uuid::new_v4()));
        let (status, _) = app
            .send(Method::POST, "/api/v1/payments/reference", Some(&auditor), Some(body))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_reference_response_shape() {
        let app = TestApp::new();
        let owner = app.store.add_owner().await;
        let token = app.token(owner, OWNER_ROLE, None);

        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/payments/reference",
                Some(&token),
                Some(json!({"plan": "basico", "periodo": "mes"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["monto"], 150000);
        let reference = body["referencia"].as_str().unwrap();
        assert_eq!(
            body["firmaIntegridad"].as_str().unwrap(),
            app.state.billing.checkout.signer().sign(reference, 150000)
        );
    }

    #[tokio::test]
    async fn test_reference_rejects_unknown_period() {
        let app = TestApp::new();
        let owner = app.store.add_owner().await;
        let token = app.token(owner, OWNER_ROLE, None);

        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/payments/reference",
                Some(&token),
                Some(json!({"plan": "basico", "period": "semanal"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_bad_request() {
        let app = TestApp::new();
        let owner = app.store.add_owner().await;
        let token = app.token(owner, OWNER_ROLE, None);

        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/payments/reference",
                Some(&token),
                Some(json!({"plan": "basico"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
        assert!(body["error"].as_str().unwrap().contains("period"));

        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/subscriptions/unlock",
                Some(&token),
                Some(json!({"empresas": ["not-a-uuid"]})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
        assert!(body["error"].is_string());

        // Nothing was created by either request
        let state = app.store.snapshot().await;
        assert!(state.intents_for(owner).is_empty());
        assert!(state.active_subscription(owner).is_none());
    }

    #[tokio::test]
    async fn test_webhook_status_codes() {
        let app = TestApp::new();
        let owner = app.store.add_owner().await;
        let token = app.token(owner, OWNER_ROLE, None);
        let (reference, amount) = app.purchase(&token, "premium", "mes").await;

        // Bad signature
        let mut forged = app.webhook_body("transaction.updated", &reference, "APPROVED", amount);
        forged["signature"]["checksum"] = json!("00");
        let (status, _) = app
            .send(Method::POST, "/api/v1/payments/webhook", None, Some(forged))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Unknown reference
        let unknown = app.webhook_body("transaction.updated", "1", "APPROVED", amount);
        let (status, _) = app
            .send(Method::POST, "/api/v1/payments/webhook", None, Some(unknown))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Other event
        let other = app.webhook_body("nequi_token.updated", &reference, "APPROVED", amount);
        let (status, body) = app
            .send(Method::POST, "/api/v1/payments/webhook", None, Some(other))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "ignored");

        // Approval, then redelivery
        let approved = app.webhook_body("transaction.updated", &reference, "APPROVED", amount);
        let (status, body) = app
            .send(Method::POST, "/api/v1/payments/webhook", None, Some(approved.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "processed");
        assert_eq!(body["status"], "approved");

        let (status, body) = app
            .send(Method::POST, "/api/v1/payments/webhook", None, Some(approved))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "already_processed");

        assert_eq!(app.store.snapshot().await.subscriptions_for(owner).len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_rejects_malformed_body() {
        let app = TestApp::new();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_downgrade_and_unlock_flow() {
        let app = TestApp::new();
        let owner = app.store.add_owner().await;
        let orgs = vec![
            app.store.add_organization(owner).await,
            app.store.add_organization(owner).await,
        ];
        let token = app.token(owner, OWNER_ROLE, None);

        // No pending unlock before any purchase
        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/subscriptions/unlock",
                Some(&token),
                Some(json!({"empresas": [], "usuarios": []})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No active subscription");

        let (reference, amount) = app.purchase(&token, "basico", "mes").await;
        let approved = app.webhook_body("transaction.updated", &reference, "APPROVED", amount);
        app.send(Method::POST, "/api/v1/payments/webhook", None, Some(approved))
            .await;

        let (status, body) = app
            .send(Method::GET, "/api/v1/billing/subscription", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscription"]["pending_unlock"], true);
        assert_eq!(body["census"]["organizations"], 2);

        // Two organizations on a one-organization plan
        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/subscriptions/unlock",
                Some(&token),
                Some(json!({"empresas": orgs, "usuarios": []})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("organizations: limit 1, requested 2"));

        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/subscriptions/unlock",
                Some(&token),
                Some(json!({"empresas": [orgs[0]], "usuarios": []})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["activated_organizations"], 1);

        let state = app.store.snapshot().await;
        assert_eq!(state.organization_status(orgs[0]), Some(ResourceStatus::Active));
        assert_eq!(state.organization_status(orgs[1]), Some(ResourceStatus::Blocked));

        let (status, body) = app
            .send(
                Method::POST,
                "/api/v1/subscriptions/unlock",
                Some(&token),
                Some(json!({"empresas": [orgs[0]]})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No unlock is pending for the active subscription");
    }

    #[tokio::test]
    async fn test_auditor_sees_tenant_status_and_capacity() {
        let app = TestApp::new();
        let owner = app.store.add_owner().await;
        let auditor = app.store.add_auditor(owner).await;
        let owner_token = app.token(owner, OWNER_ROLE, None);
        let auditor_token = app.token(auditor, "auditor", Some(owner));

        let (status, body) = app
            .send(Method::GET, "/api/v1/billing/subscription", Some(&auditor_token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["access"]["mode"], "read_only");
        assert_eq!(body["access"]["reason"], "no_subscription");

        let (reference, amount) = app.purchase(&owner_token, "estandar", "mes").await;
        let approved = app.webhook_body("transaction.updated", &reference, "APPROVED", amount);
        app.send(Method::POST, "/api/v1/payments/webhook", None, Some(approved))
            .await;

        let (status, body) = app
            .send(Method::GET, "/api/v1/billing/capacity", Some(&auditor_token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["organizations"]["limit"], 3);
        assert_eq!(body["organizations"]["remaining"], 3);
        assert_eq!(body["auditors"]["used"], 1);
        assert_eq!(body["auditors"]["remaining"], 4);
        assert_eq!(body["auditors"]["available"], true);
    }
}
