mod common;

use booking_service::services::gateway::{MockReply, VerificationOutcome};
use common::{test_config, TestApp, CALLBACK_SECRET};
use serde_json::{json, Value};

async fn pay(app: &TestApp, user: &str, booking_id: &str) -> reqwest::Response {
    app.as_user(
        app.client
            .post(app.url(&format!("/bookings/{}/pay", booking_id))),
        user,
    )
    .send()
    .await
    .expect("Failed to execute request")
}

async fn verify(app: &TestApp, query: &str) -> reqwest::Response {
    app.client
        .get(app.url(&format!("/payments/verify?{}", query)))
        .send()
        .await
        .expect("Failed to execute request")
}

#[tokio::test]
async fn booking_is_confirmed_after_verified_payment() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Lakeside Villa", "100.00", 4).await;
    let booking = app
        .create_booking("guest-1", listing["id"].as_str().unwrap())
        .await;

    assert_eq!(booking["total_price"], "300.00");
    assert_eq!(booking["status"], "pending");
    let booking_id = booking["id"].as_str().unwrap();

    let response = pay(&app, "guest-1", booking_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let initiation: Value = response.json().await.unwrap();
    let tx_ref = initiation["transaction_ref"].as_str().unwrap().to_string();
    assert_eq!(initiation["amount"], "300.00");
    assert_eq!(initiation["currency"], "ETB");
    assert_eq!(
        initiation["checkout_url"],
        format!("https://checkout.mock/{}", tx_ref)
    );

    let request = app.gateway.last_request().unwrap();
    assert!(request
        .callback_url
        .starts_with(&format!("http://api.test/payments/verify?tx_ref={}&sig=", tx_ref)));
    assert_eq!(request.payer_email, "guest-1@example.com");

    let response = verify(&app, &format!("tx_ref={}", tx_ref)).await;
    assert_eq!(response.status().as_u16(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["payment_status"], "completed");
    assert_eq!(report["booking_status"], "confirmed");
    assert_eq!(report["applied"], true);

    // A repeated callback changes nothing and doesn't reach the gateway.
    let response = verify(&app, &format!("trx_ref={}", tx_ref)).await;
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["applied"], false);
    assert_eq!(app.gateway.verify_calls(), 1);

    let response = pay(&app, "guest-1", booking_id).await;
    assert_eq!(response.status().as_u16(), 400);

    app.wait_for_emails(2).await;
    let subjects: Vec<String> = app.email.sent().into_iter().map(|e| e.subject).collect();
    assert_eq!(subjects.len(), 2);
    assert!(subjects.contains(&"Booking Confirmation - Lakeside Villa".to_string()));
    assert!(subjects.contains(&"Payment Confirmation for your Booking".to_string()));

    let payments: Vec<Value> = app
        .as_user(
            app.client
                .get(app.url(&format!("/bookings/{}/payments", booking_id))),
            "guest-1",
        )
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["status"], "completed");
}

#[tokio::test]
async fn unknown_or_missing_reference_is_a_bad_request() {
    let app = TestApp::spawn().await;

    assert_eq!(verify(&app, "tx_ref=bogus").await.status().as_u16(), 400);
    assert_eq!(verify(&app, "").await.status().as_u16(), 400);
    assert_eq!(app.gateway.verify_calls(), 0);
}

#[tokio::test]
async fn second_initiation_while_pending_conflicts() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("City Flat", "50", 2).await;
    let booking = app
        .create_booking("guest-1", listing["id"].as_str().unwrap())
        .await;
    let booking_id = booking["id"].as_str().unwrap();

    let first = pay(&app, "guest-1", booking_id).await;
    assert_eq!(first.status().as_u16(), 200);
    let first: Value = first.json().await.unwrap();

    let second = pay(&app, "guest-1", booking_id).await;
    assert_eq!(second.status().as_u16(), 409);
    let conflict: Value = second.json().await.unwrap();
    assert_eq!(conflict["transaction_ref"], first["transaction_ref"]);
    assert_eq!(conflict["checkout_url"], first["checkout_url"]);
    assert!(conflict["error"].as_str().unwrap().contains("in progress"));

    assert_eq!(pay(&app, "guest-2", booking_id).await.status().as_u16(), 404);
}

#[tokio::test]
async fn failed_verification_allows_a_new_attempt() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Hill Lodge", "80", 3).await;
    let booking = app
        .create_booking("guest-1", listing["id"].as_str().unwrap())
        .await;
    let booking_id = booking["id"].as_str().unwrap();

    let first: Value = pay(&app, "guest-1", booking_id).await.json().await.unwrap();
    app.gateway.push_verify(MockReply::Ok(VerificationOutcome::Failure {
        reason: "card declined".into(),
    }));
    let report: Value = verify(
        &app,
        &format!("tx_ref={}", first["transaction_ref"].as_str().unwrap()),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(report["payment_status"], "failed");
    assert_eq!(report["booking_status"], "pending");

    let response = pay(&app, "guest-1", booking_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let second: Value = response.json().await.unwrap();
    assert_ne!(second["transaction_ref"], first["transaction_ref"]);
}

#[tokio::test]
async fn gateway_error_during_verification_is_a_server_error() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Reef Resort", "120", 2).await;
    let booking = app
        .create_booking("guest-1", listing["id"].as_str().unwrap())
        .await;
    let initiation: Value = pay(&app, "guest-1", booking["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();
    let tx_ref = initiation["transaction_ref"].as_str().unwrap();

    app.gateway.push_verify(MockReply::Error("timeout".into()));
    let response = verify(&app, &format!("tx_ref={}", tx_ref)).await;
    assert_eq!(response.status().as_u16(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Payment gateway error");

    // Payment stayed pending, so the next callback settles it.
    let report: Value = verify(&app, &format!("tx_ref={}", tx_ref))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["payment_status"], "completed");
}

#[tokio::test]
async fn callback_signature_is_enforced_when_required() {
    let app = TestApp::spawn_with(test_config(true)).await;
    let listing = app.create_listing("Signed Villa", "100", 2).await;
    let booking = app
        .create_booking("guest-1", listing["id"].as_str().unwrap())
        .await;
    let initiation: Value = pay(&app, "guest-1", booking["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();
    let tx_ref = initiation["transaction_ref"].as_str().unwrap();

    let response = verify(&app, &format!("tx_ref={}", tx_ref)).await;
    assert_eq!(response.status().as_u16(), 401);
    let response = verify(&app, &format!("tx_ref={}&sig=deadbeef", tx_ref)).await;
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(app.gateway.verify_calls(), 0);

    let sig = service_core::utils::sign_payload(CALLBACK_SECRET, tx_ref.as_bytes()).unwrap();
    let response = verify(&app, &format!("tx_ref={}&sig={}", tx_ref, sig)).await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn webhook_settles_payment_and_acknowledges_unknown_references() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Webhook Villa", "100", 2).await;
    let booking = app
        .create_booking("guest-1", listing["id"].as_str().unwrap())
        .await;
    let initiation: Value = pay(&app, "guest-1", booking["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .client
        .post(app.url("/webhooks/chapa"))
        .json(&json!({ "tx_ref": initiation["transaction_ref"], "status": "success" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["booking_status"], "confirmed");

    let response = app
        .client
        .post(app.url("/webhooks/chapa"))
        .json(&json!({ "trx_ref": "not-ours" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn pending_booking_can_be_deleted_with_its_payments() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Short Stay", "40", 2).await;
    let booking = app
        .create_booking("guest-1", listing["id"].as_str().unwrap())
        .await;
    let booking_id = booking["id"].as_str().unwrap();
    let initiation: Value = pay(&app, "guest-1", booking_id).await.json().await.unwrap();

    let url = app.url(&format!("/bookings/{}", booking_id));
    let response = app
        .as_user(app.client.delete(&url), "guest-2")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = app
        .as_user(app.client.delete(&url), "guest-1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let response = app.as_user(app.client.get(&url), "guest-1").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = verify(
        &app,
        &format!("tx_ref={}", initiation["transaction_ref"].as_str().unwrap()),
    )
    .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn invalid_stays_are_rejected() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Tiny Room", "30", 1).await;
    let listing_id = listing["id"].as_str().unwrap();

    for body in [
        json!({ "listing_id": listing_id, "check_in_date": "2030-06-01",
                "check_out_date": "2030-06-01", "num_guests": 1 }),
        json!({ "listing_id": listing_id, "check_in_date": "2030-06-01",
                "check_out_date": "2030-06-03", "num_guests": 2 }),
        json!({ "listing_id": listing_id, "check_in_date": "2030-06-01",
                "check_out_date": "2030-06-03", "num_guests": 0 }),
    ] {
        let response = app
            .as_user(app.client.post(app.url("/bookings")), "guest-1")
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400, "body: {}", body);
    }

    let bookings: Vec<Value> = app
        .as_user(app.client.get(app.url("/bookings")), "guest-1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(bookings.is_empty());
}

#[tokio::test]
async fn upcoming_lists_only_future_active_stays() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Future Villa", "100", 2).await;
    let listing_id = listing["id"].as_str().unwrap();
    app.create_booking("guest-1", listing_id).await;

    let response = app
        .as_user(app.client.post(app.url("/bookings")), "guest-1")
        .json(&json!({ "listing_id": listing_id, "check_in_date": "2020-01-01",
                       "check_out_date": "2020-01-02", "num_guests": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let upcoming: Vec<Value> = app
        .as_user(app.client.get(app.url("/bookings/upcoming")), "guest-1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0]["check_in_date"], "2030-06-01");
}
