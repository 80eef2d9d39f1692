mod common;

use common::TestApp;
use serde_json::{json, Value};

#[tokio::test]
async fn listing_slug_survives_title_edits() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Café Crème Loft", "75.5", 2).await;
    assert_eq!(listing["slug"], "cafe-creme-loft");
    assert_eq!(listing["price_per_night"], "75.50");

    let response = app
        .as_staff(app.client.patch(app.url("/listings/cafe-creme-loft")))
        .json(&json!({ "title": "Renamed Loft", "price_per_night": "90" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["title"], "Renamed Loft");
    assert_eq!(updated["slug"], "cafe-creme-loft");

    let response = app
        .client
        .get(app.url("/listings/cafe-creme-loft"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn duplicate_slug_conflicts() {
    let app = TestApp::spawn().await;
    app.create_listing("Sea View", "100", 2).await;

    let response = app
        .as_staff(app.client.post(app.url("/listings")))
        .json(&json!({
            "title": "Sea  View!",
            "listing_type": "apartment",
            "price_per_night": "80",
            "location": "Adama",
            "max_guests": 2
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn listing_writes_need_staff() {
    let app = TestApp::spawn().await;

    let response = app
        .as_user(app.client.post(app.url("/listings")), "guest-1")
        .json(&json!({
            "title": "Sneaky",
            "listing_type": "hotel",
            "price_per_night": "10",
            "location": "Nowhere",
            "max_guests": 1
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .client
        .post(app.url("/amenities"))
        .json(&json!({ "name": "Wifi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn invalid_listing_payload_is_unprocessable() {
    let app = TestApp::spawn().await;

    let response = app
        .as_staff(app.client.post(app.url("/listings")))
        .json(&json!({
            "title": "",
            "listing_type": "hotel",
            "price_per_night": "10",
            "location": "Addis Ababa",
            "max_guests": 0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);
}

#[tokio::test]
async fn out_of_range_price_is_rejected() {
    let app = TestApp::spawn().await;

    for price in ["-1", "1000000000.01"] {
        let response = app
            .as_staff(app.client.post(app.url("/listings")))
            .json(&json!({
                "title": "Palace",
                "listing_type": "villa",
                "price_per_night": price,
                "location": "Gondar",
                "max_guests": 2
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400, "price {}", price);
    }

    let listings: Value = app
        .client
        .get(app.url("/listings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listings.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn amenities_attach_once() {
    let app = TestApp::spawn().await;
    app.create_listing("Garden House", "60", 3).await;

    let amenity: Value = app
        .as_staff(app.client.post(app.url("/amenities")))
        .json(&json!({ "name": "Wifi", "icon": "fa-wifi" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let attach = || {
        app.as_staff(app.client.post(app.url("/listings/garden-house/amenities")))
            .json(&json!({ "amenity_id": amenity["id"] }))
            .send()
    };

    let response = attach().await.unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let listing: Value = response.json().await.unwrap();
    assert_eq!(listing["amenities"][0]["name"], "Wifi");

    assert_eq!(attach().await.unwrap().status().as_u16(), 409);

    let listing: Value = app
        .client
        .get(app.url("/listings/garden-house"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["amenities"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn listing_filters_and_featured() {
    let app = TestApp::spawn().await;
    for i in 0..7 {
        app.create_listing(&format!("Villa {}", i), "100", i + 1).await;
    }
    app.as_staff(app.client.patch(app.url("/listings/villa-6")))
        .json(&json!({ "is_available": false }))
        .send()
        .await
        .unwrap();

    let featured: Vec<Value> = app
        .client
        .get(app.url("/listings/featured"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(featured.len(), 5);
    assert!(featured.iter().all(|l| l["is_available"] == true));

    let roomy: Vec<Value> = app
        .client
        .get(app.url("/listings?min_guests=5&available=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let slugs: Vec<&str> = roomy.iter().map(|l| l["slug"].as_str().unwrap()).collect();
    assert_eq!(slugs.len(), 2);
    assert!(slugs.contains(&"villa-4") && slugs.contains(&"villa-5"));
}

#[tokio::test]
async fn one_review_per_user_and_listing() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Review Villa", "100", 2).await;
    let listing_id = listing["id"].as_str().unwrap();

    let review = |rating: u8| {
        app.as_user(app.client.post(app.url("/reviews")), "guest-1")
            .json(&json!({ "listing_id": listing_id, "rating": rating, "comment": "Lovely" }))
            .send()
    };

    assert_eq!(review(5).await.unwrap().status().as_u16(), 201);
    assert_eq!(review(4).await.unwrap().status().as_u16(), 409);
    assert_eq!(review(9).await.unwrap().status().as_u16(), 422);

    let top: Vec<Value> = app
        .client
        .get(app.url("/reviews/top-rated"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(top.len(), 1);

    let mine: Vec<Value> = app
        .as_user(app.client.get(app.url("/reviews/mine")), "guest-1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn review_booking_link_must_match() {
    let app = TestApp::spawn().await;
    let villa = app.create_listing("Linked Villa", "100", 2).await;
    let other = app.create_listing("Other Villa", "100", 2).await;
    let booking = app
        .create_booking("guest-1", villa["id"].as_str().unwrap())
        .await;

    let response = app
        .as_user(app.client.post(app.url("/reviews")), "guest-1")
        .json(&json!({
            "listing_id": other["id"],
            "booking_id": booking["id"],
            "rating": 4,
            "comment": "Wrong place"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .as_user(app.client.post(app.url("/reviews")), "guest-2")
        .json(&json!({
            "listing_id": villa["id"],
            "booking_id": booking["id"],
            "rating": 4,
            "comment": "Not my stay"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = app
        .as_user(app.client.post(app.url("/reviews")), "guest-1")
        .json(&json!({
            "listing_id": villa["id"],
            "booking_id": booking["id"],
            "rating": 4,
            "comment": "Great stay"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn only_author_or_staff_edit_reviews() {
    let app = TestApp::spawn().await;
    let listing = app.create_listing("Edit Villa", "100", 2).await;

    let review: Value = app
        .as_user(app.client.post(app.url("/reviews")), "guest-1")
        .json(&json!({ "listing_id": listing["id"], "rating": 3, "comment": "Fine" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let url = app.url(&format!("/reviews/{}", review["id"].as_str().unwrap()));

    let response = app
        .as_user(app.client.patch(&url), "guest-2")
        .json(&json!({ "rating": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .as_user(app.client.patch(&url), "guest-1")
        .json(&json!({ "rating": 4 }))
        .send()
        .await
        .unwrap();
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["rating"], 4);
    assert_eq!(updated["comment"], "Fine");

    let response = app.as_staff(app.client.delete(&url)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let response = app.client.get(&url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
