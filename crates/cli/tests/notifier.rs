use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use pairlink::UserId;
use pairlink::notify::Notifier;
use pairlink_cli::keepalive::KeepAlive;
use pairlink_cli::notifier::WebhookNotifier;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use url::Url;

type Received = Arc<Mutex<Vec<Value>>>;

async fn record(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
	let failing = body["recipient"] == 13;
	received.lock().await.push(body);
	if failing { StatusCode::INTERNAL_SERVER_ERROR } else { StatusCode::OK }
}

async fn spawn_receiver() -> (Url, Received) {
	let received = Received::default();
	let app = Router::new()
		.route("/hook", post(record).get(|| async { "pairlink is running" }))
		.with_state(Arc::clone(&received));
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
	(Url::parse(&format!("http://{addr}/hook")).unwrap(), received)
}

#[tokio::test]
async fn webhook_receives_text_and_image_payloads() {
	let (url, received) = spawn_receiver().await;
	let notifier = WebhookNotifier::new(url).unwrap();

	notifier.send_text(UserId(7), "Your code is ABCD1234").await.unwrap();
	notifier.send_image(UserId(7), "https://example.com/welcome.jpg", "Welcome").await.unwrap();

	let received = received.lock().await;
	assert_eq!(received.len(), 2);
	assert_eq!(received[0]["kind"], "text");
	assert_eq!(received[0]["recipient"], 7);
	assert_eq!(received[0]["text"], "Your code is ABCD1234");
	assert_eq!(received[1]["kind"], "image");
	assert_eq!(received[1]["url"], "https://example.com/welcome.jpg");
	assert_eq!(received[1]["caption"], "Welcome");
}

#[tokio::test]
async fn webhook_errors_are_reported() {
	let (url, _) = spawn_receiver().await;
	let notifier = WebhookNotifier::new(url).unwrap();
	assert!(notifier.send_text(UserId(13), "hi").await.is_err());
}

#[tokio::test]
async fn keepalive_ping_reports_status() {
	let (url, _) = spawn_receiver().await;
	let status = KeepAlive::new(url).unwrap().ping().await.unwrap();
	assert_eq!(status, reqwest::StatusCode::OK);
}
