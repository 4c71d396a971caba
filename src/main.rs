#![deny(clippy::all, clippy::pedantic)]

use std::env;

use linkspan::setup;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let app = setup().await;

    let port = env::var("PORT").expect("Expected PORT as an environment variable");
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await.unwrap();

    axum::serve(listener, app).await.unwrap();
}
