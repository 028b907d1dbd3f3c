#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let rating_url = std::env::var("RATING_SERVICE_URL").ok();
    if rating_url.is_none() {
        tracing::warn!("RATING_SERVICE_URL not set, match results will not be reported");
    }

    let (app, _state) = chess_server::build_app(rating_url);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tracing::info!(%addr, "chess session server listening");

    axum::serve(listener, app).await.expect("Server error");
}
