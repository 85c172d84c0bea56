use mock_server::{ProxyState, Toggle, DEFAULT_CLIENT_KEY};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn seed_toggles() -> Vec<Toggle> {
    vec![
        Toggle {
            name: "new-checkout".to_string(),
            enabled: true,
            variant: None,
            impression_data: Some(false),
        },
        Toggle {
            name: "dark-mode".to_string(),
            enabled: false,
            variant: None,
            impression_data: None,
        },
    ]
}

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let client_key = std::env::var("CLIENT_KEY").unwrap_or_else(|_| DEFAULT_CLIENT_KEY.to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    mock_server::run_with(listener, ProxyState::new(&client_key, seed_toggles())).await
}
