mod api;
mod gateway;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

const DEFAULT_SYSTEM_PROMPT: &str = "Bạn là trợ lý AI của cửa hàng màn hình. \
Tư vấn khách hàng chọn màn hình phù hợp, trả lời ngắn gọn bằng tiếng Việt. \
Với giá cụ thể hoặc tồn kho, hãy mời khách xem trang sản phẩm.";

#[derive(Parser)]
#[command(name = "chat-service")]
struct Args {
    #[arg(long, env = "PORT", default_value = "3003")]
    port: u16,

    #[arg(long, env = "AI_GATEWAY_API_KEY")]
    api_key: String,

    #[arg(long, default_value = "https://ai.gateway.lovable.dev/v1/chat/completions")]
    gateway_url: String,

    #[arg(long, default_value = "google/gemini-2.5-flash")]
    model: String,

    #[arg(long, env = "CHAT_SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT)]
    system_prompt: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let gateway = gateway::Gateway::new(args.gateway_url, args.api_key, args.model, args.system_prompt)?;
    let app = api::create_router(api::AppState {
        gateway: Arc::new(gateway),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!("Chat service started on port {}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    Ok(())
}
