//! Announces a local service and looks for peers for a few seconds.
//!
//! ```text
//! DISCO_SECRET=lan-secret DISCO_APP_PORT=8080 cargo run --example discover
//! ```

use std::sync::Arc;
use std::time::Duration;

use disco::net::{is_reachable, local_ipv4, DIAL_TIMEOUT};
use disco::{AgentConfig, DiscoveryAgent, DiscoveryContext, DiscoveryHandler, HandlerConfig, DISCOVERY_PORT};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SEARCH_WINDOW: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let secret = std::env::var("DISCO_SECRET").unwrap_or_else(|_| "disco-demo".into());
    let app_port: u16 = std::env::var("DISCO_APP_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8080);
    let local_ip = local_ipv4().await?;

    let context = DiscoveryContext::from_secret(secret.as_bytes())?;
    let agent = DiscoveryAgent::new(
        AgentConfig {
            receive_timeout: Some(Duration::from_secs(1)),
            ..AgentConfig::default()
        },
        context.clone(),
    );
    let (tx, mut rx) = mpsc::channel(16);
    let handler = Arc::new(
        DiscoveryHandler::new(
            context,
            HandlerConfig {
                app_ip: Some(local_ip.clone()),
                app_port: Some(app_port),
                alias: std::env::var("DISCO_ALIAS").ok(),
                ..HandlerConfig::default()
            },
        )
        .with_targets(tx),
    );

    let stop = CancellationToken::new();
    let listener = agent.bind().await?;
    let listening = tokio::spawn(listener.run(Arc::clone(&handler), Some(stop.clone())));

    agent
        .broadcast_request(&handler, &local_ip, DISCOVERY_PORT)
        .await?;

    let deadline = tokio::time::sleep(SEARCH_WINDOW);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(mut target) = rx.recv() => {
                let addr = format!("{}:{}", target.ip, target.port);
                let reachable = is_reachable(&addr, DIAL_TIMEOUT).await;
                target.status = Some(if reachable { "online" } else { "offline" }.into());
                println!("{}", target);
            }
        }
    }

    stop.cancel();
    listening.await??;
    Ok(())
}
