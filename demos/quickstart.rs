use anyhow::Result;
use tracing_subscriber::EnvFilter;
use webpilot::{Credentials, Engine, EngineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = EngineConfig::from_env()?;
    let engine = Engine::connect(cfg, &Credentials::from_env())?;

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| {
            "Find the latest stable Rust release and tell me its version number.".to_string()
        });

    match engine.run(&prompt, &[] as &[&str], None).await? {
        Some(answer) => println!("{answer}"),
        None => println!("no answer within {} steps", engine.config().max_depth),
    }
    Ok(())
}
