use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    selfheal_cli::cli::app::run().await
}
