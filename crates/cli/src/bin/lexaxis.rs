use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    lexaxis_cli::main_entry().await
}
