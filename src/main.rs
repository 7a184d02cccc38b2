#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    lineblocs_api::server::start().await
}
