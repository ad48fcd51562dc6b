mod cycle;
mod error;
mod host;
mod platform;
mod store;
mod tariff;
mod weather;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
