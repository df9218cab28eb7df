#[tokio::main]
async fn main() -> anyhow::Result<()> {
    thermostat_controller::host::run().await
}
