#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = picrete_delivery::run().await {
        eprintln!("picrete-delivery fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
