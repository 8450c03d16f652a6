#[tokio::main]
async fn main() -> std::io::Result<()> {
    physics_worker::frameworks::server::run_with_config().await
}
