#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ipfs_livestream::run().await
}
