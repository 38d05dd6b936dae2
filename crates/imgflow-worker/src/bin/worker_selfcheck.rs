use std::path::Path;

use imgflow_queue::{BrokerConfig, BrokerConnector};
use imgflow_storage::S3Client;
use imgflow_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let connect = std::env::args().any(|arg| arg == "--connect");
    let config = WorkerConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("worker config: {}", e))?;

    println!(
        "worker-selfcheck: starting with raw_dir={} processed_dir={}",
        config.raw_dir.display(),
        config.processed_dir.display()
    );
    ensure_writable(&config.raw_dir).await?;
    ensure_writable(&config.processed_dir).await?;
    ensure_env_present(&["RABBITMQ_URL", "RABBITMQ_QUEUES", "AWS_BUCKET_NAME"])?;

    let broker =
        BrokerConfig::from_env().map_err(|e| anyhow::anyhow!("broker config: {}", e))?;
    println!(
        "worker-selfcheck: {} job queues, {} workers",
        broker.job_queues().count(),
        broker.total_workers()
    );

    if connect {
        let link = BrokerConnector::new(broker.url.clone())
            .connect("imgflow-selfcheck")
            .await
            .map_err(|e| anyhow::anyhow!("broker unreachable: {}", e))?;
        link.close().await;
        println!("worker-selfcheck: broker ok");

        let s3 = S3Client::from_env().await?;
        s3.check_connectivity()
            .await
            .map_err(|e| anyhow::anyhow!("bucket {} unreachable: {}", s3.bucket(), e))?;
        println!("worker-selfcheck: storage ok");
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_writable<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
