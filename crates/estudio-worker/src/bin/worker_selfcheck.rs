use std::path::Path;

use estudio_worker::{TtsClient, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_ffmpeg()?;
    ensure_env_present(&["REDIS_URL"])?;
    check_tts(&config).await;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    estudio_media::check_ffmpeg()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    estudio_media::check_ffprobe()
        .map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
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

async fn check_tts(config: &WorkerConfig) {
    // Advisory only; the worker can start before the TTS service.
    let client = TtsClient::new(config.tts_base_url.clone());
    match client.health().await {
        Ok(()) => println!("worker-selfcheck: TTS service reachable"),
        Err(e) => println!("worker-selfcheck: TTS service not reachable ({e})"),
    }
}
