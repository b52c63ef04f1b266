use tokio_util::sync::CancellationToken;

mod config;
// Only the FFmpeg path can feed a pipe from a media file.
#[cfg(any(test, feature = "ffmpeg"))]
mod pipe;

use config::PipeConfig;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("frame_bus", log::LevelFilter::Debug)
        .filter_module("bitrate_tee", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let media = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: bitrate-tee <media> [config.json]"))?;
    let config = match args.next() {
        Some(path) => PipeConfig::from_json_file(&path)?,
        None => PipeConfig::default(),
    };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("ctrl-c received, stopping");
            cancel_clone.cancel();
        }
    });

    run(&media, config, cancel).await
}

#[cfg(feature = "ffmpeg")]
async fn run(
    media: &str,
    mut config: PipeConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    use frame_bus::{Encoder, LogReporter};
    use frame_bus::ffmpeg::{FfmpegDecoder, FfmpegEncoder};

    frame_bus::ffmpeg::init()?;
    let decoder = FfmpegDecoder::open(media)?;
    if config.framerate.is_none() {
        config.framerate = decoder.frame_rate();
    }

    let summary = pipe::Pipe::new(config)
        .with_reporter(std::sync::Arc::new(LogReporter))
        .with_cancel(cancel)
        .run(Box::new(decoder), |_| {
            Ok(Box::new(FfmpegEncoder::new()) as Box<dyn Encoder>)
        })
        .await?;

    log::info!("{}: {}", media, summary);
    if summary.failed() == summary.branches.len() {
        anyhow::bail!("every branch failed");
    }
    Ok(())
}

#[cfg(not(feature = "ffmpeg"))]
async fn run(
    media: &str,
    _config: PipeConfig,
    _cancel: CancellationToken,
) -> anyhow::Result<()> {
    anyhow::bail!(
        "cannot open {}: bitrate-tee was built without the `ffmpeg` feature",
        media
    )
}
