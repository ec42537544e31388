//! Narro - 长文本朗读命令行
//!
//! 子命令:
//! - narrate: 文本 → 单个音频文件
//! - voices: 列出后端音色
//! - cache: 缓存清理与统计

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tokio_util::sync::CancellationToken;

use narro::application::pipeline::{
    NarrationPipeline, NarrationRequest, SynthesisPool, SynthesisPoolConfig,
};
use narro::application::ports::{AudioCachePort, AudioFormat, TtsEnginePort};
use narro::application::VoiceCatalog;
use narro::config::{load_config_from_path, print_config, AppConfig, LogConfig, TtsBackend};
use narro::domain::{SpeedFactor, VoiceId};
use narro::infrastructure::adapters::{
    FakeTtsClient, HttpTtsClient, HttpTtsClientConfig, SymphoniaCodec,
};
use narro::infrastructure::events::TracingProgressReporter;
use narro::infrastructure::persistence::FileAudioCache;

fn cli() -> Command {
    Command::new("narro")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Turns long texts into a single narrated audio file")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .subcommand(
            Command::new("narrate")
                .about("Narrate a UTF-8 text file")
                .arg(
                    Arg::new("input")
                        .value_name("FILE")
                        .help("Input text file")
                        .value_parser(clap::value_parser!(PathBuf))
                        .required(true),
                )
                .arg(
                    Arg::new("voice")
                        .short('v')
                        .long("voice")
                        .value_name("VOICE")
                        .help("Voice identifier, e.g. pt-BR-FranciscaNeural")
                        .required(true),
                )
                .arg(
                    Arg::new("speed")
                        .short('s')
                        .long("speed")
                        .value_name("FLOAT")
                        .help("Speed factor (1.0-2.0), defaults to pipeline.default_speed")
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Output file, defaults to <input>_<speed>x.<ext>")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("voices")
                .about("List available voices")
                .arg(
                    Arg::new("locale")
                        .short('l')
                        .long("locale")
                        .value_name("LOCALE")
                        .help("Only voices of this locale, e.g. pt-BR"),
                )
                .arg(
                    Arg::new("refresh")
                        .long("refresh")
                        .help("Refetch the catalog from the backend")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("cache")
                .about("Inspect or clean the synthesis cache")
                .subcommand_required(true)
                .subcommand(Command::new("clean").about("Evict old entries when over budget"))
                .subcommand(Command::new("stats").about("Print cache statistics")),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config_path = matches.get_one::<PathBuf>("config").map(PathBuf::as_path);
    let config = load_config_from_path(config_path).context("Failed to load config")?;

    init_tracing(&config.log);
    print_config(&config);

    match matches.subcommand() {
        Some(("narrate", sub)) => narrate(&config, sub).await,
        Some(("voices", sub)) => voices(&config, sub).await,
        Some(("cache", sub)) => cache(&config, sub).await,
        _ => Ok(()),
    }
}

/// 初始化日志；日志写到 stderr，stdout 只输出结果
fn init_tracing(log: &LogConfig) {
    let log_filter = format!("{},narro={}", log.level, log.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter));

    if log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// 根据配置创建合成后端
fn build_engine(config: &AppConfig) -> anyhow::Result<Arc<dyn TtsEnginePort>> {
    let engine: Arc<dyn TtsEnginePort> = match config.tts.backend {
        TtsBackend::Http => {
            let tts_config = HttpTtsClientConfig {
                base_url: config.tts.url.clone(),
                timeout_secs: config.tts.timeout_secs,
                max_retries: config.tts.max_retries,
                retry_backoff_ms: config.tts.retry_backoff_ms,
            };
            Arc::new(HttpTtsClient::new(tts_config)?)
        }
        TtsBackend::Fake => Arc::new(FakeTtsClient::with_defaults()),
    };
    Ok(engine)
}

async fn open_cache(config: &AppConfig) -> anyhow::Result<Arc<FileAudioCache>> {
    let cache = FileAudioCache::open(&config.cache.dir, config.cache.max_size_bytes)
        .await
        .with_context(|| format!("Failed to open cache at {}", config.cache.dir.display()))?;
    Ok(cache.arc())
}

/// 默认输出路径: 与输入同目录，`<stem>_<speed>x.<ext>`
fn default_output_path(input: &Path, speed: SpeedFactor, format: AudioFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "narration".to_string());
    input.with_file_name(format!("{}_{}x.{}", stem, speed, format.extension()))
}

async fn narrate(config: &AppConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let input = matches
        .get_one::<PathBuf>("input")
        .context("missing input file")?;
    let voice = VoiceId::new(
        matches
            .get_one::<String>("voice")
            .context("missing voice")?
            .as_str(),
    )?;
    let speed = SpeedFactor::new(
        matches
            .get_one::<f64>("speed")
            .copied()
            .unwrap_or(config.pipeline.default_speed),
    )?;
    let output_path = matches
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| default_output_path(input, speed, config.audio.output_format));

    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    let cache = open_cache(config).await?;
    if let Err(e) = cache.cleanup().await {
        tracing::warn!(error = %e, "Startup cache cleanup failed");
    }

    let pool = SynthesisPool::new(
        build_engine(config)?,
        SynthesisPoolConfig {
            max_concurrent: config.pipeline.max_concurrent,
            acquire_timeout: Duration::from_secs(config.pipeline.acquire_timeout_secs),
        },
    )
    .arc();
    let pipeline = NarrationPipeline::new(
        cache.clone(),
        pool,
        Arc::new(SymphoniaCodec::new()),
        config.pipeline_settings(),
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt, cancelling after in-flight calls");
            signal_token.cancel();
        }
    });

    let request = NarrationRequest {
        text,
        voice,
        speed,
        output_path,
    };
    let result = pipeline
        .run(request, &TracingProgressReporter, &cancel)
        .await;

    if config.cache.cleanup_on_exit {
        if let Err(e) = cache.cleanup().await {
            tracing::warn!(error = %e, "Exit cache cleanup failed");
        }
    }

    match result {
        Ok(outcome) => {
            println!("Output:      {}", outcome.output_path.display());
            println!("Duration:    {:.1}s", outcome.audio_duration.as_secs_f64());
            println!("Chunks:      {}", outcome.chunk_count);
            println!("Cache hits:  {}", outcome.cache_hits);
            println!("Synthesized: {}", outcome.synthesized);
            println!("Elapsed:     {:.2?}", outcome.elapsed);
            Ok(())
        }
        Err(e) => {
            let location = e
                .chunk_index()
                .map(|index| format!(" at chunk {}", index))
                .unwrap_or_default();
            Err(anyhow::Error::new(e).context(format!("Narration failed{}", location)))
        }
    }
}

async fn voices(config: &AppConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let catalog = VoiceCatalog::new(build_engine(config)?);

    if matches.get_flag("refresh") {
        catalog.refresh().await?;
    }
    let voices = match matches.get_one::<String>("locale") {
        Some(locale) => catalog.by_locale(locale).await?,
        None => catalog.voices().await?.as_ref().clone(),
    };

    for (i, voice) in voices.iter().enumerate() {
        println!(
            "[{}] {} ({}, {})",
            i,
            voice.short_name,
            voice.gender.as_deref().unwrap_or("-"),
            voice.voice_type.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn cache(config: &AppConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let cache = open_cache(config).await?;

    match matches.subcommand() {
        Some(("clean", _)) => {
            let report = cache.cleanup().await?;
            println!(
                "Removed {} entries, freed {} bytes, {} bytes remain",
                report.removed_entries, report.freed_bytes, report.remaining_bytes
            );
        }
        Some(("stats", _)) => {
            let stats = cache.stats().await;
            println!("Directory: {}", cache.dir().display());
            println!("Entries:   {}", stats.total_entries);
            println!(
                "Size:      {} / {} bytes",
                stats.total_size_bytes, stats.max_size_bytes
            );
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_default_output_path() {
        let speed = SpeedFactor::new(1.4).unwrap();
        let path = default_output_path(Path::new("books/dom_casmurro.txt"), speed, AudioFormat::Mp3);
        assert_eq!(path, PathBuf::from("books/dom_casmurro_1.4x.mp3"));

        let path = default_output_path(Path::new("books/dom_casmurro.txt"), speed, AudioFormat::Opus);
        assert_eq!(path, PathBuf::from("books/dom_casmurro_1.4x.ogg"));
    }

    #[test]
    fn test_narrate_args() {
        let matches = cli()
            .try_get_matches_from(["narro", "narrate", "in.txt", "--voice", "pt-BR-A", "-s", "1.5"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "narrate");
        assert_eq!(sub.get_one::<f64>("speed"), Some(&1.5));
        assert_eq!(sub.get_one::<String>("voice").map(String::as_str), Some("pt-BR-A"));
    }
}
