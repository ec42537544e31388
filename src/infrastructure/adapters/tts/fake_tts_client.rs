//! Fake TTS Client - 用于测试的 TTS 客户端
//!
//! 不调用外部服务：按文本长度生成一段正弦提示音（WAV），
//! 可配置延迟抖动与失败注入

use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::application::ports::{
    SynthesisRequest, SynthesisResponse, TtsEnginePort, TtsError, VoiceInfo,
};
use crate::domain::PcmAudio;
use crate::infrastructure::adapters::codec::encode_wav;

/// Fake TTS Client 配置
#[derive(Debug, Clone)]
pub struct FakeTtsClientConfig {
    /// 输出采样率
    pub sample_rate: u32,
    /// 每个字符对应的音频时长（毫秒）
    pub ms_per_char: u64,
    /// 基础延迟
    pub latency: Duration,
    /// 额外随机延迟上限
    pub jitter: Duration,
    /// 文本包含该子串时返回服务错误
    pub fail_on: Option<String>,
}

impl Default for FakeTtsClientConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            ms_per_char: 60,
            latency: Duration::from_millis(20),
            jitter: Duration::ZERO,
            fail_on: None,
        }
    }
}

impl FakeTtsClientConfig {
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_on = Some(marker.into());
        self
    }
}

/// Fake TTS Client
///
/// 同一文本总是生成相同的音频；记录调用次数与并发峰值
pub struct FakeTtsClient {
    config: FakeTtsClientConfig,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl FakeTtsClient {
    /// 创建新的 FakeTtsClient
    pub fn new(config: FakeTtsClientConfig) -> Self {
        tracing::info!(
            sample_rate = config.sample_rate,
            ms_per_char = config.ms_per_char,
            fail_on = ?config.fail_on,
            "FakeTtsClient initialized"
        );
        Self {
            config,
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    /// 使用默认配置创建
    pub fn with_defaults() -> Self {
        Self::new(FakeTtsClientConfig::default())
    }

    /// 已收到的合成调用次数
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// 观察到的最大并发调用数
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// 已合成的文本（按调用开始顺序）
    pub fn synthesized_texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .map(|texts| texts.clone())
            .unwrap_or_default()
    }

    /// 文本对应的音频时长
    pub fn expected_duration(&self, text: &str) -> Duration {
        Duration::from_millis(self.config.ms_per_char * text.chars().count() as u64)
    }

    /// 生成提示音，频率由文本决定
    fn render(&self, text: &str) -> PcmAudio {
        let sample_rate = self.config.sample_rate;
        let frames = (self.expected_duration(text).as_secs_f64() * sample_rate as f64) as usize;
        let digest = md5::compute(text.as_bytes());
        let frequency = 200.0 + (digest[0] as f32) * 2.0;

        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (t * frequency * std::f32::consts::TAU).sin() * 0.3
            })
            .collect();

        PcmAudio::new(samples, sample_rate, 1)
    }

    fn delay(&self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        self.config.latency + Duration::from_millis(extra)
    }
}

/// 在途计数守卫
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TtsEnginePort for FakeTtsClient {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Ok(mut texts) = self.texts.lock() {
            texts.push(request.text.clone());
        }

        tracing::debug!(
            text_len = request.text.len(),
            voice = %request.voice,
            "FakeTtsClient: rendering tone"
        );

        let delay = self.delay();
        tokio::time::sleep(delay).await;

        if let Some(marker) = &self.config.fail_on {
            if request.text.contains(marker.as_str()) {
                return Err(TtsError::ServiceError(format!(
                    "injected failure for text containing {:?}",
                    marker
                )));
            }
        }

        let audio = self.render(&request.text);
        Ok(SynthesisResponse {
            audio_data: encode_wav(&audio),
            sample_rate: Some(audio.sample_rate),
        })
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, TtsError> {
        let voice = |short_name: &str, locale: &str, gender: &str| VoiceInfo {
            short_name: short_name.to_string(),
            locale: locale.to_string(),
            gender: Some(gender.to_string()),
            voice_type: Some("Neural".to_string()),
        };

        Ok(vec![
            voice("pt-BR-FranciscaNeural", "pt-BR", "Female"),
            voice("pt-BR-AntonioNeural", "pt-BR", "Male"),
            voice("pt-BR-ThalitaNeural", "pt-BR", "Female"),
            voice("en-US-AriaNeural", "en-US", "Female"),
        ])
    }

    async fn health_check(&self) -> bool {
        true
    }
}
