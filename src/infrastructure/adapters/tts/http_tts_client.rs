//! HTTP TTS Client - 调用外部 TTS HTTP 服务
//!
//! 实现 TtsEnginePort trait，通过 HTTP 调用外部 TTS 服务
//!
//! 外部 TTS API:
//! POST {base_url}/api/tts/synthesize
//! Request: {"text": "...", "voice": "pt-BR-FranciscaNeural"}  (JSON)
//! Response: 音频二进制（WAV/MP3），采样率在 `X-TTS-Sample-Rate` header 中
//!
//! GET {base_url}/api/tts/voices
//! Response: [{"short_name": "...", "locale": "...", ...}]  (JSON)

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::application::ports::{
    SynthesisRequest, SynthesisResponse, TtsEnginePort, TtsError, VoiceInfo,
};

/// TTS 合成请求体 (JSON)
#[derive(Debug, Serialize)]
struct TtsHttpRequest<'a> {
    /// 要合成的文本
    text: &'a str,
    /// 音色标识
    voice: &'a str,
}

/// HTTP TTS 客户端配置
#[derive(Debug, Clone)]
pub struct HttpTtsClientConfig {
    /// TTS 服务基础 URL
    pub base_url: String,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
    /// 传输层失败的重试次数（0 表示不重试）
    pub max_retries: u32,
    /// 重试间隔基数（毫秒）
    pub retry_backoff_ms: u64,
}

impl Default for HttpTtsClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 120,
            max_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

impl HttpTtsClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// 第 `attempt` 次重试前的等待时间（线性递增）
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }
}

/// HTTP TTS 客户端
///
/// 通过 HTTP 调用外部 TTS 服务
pub struct HttpTtsClient {
    client: Client,
    config: HttpTtsClientConfig,
}

impl HttpTtsClient {
    /// 创建新的 HTTP TTS 客户端
    pub fn new(config: HttpTtsClientConfig) -> Result<Self, TtsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TtsError::NetworkError(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// 使用默认配置创建客户端
    pub fn with_default_config() -> Result<Self, TtsError> {
        Self::new(HttpTtsClientConfig::default())
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// 获取合成 URL
    fn synthesize_url(&self) -> String {
        format!("{}/api/tts/synthesize", self.base_url())
    }

    /// 获取音色列表 URL
    fn voices_url(&self) -> String {
        format!("{}/api/tts/voices", self.base_url())
    }

    /// 获取健康检查 URL
    fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }

    /// 单次合成请求
    async fn synthesize_once(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, TtsError> {
        let http_request = TtsHttpRequest {
            text: &request.text,
            voice: request.voice.as_str(),
        };

        let response = self
            .client
            .post(self.synthesize_url())
            .json(&http_request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TtsError::VoiceNotFound(request.voice.to_string()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TtsError::ServiceError(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let sample_rate = response
            .headers()
            .get("X-TTS-Sample-Rate")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let audio_data = response
            .bytes()
            .await
            .map_err(|e| TtsError::InvalidResponse(format!("Failed to read audio: {}", e)))?
            .to_vec();

        if audio_data.is_empty() {
            return Err(TtsError::InvalidResponse("Empty audio body".to_string()));
        }

        Ok(SynthesisResponse {
            audio_data,
            sample_rate,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> TtsError {
    if e.is_timeout() {
        TtsError::Timeout
    } else if e.is_connect() {
        TtsError::NetworkError(format!("Cannot connect to TTS service: {}", e))
    } else {
        TtsError::NetworkError(e.to_string())
    }
}

#[async_trait]
impl TtsEnginePort for HttpTtsClient {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisResponse, TtsError> {
        tracing::debug!(
            url = %self.synthesize_url(),
            text_len = request.text.len(),
            voice = %request.voice,
            "Sending TTS synthesize request"
        );

        let mut attempt = 0;
        loop {
            match self.synthesize_once(&request).await {
                Ok(response) => {
                    tracing::debug!(
                        sample_rate = ?response.sample_rate,
                        audio_size = response.audio_data.len(),
                        "TTS synthesis completed"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "TTS request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, TtsError> {
        let response = self
            .client
            .get(self.voices_url())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TtsError::ServiceError(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        response
            .json::<Vec<VoiceInfo>>()
            .await
            .map_err(|e| TtsError::InvalidResponse(format!("Invalid voice list: {}", e)))
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.health_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VoiceId;

    #[test]
    fn test_config_default() {
        let config = HttpTtsClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_config_builder() {
        let config = HttpTtsClientConfig::new("http://example.com:9000")
            .with_timeout(60)
            .with_retries(2, 100);
        assert_eq!(config.base_url, "http://example.com:9000");
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
    }

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let client = HttpTtsClient::new(HttpTtsClientConfig::new("http://tts:8000/")).unwrap();
        assert_eq!(client.synthesize_url(), "http://tts:8000/api/tts/synthesize");
        assert_eq!(client.voices_url(), "http://tts:8000/api/tts/voices");
    }

    #[test]
    fn test_request_body_shape() {
        let voice = VoiceId::new("pt-BR-FranciscaNeural").unwrap();
        let body = TtsHttpRequest {
            text: "Olá.",
            voice: voice.as_str(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["text"], "Olá.");
        assert_eq!(json["voice"], "pt-BR-FranciscaNeural");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        // 端口 9 (discard) 通常无人监听
        let config = HttpTtsClientConfig::new("http://127.0.0.1:9").with_timeout(2);
        let client = HttpTtsClient::new(config).unwrap();
        let request = SynthesisRequest {
            text: "Olá.".to_string(),
            voice: VoiceId::new("v").unwrap(),
        };

        let err = client.synthesize(request).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!client.health_check().await);
    }
}
