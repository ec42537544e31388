//! PCM 音频值对象与基础变换
//!
//! 样本为交错排列的 f32，范围 [-1.0, 1.0]

use std::time::Duration;

/// 解码后的 PCM 音频
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    /// 交错样本
    pub samples: Vec<f32>,
    /// 采样率
    pub sample_rate: u32,
    /// 声道数
    pub channels: u16,
}

impl PcmAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// 指定时长的静音
    pub fn silence(sample_rate: u32, channels: u16, duration: Duration) -> Self {
        let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    /// 每声道帧数
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// 线性插值重采样
///
/// `ratio = 输出帧数 / 输入帧数`，`ratio > 0`
pub fn resample_by_ratio(samples: &[f32], channels: u16, ratio: f64) -> Vec<f32> {
    let channel_count = channels.max(1) as usize;
    let frame_count = samples.len() / channel_count;
    if frame_count == 0 || !(ratio > 0.0) {
        return Vec::new();
    }
    if (ratio - 1.0).abs() < f64::EPSILON {
        return samples[..frame_count * channel_count].to_vec();
    }

    let new_frame_count = (frame_count as f64 * ratio).round() as usize;
    let mut resampled = Vec::with_capacity(new_frame_count * channel_count);

    for i in 0..new_frame_count {
        let src_pos = i as f64 / ratio;
        let src_idx = (src_pos as usize).min(frame_count - 1);
        let frac = (src_pos - src_idx as f64).clamp(0.0, 1.0) as f32;
        let next_idx = (src_idx + 1).min(frame_count - 1);

        for ch in 0..channel_count {
            let s0 = samples[src_idx * channel_count + ch];
            let s1 = samples[next_idx * channel_count + ch];
            resampled.push(s0 + (s1 - s0) * frac);
        }
    }

    resampled
}

/// 采样率转换
pub fn resample(audio: &PcmAudio, to_rate: u32) -> PcmAudio {
    if audio.sample_rate == to_rate || audio.sample_rate == 0 {
        return audio.clone();
    }
    let ratio = to_rate as f64 / audio.sample_rate as f64;
    PcmAudio::new(
        resample_by_ratio(&audio.samples, audio.channels, ratio),
        to_rate,
        audio.channels,
    )
}

/// 变速（变调）
///
/// 把原始采样率重新解释为 `rate * speed` 后再以原采样率重采样：
/// 时长变为 `原时长 / speed`，音调随之升高。不做保持音调的时间伸缩。
pub fn change_tempo(audio: &PcmAudio, speed: f64) -> PcmAudio {
    if (speed - 1.0).abs() < f64::EPSILON {
        return audio.clone();
    }
    PcmAudio::new(
        resample_by_ratio(&audio.samples, audio.channels, 1.0 / speed),
        audio.sample_rate,
        audio.channels,
    )
}

/// 声道转换：多声道取平均混为单声道，单声道复制为多声道
pub fn remix_channels(audio: &PcmAudio, to_channels: u16) -> PcmAudio {
    if audio.channels == to_channels || audio.channels == 0 || to_channels == 0 {
        return audio.clone();
    }
    let from = audio.channels as usize;
    let to = to_channels as usize;
    let mut samples = Vec::with_capacity(audio.frames() * to);

    for frame in audio.samples.chunks_exact(from) {
        if to == 1 {
            samples.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            samples.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            let mono = frame.iter().sum::<f32>() / from as f32;
            samples.extend((0..to).map(|ch| frame.get(ch).copied().unwrap_or(mono)));
        }
    }

    PcmAudio::new(samples, audio.sample_rate, to_channels)
}
