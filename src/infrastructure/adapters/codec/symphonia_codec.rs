//! Symphonia Codec - 基于 symphonia / lame / opus / ogg 的音频编解码器
//!
//! 支持：
//! - WAV / MP3 解码为交错 f32 PCM（symphonia）
//! - PCM → MP3 (CBR) 编码（LAME）
//! - PCM → Opus (OGG 容器) 编码
//! - PCM → WAV (PCM16) 编码

use mp3lame_encoder::{Bitrate, FlushNoGap, InterleavedPcm, MonoPcm, Quality};
use ogg::writing::PacketWriter;
use opus::{Application, Channels, Encoder};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::application::ports::{
    AudioCodecPort, AudioEncoding, AudioFormat, CodecError, EncodeSettings,
};
use crate::domain::audio::{remix_channels, resample};
use crate::domain::PcmAudio;

/// Opus 帧长（毫秒）
const OPUS_FRAME_MS: usize = 20;
/// Opus 单包最大字节数
const OPUS_MAX_PACKET: usize = 4000;
/// RFC 7845: granule position 以 48kHz 计
const OPUS_GRANULE_RATE: u32 = 48_000;
/// LAME 要求 flush 缓冲至少 7200 字节
const MP3_FLUSH_BUFFER: usize = 7200;

/// 基于 symphonia 的编解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaCodec;

impl SymphoniaCodec {
    pub fn new() -> Self {
        Self
    }

    /// 使用 symphonia 解码为 PCM
    fn decode_to_pcm(&self, data: &[u8]) -> Result<PcmAudio, CodecError> {
        let encoding = self.detect_encoding(data);
        let cursor = Cursor::new(data.to_vec());
        let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        match encoding {
            Some(AudioEncoding::Wav) => {
                hint.with_extension("wav");
            }
            Some(AudioEncoding::Mp3) => {
                hint.with_extension("mp3");
            }
            Some(other) => {
                return Err(CodecError::UnsupportedFormat(other.as_str().to_string()));
            }
            None => {
                return Err(CodecError::InvalidInput(
                    "Unrecognized audio payload".to_string(),
                ));
            }
        }

        let detected = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| CodecError::DecodingError(format!("Unrecognized container: {}", e)))?;

        let mut format = detected.format;

        let track = format
            .default_track()
            .ok_or_else(|| CodecError::DecodingError("No audio track found".to_string()))?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| CodecError::DecodingError(format!("Decoder creation failed: {}", e)))?;

        let mut sample_rate = track.codec_params.sample_rate;
        let mut channels = track.codec_params.channels.map(|c| c.count() as u16);
        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    return Err(CodecError::DecodingError(format!(
                        "Packet read error: {}",
                        e
                    )));
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!("Decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(CodecError::DecodingError(format!("Decode failed: {}", e)));
                }
            };

            let spec = *decoded.spec();
            sample_rate.get_or_insert(spec.rate);
            channels.get_or_insert(spec.channels.count() as u16);

            let num_frames = decoded.frames();
            let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            let actual_samples = num_frames * spec.channels.count();
            samples.extend(&sample_buf.samples()[..actual_samples]);
        }

        let sample_rate = sample_rate
            .ok_or_else(|| CodecError::DecodingError("Unknown sample rate".to_string()))?;
        let channels = channels
            .ok_or_else(|| CodecError::DecodingError("Unknown channel count".to_string()))?;

        if samples.is_empty() {
            return Err(CodecError::DecodingError(
                "Decoded stream is empty".to_string(),
            ));
        }

        Ok(PcmAudio::new(samples, sample_rate, channels))
    }

    /// 将 PCM f32 样本编码为固定码率 MP3
    fn encode_mp3(&self, pcm: &PcmAudio, bitrate: u32) -> Result<Vec<u8>, CodecError> {
        let pcm = if pcm.channels > 2 {
            remix_channels(pcm, 2)
        } else {
            pcm.clone()
        };
        let pcm = resample(&pcm, mp3_compatible_sample_rate(pcm.sample_rate));

        let encode_error = |stage: &str, detail: String| {
            CodecError::EncodingError(format!("MP3 {}: {}", stage, detail))
        };

        let mut builder = mp3lame_encoder::Builder::new()
            .ok_or_else(|| encode_error("init", "failed to allocate LAME encoder".to_string()))?;
        builder
            .set_num_channels(pcm.channels as u8)
            .map_err(|e| encode_error("channels", format!("{:?}", e)))?;
        builder
            .set_sample_rate(pcm.sample_rate)
            .map_err(|e| encode_error("sample rate", format!("{:?}", e)))?;
        builder
            .set_brate(mp3_bitrate(bitrate))
            .map_err(|e| encode_error("bitrate", format!("{:?}", e)))?;
        builder
            .set_quality(Quality::Best)
            .map_err(|e| encode_error("quality", format!("{:?}", e)))?;
        let mut encoder = builder
            .build()
            .map_err(|e| encode_error("init", format!("{:?}", e)))?;

        let pcm_i16 = to_i16(&pcm.samples);
        let mut mp3_data = Vec::new();
        mp3_data.reserve(mp3lame_encoder::max_required_buffer_size(pcm.samples.len()));

        let encoded = if pcm.channels == 1 {
            encoder.encode_to_vec(MonoPcm(&pcm_i16), &mut mp3_data)
        } else {
            encoder.encode_to_vec(InterleavedPcm(&pcm_i16), &mut mp3_data)
        };
        encoded.map_err(|e| encode_error("encode", format!("{:?}", e)))?;

        mp3_data.reserve(MP3_FLUSH_BUFFER);
        encoder
            .flush_to_vec::<FlushNoGap>(&mut mp3_data)
            .map_err(|e| encode_error("flush", format!("{:?}", e)))?;

        Ok(mp3_data)
    }

    /// 将 PCM f32 样本编码为 Opus (OGG 容器)
    fn encode_opus(&self, pcm: &PcmAudio, bitrate: u32) -> Result<Vec<u8>, CodecError> {
        // Opus 仅支持单声道或立体声
        let pcm = if pcm.channels > 2 {
            remix_channels(pcm, 2)
        } else {
            pcm.clone()
        };

        // Opus 支持的采样率: 8000, 12000, 16000, 24000, 48000
        let target_sample_rate = opus_compatible_sample_rate(pcm.sample_rate);
        let pcm = resample(&pcm, target_sample_rate);
        let sample_rate = pcm.sample_rate;

        let (channels, channel_count) = if pcm.channels == 1 {
            (Channels::Mono, 1usize)
        } else {
            (Channels::Stereo, 2usize)
        };

        let mut encoder = Encoder::new(sample_rate, channels, Application::Voip).map_err(|e| {
            CodecError::EncodingError(format!("Failed to create Opus encoder: {}", e))
        })?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| CodecError::EncodingError(format!("Failed to set bitrate: {}", e)))?;

        // 编码器延迟 (lookahead)，以输入采样率计
        let lookahead = encoder.get_lookahead().map(|l| l as usize).unwrap_or(120);

        let pcm_i16 = to_i16(&pcm.samples);

        let frame_size = (sample_rate as usize * OPUS_FRAME_MS) / 1000;
        let samples_per_frame = frame_size * channel_count;

        let granule_scale = OPUS_GRANULE_RATE as f64 / sample_rate as f64;
        let frame_granule = (frame_size as f64 * granule_scale) as u64;
        let pre_skip_48k = (lookahead as f64 * granule_scale) as u64;

        let mut ogg_data = Vec::new();
        {
            let mut packet_writer = PacketWriter::new(&mut ogg_data);
            let serial = 0;

            let opus_head = create_opus_head(channel_count as u8, sample_rate, pre_skip_48k as u16);
            packet_writer
                .write_packet(opus_head, serial, ogg::PacketWriteEndInfo::EndPage, 0)
                .map_err(|e| {
                    CodecError::EncodingError(format!("Failed to write Opus head: {}", e))
                })?;

            packet_writer
                .write_packet(create_opus_tags(), serial, ogg::PacketWriteEndInfo::EndPage, 0)
                .map_err(|e| {
                    CodecError::EncodingError(format!("Failed to write Opus tags: {}", e))
                })?;

            let mut output_buf = vec![0u8; OPUS_MAX_PACKET];
            let mut granule_pos: u64 = 0;

            // 末尾追加足够的静音帧以冲出编码器缓冲
            let flush_frames = (lookahead * channel_count + samples_per_frame - 1) / samples_per_frame;
            let silence_frame = vec![0i16; samples_per_frame];
            let audio_frames = pcm_i16.chunks(samples_per_frame).map(|chunk| {
                if chunk.len() < samples_per_frame {
                    let mut padded = chunk.to_vec();
                    padded.resize(samples_per_frame, 0);
                    padded
                } else {
                    chunk.to_vec()
                }
            });
            let frames: Vec<Vec<i16>> = audio_frames
                .chain(std::iter::repeat(silence_frame).take(flush_frames.max(1)))
                .collect();
            let total_frames = frames.len();

            // 最终 granule 位置 = pre-skip + 实际样本数，播放端据此裁掉填充
            let end_granule = pre_skip_48k + (pcm.frames() as f64 * granule_scale) as u64;

            for (frame_idx, frame) in frames.iter().enumerate() {
                let encoded_len = encoder
                    .encode(frame, &mut output_buf)
                    .map_err(|e| CodecError::EncodingError(format!("Opus encode failed: {}", e)))?;

                let is_last = frame_idx + 1 == total_frames;
                granule_pos += frame_granule;
                let (end_info, position) = if is_last {
                    // 不得小于前一包的位置
                    let floor = granule_pos - frame_granule;
                    (ogg::PacketWriteEndInfo::EndStream, end_granule.max(floor))
                } else {
                    (ogg::PacketWriteEndInfo::NormalPacket, granule_pos)
                };

                packet_writer
                    .write_packet(output_buf[..encoded_len].to_vec(), serial, end_info, position)
                    .map_err(|e| {
                        CodecError::EncodingError(format!("Failed to write Opus packet: {}", e))
                    })?;
            }
        }

        Ok(ogg_data)
    }
}

impl AudioCodecPort for SymphoniaCodec {
    fn detect_encoding(&self, data: &[u8]) -> Option<AudioEncoding> {
        detect_encoding(data)
    }

    fn decode(&self, data: &[u8]) -> Result<PcmAudio, CodecError> {
        self.decode_to_pcm(data)
    }

    fn encode(&self, audio: &PcmAudio, settings: &EncodeSettings) -> Result<Vec<u8>, CodecError> {
        if audio.sample_rate == 0 || audio.channels == 0 {
            return Err(CodecError::InvalidInput(
                "Zero sample rate or channel count".to_string(),
            ));
        }

        let output = match settings.format {
            AudioFormat::Wav => encode_wav(audio),
            AudioFormat::Mp3 => self.encode_mp3(audio, settings.bitrate)?,
            AudioFormat::Opus => self.encode_opus(audio, settings.bitrate)?,
        };

        tracing::debug!(
            format = %settings.format,
            bitrate = settings.bitrate,
            pcm_samples = audio.samples.len(),
            encoded_size = output.len(),
            "Encoded audio"
        );

        Ok(output)
    }
}

/// 根据魔数探测编码
pub fn detect_encoding(data: &[u8]) -> Option<AudioEncoding> {
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        return Some(AudioEncoding::Wav);
    }
    if data.starts_with(b"OggS") {
        return Some(AudioEncoding::Ogg);
    }
    if data.starts_with(b"ID3") {
        return Some(AudioEncoding::Mp3);
    }
    // MPEG 帧同步字
    if data.len() >= 2 && data[0] == 0xFF && (data[1] & 0xE0) == 0xE0 {
        return Some(AudioEncoding::Mp3);
    }
    None
}

/// 将 PCM f32 样本编码为 WAV (PCM16)
pub fn encode_wav(pcm: &PcmAudio) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let num_channels = pcm.channels;
    let sample_rate = pcm.sample_rate;
    let byte_rate = sample_rate * num_channels as u32 * (bits_per_sample / 8) as u32;
    let block_align = num_channels * (bits_per_sample / 8);

    let pcm_data = to_i16(&pcm.samples);
    let data_size = pcm_data.len() * 2;
    let file_size = 36 + data_size;

    let mut wav = Vec::with_capacity(44 + data_size);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(file_size as u32).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    wav.extend_from_slice(&num_channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_size as u32).to_le_bytes());

    for sample in pcm_data {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// 获取 MPEG 音频支持的采样率（向上取最近的支持值）
fn mp3_compatible_sample_rate(sample_rate: u32) -> u32 {
    const RATES: [u32; 9] = [8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000];
    RATES
        .iter()
        .copied()
        .find(|&rate| rate >= sample_rate)
        .unwrap_or(48000)
}

/// 比特率（bps）映射到 LAME 的固定档位，取不超过目标的最高档
fn mp3_bitrate(bitrate: u32) -> Bitrate {
    match bitrate / 1000 {
        0..=47 => Bitrate::Kbps32,
        48..=63 => Bitrate::Kbps48,
        64..=95 => Bitrate::Kbps64,
        96..=127 => Bitrate::Kbps96,
        128..=159 => Bitrate::Kbps128,
        160..=191 => Bitrate::Kbps160,
        192..=255 => Bitrate::Kbps192,
        256..=319 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

/// 获取 Opus 兼容的采样率（向上取最近的支持值）
fn opus_compatible_sample_rate(sample_rate: u32) -> u32 {
    match sample_rate {
        8000 | 12000 | 16000 | 24000 | 48000 => sample_rate,
        r if r <= 8000 => 8000,
        r if r <= 12000 => 12000,
        r if r <= 16000 => 16000,
        r if r <= 24000 => 24000,
        _ => 48000,
    }
}

/// 创建 Opus Head 包 (RFC 7845)
fn create_opus_head(channels: u8, sample_rate: u32, pre_skip: u16) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead"); // Magic signature
    head.push(1); // Version
    head.push(channels); // Channel count
    head.extend_from_slice(&pre_skip.to_le_bytes()); // Pre-skip (48kHz)
    head.extend_from_slice(&sample_rate.to_le_bytes()); // Input sample rate
    head.extend_from_slice(&0i16.to_le_bytes()); // Output gain
    head.push(0); // Channel mapping family
    head
}

/// 创建 Opus Tags 包
fn create_opus_tags() -> Vec<u8> {
    let vendor = "narro";
    let mut tags = Vec::new();
    tags.extend_from_slice(b"OpusTags");
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor.as_bytes());
    tags.extend_from_slice(&0u32.to_le_bytes()); // No user comments
    tags
}
