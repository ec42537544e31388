//! File-based Audio Cache Implementation
//!
//! 每个 key 一个文件：`<cache_dir>/<key>.nca`，内容为 bincode 序列化的版本化记录。
//! 写入先落到临时文件再 rename，保证单条目原子性。

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use uuid::Uuid;

use crate::application::ports::{
    AudioCachePort, AudioEncoding, CacheEntry, CacheError, CacheKey, CacheStats, CleanupReport,
};

/// 缓存文件扩展名
const ENTRY_EXTENSION: &str = "nca";
/// 临时文件扩展名
const TEMP_EXTENSION: &str = "tmp";
/// 当前记录版本
const RECORD_VERSION: u16 = 1;
/// 超过该时长的临时文件视为中断写入的残留
const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

/// 文件缓存配置
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// 缓存目录
    pub dir: PathBuf,
    /// 最大缓存大小（字节）
    pub max_size_bytes: u64,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/cache"),
            max_size_bytes: 100 * 1024 * 1024, // 100 MiB
        }
    }
}

/// 磁盘上的缓存记录
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    version: u16,
    key: String,
    sample_rate: u32,
    channels: u16,
    encoding: AudioEncoding,
    created_at: i64,
    payload: Vec<u8>,
}

impl CacheRecord {
    fn from_entry(entry: CacheEntry) -> Self {
        Self {
            version: RECORD_VERSION,
            key: entry.key.as_str().to_string(),
            sample_rate: entry.sample_rate,
            channels: entry.channels,
            encoding: entry.encoding,
            created_at: entry.created_at.timestamp(),
            payload: entry.payload,
        }
    }

    /// 校验并转换为缓存条目；版本或 key 不符时视为损坏
    fn into_entry(self, expected: &CacheKey) -> Result<CacheEntry, String> {
        if self.version != RECORD_VERSION {
            return Err(format!("unknown record version {}", self.version));
        }
        if self.key != expected.as_str() {
            return Err(format!("record key {} does not match file name", self.key));
        }
        let created_at = Utc
            .timestamp_opt(self.created_at, 0)
            .single()
            .ok_or_else(|| format!("invalid timestamp {}", self.created_at))?;

        Ok(CacheEntry {
            key: expected.clone(),
            payload: self.payload,
            encoding: self.encoding,
            sample_rate: self.sample_rate,
            channels: self.channels,
            created_at,
        })
    }
}

/// 目录中的一个缓存文件
#[derive(Debug)]
struct StoredFile {
    key: CacheKey,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// 文件音频缓存
pub struct FileAudioCache {
    dir: PathBuf,
    max_size_bytes: u64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl FileAudioCache {
    /// 创建缓存实例（目录不存在时创建）
    pub async fn new(config: &FileCacheConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.dir)
            .await
            .map_err(|e| CacheError::IoError(e.to_string()))?;

        tracing::info!(
            dir = %config.dir.display(),
            max_size_bytes = config.max_size_bytes,
            "FileAudioCache initialized"
        );

        Ok(Self {
            dir: config.dir.clone(),
            max_size_bytes: config.max_size_bytes,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        })
    }

    /// 打开指定目录的缓存
    pub async fn open<P: AsRef<Path>>(dir: P, max_size_bytes: u64) -> Result<Self, CacheError> {
        let config = FileCacheConfig {
            dir: dir.as_ref().to_path_buf(),
            max_size_bytes,
        };
        Self::new(&config).await
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.as_str(), ENTRY_EXTENSION))
    }

    fn miss(&self) -> Option<CacheEntry> {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 列出目录中的缓存文件；顺带清理残留的临时文件
    ///
    /// 文件名不是合法 key 的 `.nca` 文件不属于缓存，既不计入大小也不会被淘汰
    async fn scan(&self) -> Result<Vec<StoredFile>, CacheError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| CacheError::IoError(e.to_string()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::IoError(e.to_string()))?
        {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            match path.extension().and_then(|ext| ext.to_str()) {
                Some(ENTRY_EXTENSION) => {
                    let key = path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .and_then(CacheKey::from_digest);
                    match key {
                        Some(key) => files.push(StoredFile {
                            key,
                            path,
                            size: metadata.len(),
                            modified,
                        }),
                        None => {
                            tracing::trace!(path = %path.display(), "Skipping foreign file in cache dir");
                        }
                    }
                }
                Some(TEMP_EXTENSION) => {
                    let stale = modified
                        .elapsed()
                        .map(|age| age > STALE_TEMP_AGE)
                        .unwrap_or(false);
                    if stale {
                        let _ = fs::remove_file(&path).await;
                    }
                }
                _ => {}
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl AudioCachePort for FileAudioCache {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.entry_path(key);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return self.miss(),
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Cache entry unreadable");
                return self.miss();
            }
        };

        let entry = bincode::deserialize::<CacheRecord>(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|record| record.into_entry(key));

        match entry {
            Ok(entry) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = %key, size = entry.payload.len(), "Cache hit");
                Some(entry)
            }
            Err(reason) => {
                // 不在此删除：并发的 put 可能已用新记录替换该文件，由下次 put 原子覆盖
                tracing::warn!(cache_key = %key, reason = %reason, "Corrupt cache entry, treating as miss");
                self.miss()
            }
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let path = self.entry_path(&entry.key);
        let key = entry.key.clone();
        let record = CacheRecord::from_entry(entry);
        let bytes =
            bincode::serialize(&record).map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let temp_path = self
            .dir
            .join(format!(".{}.{}.{}", key.as_str(), Uuid::new_v4(), TEMP_EXTENSION));

        let result = async {
            fs::write(&temp_path, &bytes).await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CacheError::IoError(e.to_string()));
        }

        tracing::debug!(cache_key = %key, size = bytes.len(), "Cached audio");
        Ok(())
    }

    async fn cleanup(&self) -> Result<CleanupReport, CacheError> {
        let mut files = self.scan().await?;
        let total: u64 = files.iter().map(|f| f.size).sum();

        if total <= self.max_size_bytes {
            return Ok(CleanupReport {
                removed_entries: 0,
                freed_bytes: 0,
                remaining_bytes: total,
            });
        }

        // 最旧的在前
        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let target = self.max_size_bytes / 2;
        let mut remaining = total;
        let mut report = CleanupReport::default();

        for file in files {
            if remaining <= target {
                break;
            }
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    tracing::debug!(cache_key = %file.key, size = file.size, "Evicted cache entry");
                    remaining -= file.size;
                    report.removed_entries += 1;
                    report.freed_bytes += file.size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    remaining -= file.size;
                }
                Err(e) => {
                    tracing::warn!(cache_key = %file.key, error = %e, "Failed to evict cache file");
                }
            }
        }
        report.remaining_bytes = remaining;

        tracing::info!(
            removed = report.removed_entries,
            freed_bytes = report.freed_bytes,
            remaining_bytes = report.remaining_bytes,
            max_size_bytes = self.max_size_bytes,
            "Cache cleanup completed"
        );

        Ok(report)
    }

    async fn stats(&self) -> CacheStats {
        let files = match self.scan().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to scan cache directory");
                Vec::new()
            }
        };

        CacheStats {
            total_entries: files.len(),
            total_size_bytes: files.iter().map(|f| f.size).sum(),
            max_size_bytes: self.max_size_bytes,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }
}
