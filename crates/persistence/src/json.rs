//! JSON 文件存储实现
//!
//! 每个会话一个 `<id>.json` 文件，内容为带 SHA256 校验和的信封。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::store::{
    ConversationRecord, ConversationStore, ConversationSummary, Result, StorageError, newest_first,
    validate_id,
};

/// 文件格式版本
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    checksum: String,
    record: ConversationRecord,
}

/// JSON 存储实现
#[derive(Debug, Clone)]
pub struct JsonConversationStore {
    /// 存储根目录
    root: PathBuf,
}

impl JsonConversationStore {
    /// 创建存储，目录不存在时自动创建
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// 读取并校验单个会话文件
    async fn read_record(path: &Path) -> Result<ConversationRecord> {
        let content = tokio::fs::read_to_string(path).await?;
        let envelope: Envelope = serde_json::from_str(&content)?;
        if envelope.checksum != checksum(&envelope.record)? {
            return Err(StorageError::Corrupt(path.display().to_string()));
        }
        Ok(envelope.record)
    }
}

fn checksum(record: &ConversationRecord) -> Result<String> {
    let bytes = serde_json::to_vec(record)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[async_trait]
impl ConversationStore for JsonConversationStore {
    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        validate_id(&record.id)?;
        let envelope = Envelope {
            version: FORMAT_VERSION,
            checksum: checksum(record)?,
            record: record.clone(),
        };
        let content = serde_json::to_string_pretty(&envelope)?;

        // 先写入临时文件，再重命名为正式文件（原子操作）
        let path = self.record_path(&record.id);
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(id = %record.id, messages = record.messages.len(), "Conversation saved");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<ConversationRecord>> {
        validate_id(id)?;
        let path = self.record_path(id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Self::read_record(&path).await.map(Some)
    }

    async fn list(&self, notebook_id: Option<&str>) -> Result<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => {
                    if notebook_id.is_none_or(|nb| record.notebook_id == nb) {
                        summaries.push(record.summary());
                    }
                }
                Err(e) => warn!("Skipping unreadable conversation {}: {}", path.display(), e),
            }
        }

        Ok(newest_first(summaries))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use datasage_core::{ChatMessage, Conversation};
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, notebook: &str) -> ConversationRecord {
        let mut record = ConversationRecord::with_id(id, notebook, "show me 5 customers");
        record.replace_messages(Conversation::from(vec![
            ChatMessage::user("show me 5 customers"),
            ChatMessage::assistant("```sql\nSELECT * FROM customers LIMIT 5\n```")
                .with_metadata(json!({"sql": "SELECT * FROM customers LIMIT 5", "iteration": 0})),
            ChatMessage::tool_success("Query executed successfully. Returned 5 rows with 2 columns.")
                .with_metadata(json!({"sql": "SELECT * FROM customers LIMIT 5", "elapsed_seconds": 0.02})),
        ]));
        record
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonConversationStore::new(dir.path().join("conversations")).await.unwrap();
        let saved = record("conv-1", "nb-1");

        store.save(&saved).await.unwrap();
        let loaded = store.load("conv-1").await.unwrap().unwrap();

        assert_eq!(loaded, saved);
        assert!(loaded.messages.messages()[2].is_success());
        assert!(store.load("conv-2").await.unwrap().is_none());
        assert!(!dir.path().join("conversations/conv-1.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_tampered_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = JsonConversationStore::new(dir.path()).await.unwrap();
        store.save(&record("conv-1", "nb-1")).await.unwrap();

        let path = dir.path().join("conv-1.json");
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("LIMIT 5", "LIMIT 50")).unwrap();

        let err = store.load("conv-1").await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_list_skips_bad_files_and_sorts() {
        let dir = TempDir::new().unwrap();
        let store = JsonConversationStore::new(dir.path()).await.unwrap();

        let mut older = record("old", "nb-1");
        older.updated_at = Utc::now() - Duration::hours(1);
        store.save(&older).await.unwrap();
        store.save(&record("new", "nb-1")).await.unwrap();
        store.save(&record("elsewhere", "nb-2")).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let ids: Vec<String> = store
            .list(Some("nb-1"))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message_count, 3);
        assert!(all[0].last_message_preview.starts_with("Query executed successfully"));
    }

    #[tokio::test]
    async fn test_delete_and_invalid_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonConversationStore::new(dir.path()).await.unwrap();
        store.save(&record("conv-1", "nb-1")).await.unwrap();

        assert!(store.delete("conv-1").await.unwrap());
        assert!(!store.delete("conv-1").await.unwrap());
        assert!(matches!(
            store.load("../outside").await,
            Err(StorageError::InvalidArgument(_))
        ));
    }
}
