use super::model::HistoryItem;
use crate::Result;
use crate::error::RawreqError;
use crate::http::response::ResponseData;
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_MAX_ITEMS: usize = 100;
const RESPONSES_DIR: &str = "responses";

/// 按文件保存的执行历史
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 追加一条记录并返回该文件完整的最新历史（新的在前）
    async fn add_to_history(
        &self,
        file_id: &str,
        item: HistoryItem,
        file_path: Option<&Path>,
    ) -> Result<Vec<HistoryItem>>;

    async fn load(&self, file_id: &str) -> Result<Vec<HistoryItem>>;
}

/// 每个文件一个 JSON 数组：`<dir>/<sanitized file id>.json`
///
/// 写入时持有 `fs2` 排他锁，读取时持有共享锁。
pub struct FileHistoryStore {
    dir: PathBuf,
    max_items: usize,
    save_responses: bool,
    responses_dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_items: DEFAULT_MAX_ITEMS,
            save_responses: false,
            responses_dir: PathBuf::from(RESPONSES_DIR),
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    /// 开启响应文件旁路：有源文件时写在源文件旁边，否则写到 `responses_dir`
    pub fn with_response_files(mut self, responses_dir: impl Into<PathBuf>) -> Self {
        self.save_responses = true;
        self.responses_dir = responses_dir.into();
        self
    }

    pub fn history_path(&self, file_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_file_id(file_id)))
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(RawreqError::IoError)?;
        }
        Ok(())
    }

    /// 读取、前插、截断、回写，整个过程持有排他锁
    pub fn append(&self, file_id: &str, item: HistoryItem) -> Result<Vec<HistoryItem>> {
        self.ensure_dir()?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.history_path(file_id))
            .map_err(RawreqError::IoError)?;
        file.lock_exclusive().map_err(RawreqError::IoError)?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(RawreqError::IoError)?;
        let mut history = parse_history(&content, file_id);

        history.insert(0, item);
        history.truncate(self.max_items);

        let json = serde_json::to_string(&history)?;
        file.set_len(0).map_err(RawreqError::IoError)?;
        file.seek(SeekFrom::Start(0))
            .map_err(RawreqError::IoError)?;
        file.write_all(json.as_bytes())
            .map_err(RawreqError::IoError)?;
        file.flush().map_err(RawreqError::IoError)?;

        Ok(history)
    }

    pub fn read(&self, file_id: &str) -> Result<Vec<HistoryItem>> {
        let path = self.history_path(file_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = fs::File::open(&path).map_err(RawreqError::IoError)?;
        file.lock_shared().map_err(RawreqError::IoError)?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(RawreqError::IoError)?;
        Ok(parse_history(&content, file_id))
    }

    /// 最近 n 条（新的在前）
    pub fn tail(&self, file_id: &str, n: usize) -> Result<Vec<HistoryItem>> {
        let mut history = self.read(file_id)?;
        history.truncate(n);
        Ok(history)
    }

    fn save_response_best_effort(
        &self,
        file_id: &str,
        file_path: Option<&Path>,
        response: &ResponseData,
    ) {
        if !self.save_responses {
            return;
        }
        match save_response_file(file_id, file_path, &self.responses_dir, response) {
            Ok(path) => debug!(path = %path.display(), "saved response file"),
            Err(e) => warn!(error = %e, "failed to save response file"),
        }
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn add_to_history(
        &self,
        file_id: &str,
        item: HistoryItem,
        file_path: Option<&Path>,
    ) -> Result<Vec<HistoryItem>> {
        if file_id.is_empty() {
            return Ok(Vec::new());
        }
        let response = item.response_data.clone();
        let history = self.append(file_id, item)?;
        self.save_response_best_effort(file_id, file_path, &response);
        Ok(history)
    }

    async fn load(&self, file_id: &str) -> Result<Vec<HistoryItem>> {
        if file_id.is_empty() {
            return Ok(Vec::new());
        }
        self.read(file_id)
    }
}

/// 损坏的历史文件按空历史处理
fn parse_history(content: &str, file_id: &str) -> Vec<HistoryItem> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    serde_json::from_str(content).unwrap_or_else(|e| {
        warn!(file_id, error = %e, "history file is corrupt, starting fresh");
        Vec::new()
    })
}

/// `/ \ :` 替换为 `_`，空格替换为 `-`
pub fn sanitize_file_id(file_id: &str) -> String {
    file_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            ' ' => '-',
            other => other,
        })
        .collect()
}

/// 把响应写成 `<stem>-response-<YYYYmmdd-HHMMSS>.json`
///
/// 有源文件时写在源文件同目录，否则写到 `fallback_dir/<file id>-response-...json`。
pub fn save_response_file(
    file_id: &str,
    file_path: Option<&Path>,
    fallback_dir: &Path,
    response: &ResponseData,
) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let (dir, stem) = match file_path {
        Some(path) => {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| RawreqError::Other(format!("无效的文件路径: {}", path.display())))?;
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (dir, stem)
        }
        None => {
            if file_id.is_empty() {
                return Err(RawreqError::Other("缺少 file id".to_string()));
            }
            fs::create_dir_all(fallback_dir).map_err(RawreqError::IoError)?;
            (fallback_dir.to_path_buf(), sanitize_file_id(file_id))
        }
    };

    let out = dir.join(format!("{}-response-{}.json", stem, timestamp));
    let json = serde_json::to_string_pretty(response)?;
    fs::write(&out, json).map_err(RawreqError::IoError)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(status: u16) -> HistoryItem {
        let response = ResponseData::failure(status, "OK", "");
        HistoryItem::from_response("GET", "https://example.com", &response)
    }

    #[test]
    fn test_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileHistoryStore::new(temp_dir.path());

        store.append("demo.http", item(200)).unwrap();
        let history = store.append("demo.http", item(201)).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, 201);
        assert_eq!(history[1].status, 200);
        assert_eq!(store.read("demo.http").unwrap().len(), 2);
    }

    #[test]
    fn test_capped_at_max_items() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileHistoryStore::new(temp_dir.path()).with_max_items(3);

        for status in 200..206 {
            store.append("f", item(status)).unwrap();
        }

        let history = store.read("f").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].status, 205);
        assert_eq!(history[2].status, 203);
    }

    #[test]
    fn test_tail() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileHistoryStore::new(temp_dir.path());
        for status in 200..210 {
            store.append("f", item(status)).unwrap();
        }

        let tail = store.tail("f", 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].status, 209);
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileHistoryStore::new(temp_dir.path());
        fs::write(store.history_path("f"), "not json").unwrap();

        assert!(store.read("f").unwrap().is_empty());
        let history = store.append("f", item(200)).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_sanitize_file_id() {
        assert_eq!(sanitize_file_id("C:\\api/my file.http"), "C__api_my-file.http");
    }

    #[test]
    fn test_response_file_next_to_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("users.http");
        let response = ResponseData::failure(200, "OK", "hi");

        let out = save_response_file("users", Some(&source), temp_dir.path(), &response).unwrap();
        let name = out.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("users-response-"));
        assert!(name.ends_with(".json"));
        assert_eq!(out.parent().unwrap(), temp_dir.path());
    }

    #[test]
    fn test_response_file_without_source() {
        let temp_dir = TempDir::new().unwrap();
        let fallback = temp_dir.path().join("responses");
        let response = ResponseData::failure(200, "OK", "hi");

        let out = save_response_file("tab 1", None, &fallback, &response).unwrap();
        assert!(out.starts_with(&fallback));
        assert!(
            out.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("tab-1-response-")
        );
    }
}
