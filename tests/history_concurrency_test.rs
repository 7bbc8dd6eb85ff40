use rawreq::history::{FileHistoryStore, HistoryItem};
use rawreq::http::ResponseData;
use std::thread;
use tempfile::TempDir;

fn dummy_item(status: u16) -> HistoryItem {
    let response = ResponseData::failure(status, "OK", "");
    HistoryItem::from_response("GET", "https://example.com", &response)
}

#[test]
fn test_concurrent_writes() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_path_buf();

    let thread_count = 8;
    let entries_per_thread = 10;

    // 每个线程各自创建存储实例，模拟多个进程
    let handles: Vec<_> = (0..thread_count)
        .map(|i| {
            let dir = dir.clone();
            thread::spawn(move || {
                let store = FileHistoryStore::new(dir).with_max_items(1_000);
                for j in 0..entries_per_thread {
                    store
                        .append("shared.http", dummy_item(200 + (i * entries_per_thread + j) as u16))
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let store = FileHistoryStore::new(&dir);
    let history = store.read("shared.http").unwrap();
    assert_eq!(history.len(), thread_count * entries_per_thread);

    let mut statuses: Vec<u16> = history.iter().map(|item| item.status).collect();
    statuses.sort_unstable();
    statuses.dedup();
    assert_eq!(statuses.len(), thread_count * entries_per_thread);
}

#[test]
fn test_files_are_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileHistoryStore::new(temp_dir.path());

    store.append("a.http", dummy_item(200)).unwrap();
    store.append("b.http", dummy_item(500)).unwrap();
    store.append("b.http", dummy_item(404)).unwrap();

    assert_eq!(store.read("a.http").unwrap().len(), 1);
    let b = store.read("b.http").unwrap();
    assert_eq!(b.len(), 2);
    assert_eq!(b[0].status, 404);
    assert!(store.read("c.http").unwrap().is_empty());
}

#[test]
fn test_nested_file_id_is_sanitized() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileHistoryStore::new(temp_dir.path());
    store.append("api/v1 users.http", dummy_item(200)).unwrap();

    assert!(temp_dir.path().join("api_v1-users.http.json").exists());
    assert_eq!(store.tail("api/v1 users.http", 5).unwrap().len(), 1);
}
