pub mod model;
pub mod printer;
pub mod storage;

pub use model::HistoryItem;
pub use printer::{history_table, print_history};
pub use storage::{FileHistoryStore, HistoryStore, sanitize_file_id, save_response_file};
