use super::model::HistoryItem;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, Table};

/// 历史记录表格
pub fn history_table(items: &[HistoryItem]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Time", "Method", "URL", "Status", "Duration"]);

    for item in items {
        let status_color = if (200..400).contains(&item.status) {
            Color::Green
        } else {
            Color::Red
        };
        let status = if item.status_text.is_empty() {
            item.status.to_string()
        } else {
            format!("{} {}", item.status, item.status_text)
        };

        table.add_row(vec![
            Cell::new(
                item.timestamp
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S"),
            ),
            Cell::new(&item.method),
            Cell::new(&item.url).add_attribute(Attribute::Dim),
            Cell::new(status).fg(status_color),
            Cell::new(format!("{}ms", item.response_time)),
        ]);
    }

    table
}

pub fn print_history(items: &[HistoryItem]) {
    if items.is_empty() {
        println!("No history yet.");
        return;
    }
    println!("{}", history_table(items));
}
