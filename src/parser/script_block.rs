/// 脚本块提取结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedScript {
    /// 脚本文本（含开头的 `<`/`>` 标记，已 trim）
    pub script: String,
    /// 消耗的行数，未激活时为 0
    pub lines_consumed: usize,
}

impl ExtractedScript {
    pub fn is_empty(&self) -> bool {
        self.lines_consumed == 0
    }
}

/// 从 `start` 行开始提取以花括号界定的脚本块
///
/// 仅在以下两种情况下激活：
/// - 起始行形如 `< {` / `> {`
/// - 起始行是单独的 `<` 或 `>`，且下一个非空行以 `{` 开头
///
/// 这样 `<root>...</root>` 之类的 XML 正文永远不会被当作脚本。
pub fn extract_script(lines: &[&str], start: usize) -> ExtractedScript {
    let Some(first) = lines.get(start).map(|l| l.trim()) else {
        return ExtractedScript::default();
    };

    if !is_activation(lines, start, first) {
        return ExtractedScript::default();
    }

    let mut script = String::new();
    let mut depth: i64 = 0;
    let mut opened = false;
    let mut consumed = 0;

    for line in &lines[start..] {
        consumed += 1;

        let opens = line.matches('{').count() as i64;
        if opens > 0 {
            opened = true;
            depth += opens;
        }

        if opened {
            script.push_str(line);
            script.push('\n');
            depth -= line.matches('}').count() as i64;
            if depth <= 0 {
                break;
            }
        }
    }

    ExtractedScript {
        script: script.trim().to_string(),
        lines_consumed: consumed,
    }
}

/// 判断一行是否可能是脚本块标记（不检查花括号）
pub fn is_script_marker(line: &str) -> bool {
    let line = line.trim();
    line == "<" || line == ">" || has_inline_brace(line)
}

fn has_inline_brace(line: &str) -> bool {
    line.strip_prefix(['<', '>'])
        .map(|rest| rest.trim_start().starts_with('{'))
        .unwrap_or(false)
}

fn is_activation(lines: &[&str], start: usize, first: &str) -> bool {
    if has_inline_brace(first) {
        return true;
    }
    if first != "<" && first != ">" {
        return false;
    }
    lines[start + 1..]
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .map(|l| l.starts_with('{'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_brace_block() {
        let lines = vec!["< {", "  setVar('a', 1);", "}", "GET /next"];
        let result = extract_script(&lines, 0);
        assert_eq!(result.lines_consumed, 3);
        assert_eq!(result.script, "< {\n  setVar('a', 1);\n}");
    }

    #[test]
    fn test_standalone_marker_then_brace() {
        let lines = vec![">", "{", "  if (x) { y(); }", "}"];
        let result = extract_script(&lines, 0);
        assert_eq!(result.lines_consumed, 4);
        assert_eq!(result.script, "{\n  if (x) { y(); }\n}");
    }

    #[test]
    fn test_standalone_marker_skips_blank_lines() {
        let lines = vec!["<", "", "{ log(); }"];
        let result = extract_script(&lines, 0);
        assert_eq!(result.lines_consumed, 3);
        assert_eq!(result.script, "{ log(); }");
    }

    #[test]
    fn test_single_line_block() {
        let lines = vec!["> { assert(true); }", "trailing"];
        let result = extract_script(&lines, 0);
        assert_eq!(result.lines_consumed, 1);
        assert_eq!(result.script, "> { assert(true); }");
    }

    #[test]
    fn test_xml_is_not_a_script() {
        let lines = vec!["<root>hi</root>", "{"];
        assert!(extract_script(&lines, 0).is_empty());
    }

    #[test]
    fn test_marker_without_brace() {
        let lines = vec![">", "plain text"];
        let result = extract_script(&lines, 0);
        assert_eq!(result, ExtractedScript::default());
    }

    #[test]
    fn test_unterminated_block_runs_to_end() {
        let lines = vec!["< {", "a();"];
        let result = extract_script(&lines, 0);
        assert_eq!(result.lines_consumed, 2);
        assert_eq!(result.script, "< {\na();");
    }

    #[test]
    fn test_is_script_marker() {
        assert!(is_script_marker(" < "));
        assert!(is_script_marker(">{"));
        assert!(is_script_marker("<  {"));
        assert!(!is_script_marker("<root>"));
        assert!(!is_script_marker("{"));
    }
}
