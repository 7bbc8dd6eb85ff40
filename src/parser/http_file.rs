use crate::http::types::Method;
use crate::parser::metadata::{self, Directive};
use crate::parser::script_block::{self, ExtractedScript};
use crate::parser::types::{ParseResult, ParsedFile, PendingMetadata, Request};
use std::path::Path;
use tracing::debug;

/// 扫描器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// 没有进行中的请求，等待方法行
    Idle,
    /// 已读到方法行，正在收集 headers
    InHeaders,
    /// 正在收集 body
    InBody,
}

/// HTTP 文件解析器
pub struct HttpFileParser;

impl HttpFileParser {
    /// 从文件路径解析
    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<ParsedFile> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let parsed = Self::parse_content(&content).with_source_path(path.as_ref().to_path_buf());
        debug!(
            path = %path.as_ref().display(),
            requests = parsed.requests.len(),
            environments = parsed.environments.len(),
            "parsed http file"
        );
        Ok(parsed)
    }

    /// 从字符串内容解析
    ///
    /// DSL 是容错的：格式错误的行被丢弃，不会返回错误。
    pub fn parse_content(content: &str) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        Scanner::new(&lines).run()
    }
}

/// 单遍、逐行的有限状态扫描器
struct Scanner<'a> {
    lines: &'a [&'a str],
    cursor: usize,
    state: ScanState,
    current: Option<Request>,
    body: String,
    pending: PendingMetadata,
    file: ParsedFile,
}

impl<'a> Scanner<'a> {
    fn new(lines: &'a [&'a str]) -> Self {
        Self {
            lines,
            cursor: 0,
            state: ScanState::Idle,
            current: None,
            body: String::new(),
            pending: PendingMetadata::default(),
            file: ParsedFile::new(),
        }
    }

    fn run(mut self) -> ParsedFile {
        while self.cursor < self.lines.len() {
            self.cursor += self.step();
        }
        self.finalize();
        self.file
    }

    /// 处理当前行，返回消耗的行数
    fn step(&mut self) -> usize {
        let raw = self.lines[self.cursor];
        let line = raw.trim();

        if metadata::is_separator(raw) {
            let meta = metadata::parse_separator(line);
            metadata::apply_separator(meta, &mut self.file, self.current.as_mut(), &mut self.pending);
            self.finalize();
            return 1;
        }

        if is_comment(line) {
            return 1;
        }

        if line.is_empty() {
            match self.state {
                ScanState::InHeaders => self.state = ScanState::InBody,
                ScanState::InBody => self.body.push('\n'),
                ScanState::Idle => {}
            }
            return 1;
        }

        if let Some(directive) = metadata::parse_directive(line) {
            if directive == Directive::Ignored {
                debug!(line = self.cursor + 1, "ignored malformed directive");
            }
            metadata::apply_directive(directive, &mut self.file, &mut self.pending);
            return 1;
        }

        if let Some((method, url)) = split_method_line(line) {
            if self.current.is_some() {
                // 没有 ### 分隔的第二个方法行并入 body
                self.state = ScanState::InBody;
                self.push_body(raw);
            } else {
                self.start_request(method, url);
            }
            return 1;
        }

        if self.current.is_none() {
            return 1;
        }

        // 脚本检测先于 header 检测，`< { "a": "b:c" }` 这样的行才不会被当作 header
        if script_block::is_script_marker(line) {
            let extracted = script_block::extract_script(self.lines, self.cursor);
            if !extracted.is_empty() {
                let consumed = extracted.lines_consumed;
                self.attach_script(line, extracted);
                return consumed;
            }
        }

        match self.state {
            ScanState::InHeaders => match parse_header(line) {
                Some((key, value)) => {
                    if let Some(request) = self.current.as_mut() {
                        request.headers.insert(key.to_string(), value.to_string());
                    }
                }
                None => {
                    self.state = ScanState::InBody;
                    self.push_body(raw);
                }
            },
            ScanState::InBody => self.push_body(raw),
            ScanState::Idle => {}
        }
        1
    }

    fn start_request(&mut self, method: &str, url: &str) {
        let mut request = Request::new(method, url, self.cursor + 1);
        request.absorb(std::mem::take(&mut self.pending));
        self.current = Some(request);
        self.state = ScanState::InHeaders;
        self.body.clear();
    }

    fn attach_script(&mut self, marker_line: &str, extracted: ExtractedScript) {
        let Some(request) = self.current.as_mut() else {
            return;
        };
        if marker_line.starts_with('<') {
            request.pre_script = Some(extracted.script);
        } else {
            request.post_script = Some(extracted.script);
        }
    }

    fn push_body(&mut self, raw: &str) {
        self.body.push_str(raw);
        self.body.push('\n');
    }

    /// 结束进行中的请求（附加 trim 后的非空 body）
    fn finalize(&mut self) {
        if let Some(mut request) = self.current.take() {
            let body = self.body.trim();
            if !body.is_empty() {
                request.body = Some(body.to_string());
            }
            self.file.requests.push(request);
        }
        self.body.clear();
        self.state = ScanState::Idle;
    }
}

/// 判断是否为注释行
fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("//")
}

/// 拆分 `METHOD url` 行；方法名大小写不敏感，且后面必须跟空白和 URL
fn split_method_line(line: &str) -> Option<(&str, &str)> {
    let (token, rest) = line.split_once(char::is_whitespace)?;
    let url = rest.trim();
    if url.is_empty() || !Method::is_method_token(token) {
        return None;
    }
    Some((token, url))
}

/// 严格的 header 形状：`^[A-Za-z][\w-]*:\s*.+$`
fn parse_header(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let mut chars = key.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((key, value))
}
