use std::collections::HashSet;
use tracing::debug;

use crate::parser::Request;
use crate::{RawreqError, Result};

/// 沿 `depends` 构建执行链，依赖在前，目标请求在最后
///
/// 依赖名在同一文件内按名称精确匹配，找不到的依赖直接忽略（该请求成为链头）。
/// 出现环时返回 `CircularDependency`，此时还没有发出任何请求。
pub fn build_chain(requests: &[Request], index: usize) -> Result<Vec<Request>> {
    if index >= requests.len() {
        return Err(RawreqError::Other(format!(
            "请求索引越界: {} (共 {} 个请求)",
            index,
            requests.len()
        )));
    }

    let mut visited = HashSet::new();
    let mut path = Vec::new();
    let mut chain = Vec::new();
    visit(requests, index, &mut visited, &mut path, &mut chain)?;

    debug!(
        target_index = index,
        chain = ?chain.iter().map(Request::label).collect::<Vec<_>>(),
        "built request chain"
    );
    Ok(chain)
}

fn visit(
    requests: &[Request],
    index: usize,
    visited: &mut HashSet<usize>,
    path: &mut Vec<String>,
    chain: &mut Vec<Request>,
) -> Result<()> {
    let request = &requests[index];
    path.push(request.label());
    if !visited.insert(index) {
        return Err(RawreqError::CircularDependency(path.join(" -> ")));
    }

    if let Some(depends) = request.depends.as_deref() {
        match find_by_name(requests, depends) {
            Some(dep) => visit(requests, dep, visited, path, chain)?,
            None => debug!(depends, "dependency not found, ignoring"),
        }
    }

    chain.push(request.clone());
    Ok(())
}

fn find_by_name(requests: &[Request], name: &str) -> Option<usize> {
    requests
        .iter()
        .position(|r| r.name.as_deref() == Some(name))
}
