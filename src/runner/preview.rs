use serde::{Deserialize, Serialize};

use crate::http::response::{RequestPreview, ResponseData, ResponsePreview};
use crate::parser::Request;

/// 链路中一步的展示快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainItem {
    pub id: String,
    pub label: String,
    pub request: RequestPreview,
    pub response: Option<ResponsePreview>,
    pub is_primary: bool,
}

/// 传输层给出快照时以它为准（缺失的 name/method 从定义补齐），否则由请求定义合成
pub fn ensure_request_preview(request: &Request, preview: Option<&RequestPreview>) -> RequestPreview {
    match preview {
        Some(preview) => RequestPreview {
            name: preview
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .or_else(|| request.name.clone()),
            method: if preview.method.is_empty() {
                request.method.clone()
            } else {
                preview.method.clone()
            },
            url: preview.url.clone(),
            headers: preview.headers.clone(),
            body: preview.body.clone(),
        },
        None => RequestPreview {
            name: request.name.clone(),
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        },
    }
}

pub fn to_response_preview(response: Option<&ResponseData>) -> Option<ResponsePreview> {
    response.map(ResponseData::preview)
}

/// 把链路上每一步的请求和响应配成对
///
/// `previews` 和 `responses` 按链路下标对应，长度可以短于 `chain`（未执行到的步骤）。
pub fn build_chain_items(
    chain: &[Request],
    previews: &[Option<RequestPreview>],
    responses: &[Option<ResponseData>],
    primary_index: usize,
) -> Vec<ChainItem> {
    chain
        .iter()
        .enumerate()
        .map(|(idx, request)| {
            let response = responses.get(idx).and_then(Option::as_ref);
            let fallback = previews.get(idx).and_then(Option::as_ref);
            let preview = ensure_request_preview(
                request,
                response
                    .and_then(|r| r.request_preview.as_ref())
                    .or(fallback),
            );
            let name = request.name.as_deref().filter(|n| !n.is_empty());

            ChainItem {
                id: format!("{}-{}", name.unwrap_or(&request.method), idx),
                label: match name {
                    Some(name) => name.to_string(),
                    None => format!("{} {}", request.method, preview.url)
                        .trim()
                        .to_string(),
                },
                request: preview,
                response: to_response_preview(response),
                is_primary: idx == primary_index,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn named(name: &str) -> Request {
        let mut r = Request::new("POST", "{{base}}/login", 1);
        r.name = Some(name.to_string());
        r
    }

    #[test]
    fn test_synthesized_preview_from_definition() {
        let mut request = Request::new("GET", "{{base}}/users", 3);
        request.body = Some("x".to_string());
        let preview = ensure_request_preview(&request, None);
        assert_eq!(preview.url, "{{base}}/users");
        assert_eq!(preview.body.as_deref(), Some("x"));
    }

    #[test]
    fn test_preview_fills_missing_name_and_method() {
        let request = named("login");
        let given = RequestPreview {
            url: "https://api.test/login".to_string(),
            ..RequestPreview::default()
        };
        let preview = ensure_request_preview(&request, Some(&given));
        assert_eq!(preview.name.as_deref(), Some("login"));
        assert_eq!(preview.method, "POST");
        assert_eq!(preview.url, "https://api.test/login");
    }

    #[test]
    fn test_chain_items_ids_and_labels() {
        let chain = vec![named("login"), Request::new("GET", "{{base}}/me", 5)];
        let response = ResponseData::new(200, "OK", IndexMap::new(), "{}", 4).with_request_preview(
            RequestPreview {
                method: "GET".to_string(),
                url: "https://api.test/me".to_string(),
                ..RequestPreview::default()
            },
        );
        let items = build_chain_items(&chain, &[None, None], &[None, Some(response)], 1);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "login-0");
        assert_eq!(items[0].label, "login");
        assert!(items[0].response.is_none());
        assert!(!items[0].is_primary);

        assert_eq!(items[1].id, "GET-1");
        assert_eq!(items[1].label, "GET https://api.test/me");
        assert_eq!(items[1].response.as_ref().unwrap().status, 200);
        assert!(items[1].is_primary);
    }

    #[test]
    fn test_fallback_preview_used_when_no_response() {
        let chain = vec![named("login")];
        let fallback = RequestPreview {
            method: "POST".to_string(),
            url: "https://secret.test/login".to_string(),
            ..RequestPreview::default()
        };
        let items = build_chain_items(&chain, &[Some(fallback)], &[], 0);
        assert_eq!(items[0].request.url, "https://secret.test/login");
    }
}
