//! Check response construction

use serde::Serialize;
use std::collections::BTreeMap;

use crate::check::{
    CheckResponse, DeniedHttpResponse, HeaderValue, HttpResponse, HttpStatus, OkHttpResponse, RpcStatus,
    RPC_CODE_OK, RPC_CODE_PERMISSION_DENIED,
};
use crate::evaluator::{Denial, PolicyEvaluationTrace};

const CONTENT_TYPE: &str = "Content-Type";
const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// How the denied body should be rendered
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedRender<'a> {
    pub request_id: &'a str,
    pub json: bool,

    /// Present only when the matched policy asks for error details
    pub traces: Option<&'a [PolicyEvaluationTrace]>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeniedBody<'a> {
    request_id: &'a str,
    status: u16,
    status_text: &'a str,

    #[serde(skip_serializing_if = "no_reasons")]
    reasons: &'a [String],

    #[serde(skip_serializing_if = "Option::is_none")]
    traces: Option<&'a [PolicyEvaluationTrace]>,
}

fn no_reasons(reasons: &&[String]) -> bool {
    reasons.is_empty()
}

/// Let the request through with the given upstream headers
pub fn ok_response(headers: &BTreeMap<String, String>) -> CheckResponse {
    CheckResponse {
        status: RpcStatus {
            code: RPC_CODE_OK,
            message: String::new(),
        },
        http_response: HttpResponse::OkResponse(OkHttpResponse {
            headers: to_header_values(headers),
        }),
    }
}

/// Reply to the client directly
pub fn denied_response(denial: &Denial, render: DeniedRender<'_>) -> CheckResponse {
    let status_text = denial.status_text();
    let mut headers = to_header_values(&denial.headers);

    let body = match &denial.body {
        Some(body) => body.clone(),
        None => {
            let (content_type, body) = render_body(denial, &status_text, render);
            if !denial.headers.keys().any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE)) {
                headers.push(HeaderValue::new(CONTENT_TYPE, content_type));
            }
            body
        }
    };

    CheckResponse {
        status: RpcStatus {
            code: RPC_CODE_PERMISSION_DENIED,
            message: status_text,
        },
        http_response: HttpResponse::DeniedResponse(DeniedHttpResponse {
            status: HttpStatus { code: denial.status },
            headers,
            body,
        }),
    }
}

fn render_body(denial: &Denial, status_text: &str, render: DeniedRender<'_>) -> (&'static str, String) {
    if render.json {
        let body = DeniedBody {
            request_id: render.request_id,
            status: denial.status,
            status_text,
            reasons: &denial.reasons,
            traces: render.traces,
        };
        if let Ok(json) = serde_json::to_string(&body) {
            return (CONTENT_TYPE_JSON, json);
        }
    }

    let mut text = format!("{} {}", denial.status, status_text);
    for reason in &denial.reasons {
        text.push_str("\n- ");
        text.push_str(reason);
    }
    if let Some(traces) = render.traces {
        for trace in traces.iter().filter(|t| !t.explanation.is_empty()) {
            text.push_str("\n\n");
            text.push_str(&trace.explanation);
            if !trace.remediation.is_empty() {
                text.push('\n');
                text.push_str(&trace.remediation);
            }
        }
    }
    text.push('\n');
    (CONTENT_TYPE_TEXT, text)
}

fn to_header_values(headers: &BTreeMap<String, String>) -> Vec<HeaderValue> {
    headers.iter().map(|(k, v)| HeaderValue::new(k, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response_carries_headers() {
        let headers = BTreeMap::from([("X-User".to_string(), "alice".to_string())]);
        let response = ok_response(&headers);

        assert!(response.is_ok());
        assert_eq!(response.status.code, RPC_CODE_OK);
        let HttpResponse::OkResponse(ok) = &response.http_response else {
            panic!("expected ok response");
        };
        assert_eq!(ok.headers, vec![HeaderValue::new("X-User", "alice")]);
    }

    #[test]
    fn test_plain_text_forbidden() {
        let response = denied_response(&Denial::forbidden(), DeniedRender::default());

        assert_eq!(response.status.code, RPC_CODE_PERMISSION_DENIED);
        assert_eq!(response.status.message, "Forbidden");
        let denied = response.denied().unwrap();
        assert_eq!(denied.status.code, 403);
        assert_eq!(denied.body, "403 Forbidden\n");
        assert_eq!(response.denied_header("content-type"), Some(CONTENT_TYPE_TEXT));
    }

    #[test]
    fn test_json_body_with_traces() {
        let denial = Denial::new(401).with_message("Login Required").with_reason("no session");
        let traces = vec![PolicyEvaluationTrace {
            id: "p1".into(),
            explanation: "requires login".into(),
            deny: true,
            ..Default::default()
        }];

        let response = denied_response(
            &denial,
            DeniedRender {
                request_id: "req-1",
                json: true,
                traces: Some(&traces),
            },
        );

        let denied = response.denied().unwrap();
        let body: serde_json::Value = serde_json::from_str(&denied.body).unwrap();
        assert_eq!(body["requestId"], "req-1");
        assert_eq!(body["status"], 401);
        assert_eq!(body["statusText"], "Login Required");
        assert_eq!(body["reasons"][0], "no session");
        assert_eq!(body["traces"][0]["id"], "p1");
        assert_eq!(response.denied_header("Content-Type"), Some(CONTENT_TYPE_JSON));
    }

    #[test]
    fn test_json_body_omits_traces_without_details() {
        let response = denied_response(
            &Denial::forbidden(),
            DeniedRender {
                request_id: "req-1",
                json: true,
                traces: None,
            },
        );

        let body: serde_json::Value = serde_json::from_str(&response.denied().unwrap().body).unwrap();
        assert!(body.get("traces").is_none());
        assert!(body.get("reasons").is_none());
    }

    #[test]
    fn test_engine_body_and_headers_win() {
        let denial = Denial::new(302)
            .with_header("Location", "https://login.example.com")
            .with_header("Content-Type", "text/html")
            .with_body("<a>login</a>");

        let response = denied_response(&denial, DeniedRender::default());
        let denied = response.denied().unwrap();

        assert_eq!(denied.body, "<a>login</a>");
        assert_eq!(response.denied_header("location"), Some("https://login.example.com"));
        assert_eq!(response.denied_header("content-type"), Some("text/html"));
        assert_eq!(denied.headers.len(), 2);
    }
}
