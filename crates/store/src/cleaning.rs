//! Captured-request cleaning before storage.

use blv_core::knowledge::NewHttpRequest;

/// Header substrings that mark a line as noise.
const NOISE_HEADERS: &[&str] = &["user-agent", "accept", "sec-fetch", "priority", "te:", "referer"];

/// Drop noise headers, mask cookies, and reduce the response to its status
/// line plus body. The request body is kept as is.
pub fn clean_request(request: NewHttpRequest) -> NewHttpRequest {
    NewHttpRequest {
        headers: clean_headers(&request.headers),
        response: clean_response(&request.response),
        ..request
    }
}

pub fn clean_headers(headers: &str) -> String {
    headers
        .lines()
        .filter_map(|line| {
            let lower = line.to_lowercase();
            if NOISE_HEADERS.iter().any(|noise| lower.contains(noise)) {
                None
            } else if lower.starts_with("cookie:") {
                Some("Cookie: [session]")
            } else {
                Some(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn clean_response(response: &str) -> String {
    let normalized = response.replace("\r\n", "\n");
    let status = normalized.lines().next().unwrap_or("");
    let body = match normalized.find("\n\n") {
        Some(start) if start > 0 => &normalized[start + 2..],
        _ => "",
    };
    format!("{status}\n{body}")
}
