use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Position;

use crate::domain::CheckUrl;

/// Upper bound on status line plus headers read from a server
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// What the prober keeps from a response: the status line and two headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status_code: u16,
    pub reason_phrase: String,
    pub location: Option<String>,
    pub sets_cookie: bool,
}

pub(crate) fn build_request(url: &CheckUrl, user_agent: &str) -> String {
    let target = &url.as_url()[Position::BeforePath..Position::AfterQuery];
    let target = if target.is_empty() { "/" } else { target };

    let host = match url.as_url().port() {
        Some(port) => format!("{}:{port}", url.host()),
        None => url.host().to_string(),
    };

    format!(
        "HEAD {target} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {user_agent}\r\nAccept: */*\r\n\r\n"
    )
}

/// Send the request and read until the end of the response headers
///
/// The body is never read; the connection is dropped by the caller.
pub(crate) async fn exchange<S>(mut stream: S, request: &str) -> std::io::Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 2048];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);

        if let Some(end) = head_end(&head) {
            head.truncate(end);
            break;
        }
        if head.len() >= MAX_HEAD_BYTES {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn head_end(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .or_else(|| bytes.windows(2).position(|w| w == b"\n\n"))
}

pub(crate) fn parse_response_head(raw: &str) -> Option<ResponseHead> {
    let mut lines = raw.lines();

    let status_line = lines.next()?.trim();
    let mut parts = status_line.splitn(3, ' ');
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let status_code = parts.next()?.trim().parse::<u16>().ok()?;
    let reason_phrase = parts.next().unwrap_or_default().trim().to_string();

    let mut location = None;
    let mut sets_cookie = false;
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        match name.trim().to_ascii_lowercase().as_str() {
            "location" if location.is_none() => {
                let value = value.trim();
                if !value.is_empty() {
                    location = Some(value.to_string());
                }
            }
            "set-cookie" => sets_cookie = true,
            _ => {}
        }
    }

    Some(ResponseHead {
        status_code,
        reason_phrase,
        location,
        sets_cookie,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_has_three_headers() {
        let url = CheckUrl::parse("https://example.com:8443/a/b?q=1#frag").unwrap();
        assert_eq!(
            build_request(&url, "checker/1"),
            "HEAD /a/b?q=1 HTTP/1.1\r\nHost: example.com:8443\r\nUser-Agent: checker/1\r\nAccept: */*\r\n\r\n"
        );

        let url = CheckUrl::parse("http://example.com").unwrap();
        assert!(build_request(&url, "ua").starts_with("HEAD / HTTP/1.1\r\nHost: example.com\r\n"));
    }

    #[test]
    fn redirect_head() {
        let raw = "HTTP/1.1 301 Moved Permanently\r\n\
                   Server: nginx\r\n\
                   location:  https://www.example.com/x \r\n\
                   Set-Cookie: a=b; Path=/\r\n\
                   Content-Length: 0";

        assert_eq!(
            parse_response_head(raw),
            Some(ResponseHead {
                status_code: 301,
                reason_phrase: "Moved Permanently".into(),
                location: Some("https://www.example.com/x".into()),
                sets_cookie: true,
            })
        );
    }

    #[test]
    fn plain_head() {
        let head = parse_response_head("HTTP/1.0 200 OK\nContent-Type: text/html\n").unwrap();
        assert_eq!(head.status_code, 200);
        assert_eq!(head.reason_phrase, "OK");
        assert_eq!(head.location, None);
        assert!(!head.sets_cookie);

        let head = parse_response_head("HTTP/1.1 404\r\n").unwrap();
        assert_eq!(head.status_code, 404);
        assert_eq!(head.reason_phrase, "");
    }

    #[test]
    fn garbage_is_not_a_response() {
        for raw in ["", "SSH-2.0-OpenSSH_9.6", "HTTP/1.1 abc Nope", "<html>"] {
            assert_eq!(parse_response_head(raw), None, "{raw}");
        }
    }

    #[test]
    fn head_end_detection() {
        assert_eq!(head_end(b"HTTP/1.1 200 OK\r\nA: b\r\n\r\nbody"), Some(21));
        assert_eq!(head_end(b"HTTP/1.1 200 OK\nA: b\n\nbody"), Some(20));
        assert_eq!(head_end(b"HTTP/1.1 200 OK\r\nA: b\r\n"), None);
    }
}
