//! STOMP 1.2 text frames.
//!
//! Only the client subset is modelled: we build `CONNECT`, `SUBSCRIBE` and
//! `SEND`, and parse whatever the broker sends back.

use whispry_core::{errors::Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    /// First value of `key`; repeated headers keep the first occurrence.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, authorization: &str) -> Self {
        Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", authorization)
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new("SUBSCRIBE")
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send(destination: &str, body: &str) -> Self {
        Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", &body.len().to_string())
            .with_body(body)
    }

    /// Human-readable summary of an `ERROR` frame.
    pub fn error_message(&self) -> String {
        let head = self.get("message").unwrap_or("broker error");
        if self.body.trim().is_empty() {
            head.to_string()
        } else {
            format!("{head}: {}", self.body.trim())
        }
    }

    pub fn encode(&self) -> String {
        // CONNECT/CONNECTED headers are sent verbatim (STOMP 1.2 §Value Encoding).
        let escape_headers = !matches!(self.command.as_str(), "CONNECT" | "CONNECTED");
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (k, v) in &self.headers {
            if escape_headers {
                out.push_str(&escape(k));
                out.push(':');
                out.push_str(&escape(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Parse every frame in one WebSocket text message.
///
/// Bare end-of-line characters between frames are heart-beats and are skipped.
pub fn parse_frames(text: &str) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, consumed) = parse_one(rest)?;
        frames.push(frame);
        rest = &rest[consumed..];
    }
}

fn parse_one(text: &str) -> Result<(Frame, usize)> {
    let mut pos = 0;
    let command = next_line(text, &mut pos)?.to_string();
    if command.is_empty() || command.contains('\0') {
        return Err(Error::Protocol("stomp frame without command".to_string()));
    }
    let unescape_headers = command != "CONNECTED";

    let mut headers = Vec::new();
    loop {
        let line = next_line(text, &mut pos)?;
        if line.is_empty() {
            break;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("malformed stomp header: {line}")))?;
        if unescape_headers {
            headers.push((unescape(k)?, unescape(v)?));
        } else {
            headers.push((k.to_string(), v.to_string()));
        }
    }

    let frame_rest = &text[pos..];
    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.trim().parse::<usize>().ok());

    let body_len = match content_length {
        Some(len) => {
            if frame_rest.len() < len || !frame_rest.is_char_boundary(len) {
                return Err(Error::Protocol(
                    "stomp body shorter than content-length".to_string(),
                ));
            }
            len
        }
        None => frame_rest.find('\0').unwrap_or(frame_rest.len()),
    };
    let body = frame_rest[..body_len].to_string();

    // Skip the NUL terminator when present.
    let mut consumed = pos + body_len;
    if text[consumed..].starts_with('\0') {
        consumed += 1;
    }

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        consumed,
    ))
}

fn next_line<'a>(text: &'a str, pos: &mut usize) -> Result<&'a str> {
    let remaining = &text[*pos..];
    let end = remaining
        .find('\n')
        .ok_or_else(|| Error::Protocol("truncated stomp frame".to_string()))?;
    *pos += end + 1;
    Ok(remaining[..end].trim_end_matches('\r'))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::Protocol(format!(
                    "invalid stomp header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_wire_format() {
        let f = Frame::send("/app/chat.send", r#"{"content":"hi"}"#);
        assert_eq!(
            f.encode(),
            "SEND\ndestination:/app/chat.send\ncontent-type:application/json\ncontent-length:16\n\n{\"content\":\"hi\"}\0"
        );
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let f = Frame::connect("localhost", "Bearer a:b");
        assert!(f.encode().contains("\nAuthorization:Bearer a:b\n"));
    }

    #[test]
    fn parses_message_frame() {
        let raw = "MESSAGE\ndestination:/user/queue/messages\nsubscription:sub-0\nmessage-id:1\n\n{\"content\":\"hi\"}\0";
        let frames = parse_frames(raw).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, "MESSAGE");
        assert_eq!(frames[0].get("subscription"), Some("sub-0"));
        assert_eq!(frames[0].body, "{\"content\":\"hi\"}");
    }

    #[test]
    fn heartbeats_and_crlf_are_tolerated() {
        assert!(parse_frames("\n").unwrap().is_empty());
        assert!(parse_frames("\r\n\n").unwrap().is_empty());

        let frames = parse_frames("\nCONNECTED\r\nversion:1.2\r\n\r\n\0\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, "CONNECTED");
        assert_eq!(frames[0].get("version"), Some("1.2"));
    }

    #[test]
    fn content_length_allows_nul_in_body_and_multiple_frames() {
        let raw = "MESSAGE\ncontent-length:3\n\na\0b\0ERROR\nmessage:bad\n\ndetails\0";
        let frames = parse_frames(raw).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].body, "a\0b");
        assert_eq!(frames[1].command, "ERROR");
        assert_eq!(frames[1].error_message(), "bad: details");
    }

    #[test]
    fn header_escapes_are_decoded() {
        let f = Frame::new("MESSAGE").header("x", "a:b\nc\\d");
        let encoded = f.encode();
        assert!(encoded.contains("x:a\\cb\\nc\\\\d\n"));
        let parsed = parse_frames(&encoded).unwrap();
        assert_eq!(parsed[0].get("x"), Some("a:b\nc\\d"));
    }

    #[test]
    fn repeated_header_keeps_first_value() {
        let frames = parse_frames("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap();
        assert_eq!(frames[0].get("foo"), Some("1"));
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(parse_frames("MESSAGE").is_err());
        assert!(parse_frames("MESSAGE\nnocolon\n\n\0").is_err());
        assert!(parse_frames("MESSAGE\nbad:\\x\n\n\0").is_err());
        assert!(parse_frames("MESSAGE\ncontent-length:10\n\nshort\0").is_err());
    }
}
