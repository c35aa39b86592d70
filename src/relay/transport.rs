//! Upstream transport: the companion's server-sent event stream

use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;

use crate::config::RelayConfig;
use crate::error::{GaugeBridgeError, Result};
use crate::fanout::event::CHANNEL_MESSAGE;

/// Timeout of the reachability check
pub const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(3);

/// Connect timeout of the stream request
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One named event received from upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEvent {
    pub channel: String,
    pub data: String,
}

impl UpstreamEvent {
    pub fn new(channel: &str, data: &str) -> Self {
        Self {
            channel: channel.to_string(),
            data: data.to_string(),
        }
    }
}

/// Boxed session handed out by a transport
pub type SessionBox = Box<dyn UpstreamSession + Send>;

/// A live upstream connection
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamSession {
    /// Block for the next event.
    ///
    /// `Ok(None)` is a clean end of stream; errors mean the connection is lost.
    fn next_event(&mut self) -> Result<Option<UpstreamEvent>>;
}

/// Something the relay can check and connect to
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamTransport {
    /// Best-effort reachability check, returns a short diagnostic
    fn check_reachable(&self) -> Result<String>;

    /// Open a new session
    fn connect(&self) -> Result<SessionBox>;
}

/// Longest line accepted from upstream before the stream is treated as broken
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Incremental parser for a `text/event-stream` body
///
/// Lines end in LF, CR or CRLF, so no field value ever carries a bare
/// carriage return.
pub struct SseReader<R> {
    reader: R,
    /// Previous line ended in CR; a leading LF belongs to it
    skip_lf: bool,
}

impl<R: BufRead> SseReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            skip_lf: false,
        }
    }

    /// Next line without its terminator, `None` at end of stream
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            let mut used = 0;
            let mut complete = false;
            for &byte in buf {
                used += 1;
                if std::mem::take(&mut self.skip_lf) && byte == b'\n' {
                    continue;
                }
                match byte {
                    b'\n' => complete = true,
                    b'\r' => {
                        self.skip_lf = true;
                        complete = true;
                    }
                    _ => line.push(byte),
                }
                if complete || line.len() > MAX_LINE_BYTES {
                    break;
                }
            }
            self.reader.consume(used);

            if complete {
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if line.len() > MAX_LINE_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("event stream line exceeds {} bytes", MAX_LINE_BYTES),
                ));
            }
        }
    }

    /// Next complete event. Comments and keep-alives are skipped; an event
    /// without an `event:` field is named `message`.
    pub fn next_event(&mut self) -> io::Result<Option<UpstreamEvent>> {
        let mut channel: Option<String> = None;
        let mut data = String::new();
        let mut has_data = false;

        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };

            if line.is_empty() {
                if has_data {
                    return Ok(Some(UpstreamEvent {
                        channel: channel.unwrap_or_else(|| CHANNEL_MESSAGE.to_string()),
                        data,
                    }));
                }
                channel = None;
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };

            match field {
                "event" => channel = Some(value.to_string()),
                "data" => {
                    if has_data {
                        data.push('\n');
                    }
                    data.push_str(value);
                    has_data = true;
                }
                _ => {}
            }
        }
    }
}

struct SseSession {
    reader: SseReader<BufReader<Box<dyn Read + Send + Sync>>>,
}

impl UpstreamSession for SseSession {
    fn next_event(&mut self) -> Result<Option<UpstreamEvent>> {
        self.reader
            .next_event()
            .map_err(|e| GaugeBridgeError::Upstream(format!("Stream read failed: {}", e)))
    }
}

/// HTTP transport to the companion's `/telemetry/stream`
pub struct SseTransport {
    agent: ureq::Agent,
    stream_url: String,
    reachability_url: String,
}

impl SseTransport {
    pub fn new(config: &RelayConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(Duration::from_secs(config.read_timeout_s))
            .build();

        Self {
            agent,
            stream_url: config.stream_url(),
            reachability_url: config.reachability_url(),
        }
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }
}

impl UpstreamTransport for SseTransport {
    fn check_reachable(&self) -> Result<String> {
        match self.agent.get(&self.reachability_url).timeout(REACHABILITY_TIMEOUT).call() {
            Ok(response) => Ok(response.status().to_string()),
            // Any HTTP answer means the host is up
            Err(ureq::Error::Status(code, _)) => Ok(code.to_string()),
            Err(e) => Err(GaugeBridgeError::Upstream(format!(
                "{} unreachable: {}",
                self.reachability_url, e
            ))),
        }
    }

    fn connect(&self) -> Result<SessionBox> {
        let response = self
            .agent
            .get(&self.stream_url)
            .set("Accept", "text/event-stream")
            .set("Cache-Control", "no-cache")
            .call()
            .map_err(|e| {
                GaugeBridgeError::Upstream(format!("Failed to connect {}: {}", self.stream_url, e))
            })?;

        Ok(Box::new(SseSession {
            reader: SseReader::new(BufReader::new(response.into_reader())),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(body: &str) -> SseReader<Cursor<Vec<u8>>> {
        SseReader::new(Cursor::new(body.as_bytes().to_vec()))
    }

    #[test]
    fn test_parses_named_events() {
        let mut sse = reader(
            "event: telemetry_status\ndata: {\"status\":\"Connected\"}\n\n\
             event: mavlink_message\ndata: {\"mavpackettype\":\"ATTITUDE\"}\n\n",
        );
        assert_eq!(
            sse.next_event().unwrap(),
            Some(UpstreamEvent::new("telemetry_status", "{\"status\":\"Connected\"}"))
        );
        assert_eq!(sse.next_event().unwrap().unwrap().channel, "mavlink_message");
        assert_eq!(sse.next_event().unwrap(), None);
    }

    #[test]
    fn test_default_channel_and_comments() {
        let mut sse = reader(": ping\n\ndata: hello\r\n\r\n");
        assert_eq!(sse.next_event().unwrap(), Some(UpstreamEvent::new("message", "hello")));
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut sse = reader("data: a\ndata:b\nid: 7\nretry: 100\n\n");
        assert_eq!(sse.next_event().unwrap().unwrap().data, "a\nb");
    }

    #[test]
    fn test_event_name_without_data_is_dropped() {
        let mut sse = reader("event: lonely\n\ndata: x\n\n");
        assert_eq!(sse.next_event().unwrap(), Some(UpstreamEvent::new("message", "x")));
    }

    #[test]
    fn test_truncated_event_is_discarded() {
        let mut sse = reader("event: telemetry_status\ndata: {}");
        assert_eq!(sse.next_event().unwrap(), None);
    }

    #[test]
    fn test_bare_carriage_return_ends_lines() {
        let mut sse = reader("event: telemetry_status\rdata: {\"status\":\"Idle\"}\r\rdata: x\r\n\r\n");
        assert_eq!(
            sse.next_event().unwrap(),
            Some(UpstreamEvent::new("telemetry_status", "{\"status\":\"Idle\"}"))
        );
        assert_eq!(sse.next_event().unwrap(), Some(UpstreamEvent::new("message", "x")));
        assert_eq!(sse.next_event().unwrap(), None);
    }

    #[test]
    fn test_carriage_return_never_reaches_data() {
        let mut sse = reader("data: a\rb\n\n");
        let event = sse.next_event().unwrap().unwrap();
        assert_eq!(event.data, "a");
        assert!(!event.data.contains('\r'));
    }

    #[test]
    fn test_crlf_split_across_reads() {
        let body = "data: one\r\n\r\ndata: two\r\n\r\n";
        let mut sse = SseReader::new(BufReader::with_capacity(1, Cursor::new(body.as_bytes().to_vec())));
        assert_eq!(sse.next_event().unwrap().unwrap().data, "one");
        assert_eq!(sse.next_event().unwrap().unwrap().data, "two");
        assert_eq!(sse.next_event().unwrap(), None);
    }

    #[test]
    fn test_overlong_line_is_rejected() {
        let body = format!("data: {}\n\n", "x".repeat(MAX_LINE_BYTES + 1));
        let mut sse = reader(&body);
        let err = sse.next_event().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_connect_refused_is_upstream_error() {
        let config = RelayConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let transport = SseTransport::new(&config);
        assert_eq!(transport.stream_url(), "http://127.0.0.1:9/telemetry/stream");
        assert!(matches!(transport.connect(), Err(GaugeBridgeError::Upstream(_))));
        assert!(transport.check_reachable().is_err());
    }
}
