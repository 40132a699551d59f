//! Where poll results go.

use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::SinkError;
use crate::identity::ProviderId;
use crate::stats::StatsReport;

/// Consumer of successful poll results and connection notifications.
///
/// Results for different providers may arrive in any order.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn got_stats(
        &self,
        identity: &ProviderId,
        nickname: &str,
        report: StatsReport,
    ) -> Result<(), SinkError>;

    fn provider_connected(&self, _identity: &ProviderId, _nickname: &str) {}

    fn provider_disconnected(&self, _identity: &ProviderId, _nickname: &str) {}
}

/// Prints notifications and every result as pretty JSON.
pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    #[must_use]
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, text: &str) {
        let mut out = self.out.lock();
        // Console output is best effort.
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

#[async_trait]
impl ResultSink for ConsoleSink {
    async fn got_stats(
        &self,
        identity: &ProviderId,
        nickname: &str,
        report: StatsReport,
    ) -> Result<(), SinkError> {
        let body = serde_json::to_string_pretty(&report).unwrap_or_else(|_| format!("{report:?}"));
        self.emit(&format!("\"{nickname}\" [{identity}]:\n{body}"));
        Ok(())
    }

    fn provider_connected(&self, identity: &ProviderId, nickname: &str) {
        self.emit(&format!("connect \"{nickname}\" [{identity}]"));
    }

    fn provider_disconnected(&self, identity: &ProviderId, nickname: &str) {
        self.emit(&format!("disconnect \"{nickname}\" [{identity}]"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_console_sink_output() {
        let buf = SharedBuf::default();
        let sink = ConsoleSink::with_writer(Box::new(buf.clone()));
        let id = ProviderId::new("abc123");

        sink.provider_connected(&id, "node-1");
        let mut report = StatsReport::default();
        report.counters.insert("uploads".to_string(), 4);
        sink.got_stats(&id, "node-1", report).await.unwrap();
        sink.provider_disconnected(&id, "node-1");

        let text = buf.text();
        assert!(text.contains("connect \"node-1\" [abc123]"));
        assert!(text.contains("\"uploads\": 4"));
        assert!(text.contains("disconnect \"node-1\" [abc123]"));
    }
}
