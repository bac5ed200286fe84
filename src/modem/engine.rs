use super::line::{classify, FinalResult, Line};
use super::{ModemError, ModemResult};
use crate::config::EngineConfig;
use crate::platform::Transport;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const RX_CHUNK: usize = 128;
const MAX_LINE_LEN: usize = 1024;
const MAX_QUEUED_NOTIFICATIONS: usize = 16;

/// When an exchange is considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// First `OK`/`ERROR` line.
    FinalResult,
    /// A line carrying the expected token, even if it follows `OK`. `ERROR` aborts.
    Token,
    /// The `>` data-entry prompt. `ERROR` aborts.
    Prompt,
    /// Read until the budget elapses or the modem goes quiet, then scan everything.
    Elapsed,
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub lines: Vec<Line>,
    /// The expected token appeared in a non-echo line (or an unterminated tail).
    pub matched: bool,
    pub timed_out: bool,
}

impl Response {
    pub fn final_result(&self) -> Option<&FinalResult> {
        self.lines.iter().find_map(|line| match line {
            Line::Final(result) => Some(result),
            _ => None,
        })
    }

    /// First non-echo line starting with `prefix`.
    pub fn find(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .filter_map(Line::text)
            .find(|text| text.starts_with(prefix))
    }

    /// All non-echo text, one line per entry.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .filter_map(Line::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Synchronous command/response engine owning the modem UART.
///
/// One exchange at a time: write, read typed lines until the completion policy is met
/// or the budget runs out, then hold the line for the settle delay. Unsolicited
/// notifications seen along the way are queued for [`CommandEngine::take_notifications`].
pub struct CommandEngine {
    transport: Box<dyn Transport>,
    config: EngineConfig,
    rx: Vec<u8>,
    notifications: VecDeque<String>,
}

impl CommandEngine {
    pub fn new(transport: Box<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            transport,
            config,
            rx: Vec::new(),
            notifications: VecDeque::new(),
        }
    }

    /// Send `command` and report whether `expected` shows up before the final result.
    pub fn execute(&mut self, command: &str, expected: &str, timeout: Duration) -> bool {
        self.exchange(command, expected, timeout, Completion::FinalResult)
            .matched
    }

    pub fn exchange(
        &mut self,
        command: &str,
        expected: &str,
        timeout: Duration,
        completion: Completion,
    ) -> Response {
        self.drain_stale();
        let mut framed = Vec::with_capacity(command.len() + 1);
        framed.extend_from_slice(command.as_bytes());
        framed.push(b'\r');
        self.transact(&framed, Some(command), expected, timeout, completion)
    }

    /// Stream raw bytes with no terminator (payload of a staged upload).
    pub fn stream(
        &mut self,
        bytes: &[u8],
        expected: &str,
        timeout: Duration,
        completion: Completion,
    ) -> Response {
        self.transact(bytes, None, expected, timeout, completion)
    }

    /// Wait for the modem to volunteer `token` without sending anything.
    pub fn await_token(&mut self, token: &str, timeout: Duration) -> bool {
        self.transact(&[], None, token, timeout, Completion::Token)
            .matched
    }

    /// Listen for `window` while no exchange is running, queueing notifications.
    pub fn poll_notifications(&mut self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut chunk = [0u8; RX_CHUNK];
        loop {
            while let Some(text) = self.next_line() {
                if let Line::Notification(_) = self.record(classify(&text, None)) {
                    continue;
                }
                debug!("Modem: unsolicited line ignored: {}", text);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.transport.read(&mut chunk, deadline - now) {
                Ok(0) => {}
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    warn!("Modem: listener read failed: {}", e);
                    break;
                }
            }
        }
    }

    pub fn take_notifications(&mut self) -> Vec<String> {
        self.notifications.drain(..).collect()
    }

    fn transact(
        &mut self,
        bytes: &[u8],
        sent: Option<&str>,
        expected: &str,
        timeout: Duration,
        completion: Completion,
    ) -> Response {
        let response = match self.run(bytes, sent, expected, timeout, completion) {
            Ok(response) => response,
            Err(e) => {
                warn!("Modem: exchange '{}' failed: {}", sent.unwrap_or("<data>"), e);
                self.rx.clear();
                Response::default()
            }
        };

        debug!(
            "Modem: '{}' -> [{}] matched={} timed_out={}",
            sent.unwrap_or("<data>"),
            response.text().replace('\n', " | "),
            response.matched,
            response.timed_out
        );

        // Device turnaround: applies to every exchange, success or failure.
        std::thread::sleep(self.config.settle());
        response
    }

    fn run(
        &mut self,
        bytes: &[u8],
        sent: Option<&str>,
        expected: &str,
        timeout: Duration,
        completion: Completion,
    ) -> ModemResult<Response> {
        if !bytes.is_empty() {
            self.transport.write_all(bytes)?;
        }

        let deadline = Instant::now() + timeout;
        let mut response = Response::default();
        let mut last_data: Option<Instant> = None;
        let mut chunk = [0u8; RX_CHUNK];

        loop {
            while let Some(text) = self.next_line() {
                let line = self.record(classify(&text, sent));
                if !expected.is_empty() && line.text().is_some_and(|t| t.contains(expected)) {
                    response.matched = true;
                }
                let done = match completion {
                    Completion::FinalResult => line.is_final(),
                    Completion::Token => response.matched || line.is_error(),
                    Completion::Prompt => line == Line::Prompt || line.is_error(),
                    Completion::Elapsed => false,
                };
                response.lines.push(line);
                if done {
                    return Ok(response);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                response.timed_out = completion != Completion::Elapsed;
                break;
            }
            if completion == Completion::Elapsed
                && last_data.is_some_and(|at| now.duration_since(at) >= self.config.idle_gap())
            {
                break;
            }

            let slice = (deadline - now).min(self.config.poll_slice());
            let n = self.transport.read(&mut chunk, slice)?;
            if n > 0 {
                if self.rx.len() + n > MAX_LINE_LEN {
                    return Err(ModemError::LineOverflow);
                }
                self.rx.extend_from_slice(&chunk[..n]);
                last_data = Some(Instant::now());
            }
        }

        // Devices that omit a clean terminator: scan the unterminated tail as well.
        if !response.matched && !expected.is_empty() && !self.rx.is_empty() {
            let tail = String::from_utf8_lossy(&self.rx).into_owned();
            if tail.contains(expected) {
                response.matched = true;
                self.rx.clear();
            }
        }
        Ok(response)
    }

    /// Next complete, non-empty line, or a bare `>` prompt (sent without terminator).
    fn next_line(&mut self) -> Option<String> {
        while let Some(end) = self.rx.iter().position(|&b| b == b'\r' || b == b'\n') {
            let raw: Vec<u8> = self.rx.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw[..end]).trim().to_string();
            if !text.is_empty() {
                trace!("Modem <- {}", text);
                return Some(text);
            }
        }
        if String::from_utf8_lossy(&self.rx).trim() == ">" {
            self.rx.clear();
            return Some(">".to_string());
        }
        None
    }

    fn record(&mut self, line: Line) -> Line {
        if let Line::Notification(text) = &line {
            if self.notifications.len() >= MAX_QUEUED_NOTIFICATIONS {
                self.notifications.pop_front();
            }
            self.notifications.push_back(text.clone());
        }
        line
    }

    /// Discard leftovers of earlier exchanges, keeping any notifications among them.
    fn drain_stale(&mut self) {
        let mut chunk = [0u8; RX_CHUNK];
        loop {
            match self.transport.read(&mut chunk, Duration::ZERO) {
                Ok(0) => break,
                Ok(n) => {
                    self.rx.extend_from_slice(&chunk[..n]);
                    if self.rx.len() > MAX_LINE_LEN {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Modem: drain failed: {}", e);
                    break;
                }
            }
        }
        while let Some(text) = self.next_line() {
            if let Line::Notification(_) = self.record(classify(&text, None)) {
                continue;
            }
            debug!("Modem: stale line discarded: {}", text);
        }
        self.rx.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{fast_engine, ScriptedModem};

    fn engine() -> (CommandEngine, ScriptedModem) {
        let script = ScriptedModem::new();
        (
            CommandEngine::new(Box::new(script.clone()), fast_engine()),
            script,
        )
    }

    const BUDGET: Duration = Duration::from_millis(40);

    #[test]
    fn test_execute_matches_token_before_final_result() {
        let (mut engine, script) = engine();
        script.on("AT+CGPS?", "\r\n+CGPS: 1,1\r\n\r\nOK\r\n");
        assert!(engine.execute("AT+CGPS?", "+CGPS: 1,1", BUDGET));
        assert_eq!(script.sent(), vec!["AT+CGPS?"]);
    }

    #[test]
    fn test_execute_mismatch_resolves_on_final_result() {
        let (mut engine, script) = engine();
        script.on("AT+CGPS?", "\r\n+CGPS: 0,1\r\n\r\nOK\r\n");
        let response = engine.exchange("AT+CGPS?", "+CGPS: 1,1", BUDGET, Completion::FinalResult);
        assert!(!response.matched);
        assert!(!response.timed_out);
        assert_eq!(response.final_result(), Some(&FinalResult::Ok));
    }

    #[test]
    fn test_echo_does_not_count_as_match() {
        let (mut engine, script) = engine();
        script.on("ATE0", "ATE0\r\n");
        assert!(!engine.execute("ATE0", "ATE0", BUDGET));
    }

    #[test]
    fn test_timeout_without_reply() {
        let (mut engine, _script) = engine();
        let response = engine.exchange("AT", "OK", BUDGET, Completion::FinalResult);
        assert!(!response.matched);
        assert!(response.timed_out);
    }

    #[test]
    fn test_unterminated_reply_still_matches() {
        let (mut engine, script) = engine();
        script.on("AT+CRESET", "\r\nOK");
        assert!(engine.execute("AT+CRESET", "OK", BUDGET));
    }

    #[test]
    fn test_token_completion_reads_past_ok() {
        let (mut engine, script) = engine();
        script.on("AT+CGPS=0", "\r\nOK\r\n\r\n+CGPS: 0\r\n");
        let response = engine.exchange("AT+CGPS=0", "+CGPS: 0", BUDGET, Completion::Token);
        assert!(response.matched);
        assert!(!response.timed_out);
    }

    #[test]
    fn test_token_completion_aborts_on_error() {
        let (mut engine, script) = engine();
        script.on("AT+CGPS=0", "\r\nERROR\r\n");
        let response = engine.exchange("AT+CGPS=0", "+CGPS: 0", BUDGET, Completion::Token);
        assert!(!response.matched);
        assert!(!response.timed_out);
    }

    #[test]
    fn test_prompt_without_terminator() {
        let (mut engine, script) = engine();
        script.on("AT+CMQTTTOPIC=0,3", "\r\n>");
        let response = engine.exchange("AT+CMQTTTOPIC=0,3", ">", BUDGET, Completion::Prompt);
        assert!(response.matched);
        assert!(!response.timed_out);
    }

    #[test]
    fn test_elapsed_scans_everything() {
        let (mut engine, script) = engine();
        script.on("AT+CCERTLIST", "\r\n+CCERTLIST: \"ca.pem\"\r\n\r\nOK\r\n");
        let response = engine.exchange("AT+CCERTLIST", "ca.pem", BUDGET, Completion::Elapsed);
        assert!(response.matched);
        assert_eq!(response.lines.len(), 2);
    }

    #[test]
    fn test_notifications_are_queued() {
        let (mut engine, script) = engine();
        script.on("AT", "\r\n+CMQTTCONNLOST: 0,1\r\nOK\r\n");
        assert!(engine.execute("AT", "OK", BUDGET));
        assert_eq!(engine.take_notifications(), vec!["+CMQTTCONNLOST: 0,1"]);
        assert!(engine.take_notifications().is_empty());
    }

    #[test]
    fn test_stale_input_is_drained_before_command() {
        let (mut engine, script) = engine();
        script.unsolicited("\r\nOK\r\n+CMQTTNONET\r\n");
        script.on("AT+CGPS?", "\r\n+CGPS: 0,1\r\nOK\r\n");
        assert!(!engine.execute("AT+CGPS?", "+CGPS: 1,1", BUDGET));
        assert_eq!(engine.take_notifications(), vec!["+CMQTTNONET"]);
    }

    #[test]
    fn test_poll_notifications() {
        let (mut engine, script) = engine();
        script.unsolicited("\r\n+CMQTTNONET: 0,1\r\nsomething else\r\n");
        engine.poll_notifications(Duration::from_millis(5));
        assert_eq!(engine.take_notifications(), vec!["+CMQTTNONET: 0,1"]);
    }

    #[test]
    fn test_await_token() {
        let (mut engine, script) = engine();
        script.unsolicited("\r\nRDY\r\n\r\nPB DONE\r\n");
        assert!(engine.await_token("PB DONE", BUDGET));
    }
}
