//! Classification of received modem lines.

/// Prefixes the SIM7600 emits without being asked.
const UNSOLICITED_PREFIXES: &[&str] = &[
    "RDY",
    "PB DONE",
    "SMS DONE",
    "+CPIN:",
    "+CMQTTCONNLOST",
    "+CMQTTNONET",
    "+CMQTTRXSTART",
    "+CMQTTRXTOPIC",
    "+CMQTTRXPAYLOAD",
    "+CMQTTRXEND",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalResult {
    Ok,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// The command we just sent, reflected back while echo is on.
    Echo,
    Final(FinalResult),
    /// `>` data-entry prompt of a staged upload.
    Prompt,
    Notification(String),
    Information(String),
}

impl Line {
    /// Text that takes part in token matching. Echoes never match.
    pub fn text(&self) -> Option<&str> {
        match self {
            Line::Echo => None,
            Line::Final(FinalResult::Ok) => Some("OK"),
            Line::Final(FinalResult::Error(text)) => Some(text),
            Line::Prompt => Some(">"),
            Line::Notification(text) | Line::Information(text) => Some(text),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Line::Final(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Line::Final(FinalResult::Error(_)))
    }
}

/// Classify one trimmed, non-empty line. `sent` is the command of the running
/// exchange, if any.
pub fn classify(line: &str, sent: Option<&str>) -> Line {
    if sent.is_some_and(|command| command == line) {
        return Line::Echo;
    }
    if line == "OK" {
        return Line::Final(FinalResult::Ok);
    }
    if line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR") {
        return Line::Final(FinalResult::Error(line.to_string()));
    }
    if line == ">" {
        return Line::Prompt;
    }
    if UNSOLICITED_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
        return Line::Notification(line.to_string());
    }
    Line::Information(line.to_string())
}
