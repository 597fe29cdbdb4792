/// Log tags identify which subsystem produced a message
///
/// Each tag maps to a `--debug-<tag>` command-line flag so operators can turn
/// on detailed logs for a single subsystem without drowning in the rest.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Trader,
    Decision,
    Exchange,
    Market,
    Ai,
    Risk,
    Journal,
    Config,
    System,
}

impl LogTag {
    /// Short uppercase label shown in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Trader => "TRADER",
            LogTag::Decision => "DECISION",
            LogTag::Exchange => "EXCHANGE",
            LogTag::Market => "MARKET",
            LogTag::Ai => "AI",
            LogTag::Risk => "RISK",
            LogTag::Journal => "JOURNAL",
            LogTag::Config => "CONFIG",
            LogTag::System => "SYSTEM",
        }
    }

    /// Key used for --debug-<key> / --verbose-<key> flag lookup
    pub fn to_debug_key(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
