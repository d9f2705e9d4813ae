/// How the ingress controller formats the namespace inside each access log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Stock ingress-nginx format: `... [<namespace>-<service>-<port>] ...`
    DefaultFormat,
    /// Custom log-format carrying `[namespace: <namespace> ...]`
    CustomFormat,
}

#[derive(Debug, Clone)]
pub struct StreamFilterConfig {
    pub target_namespace: String,
    pub mode: FilterMode,
}

/// Substring filter selecting lines that belong to one application namespace.
///
/// The needle is built once; `matches` is a plain containment test with no
/// state carried between lines.
#[derive(Debug, Clone)]
pub struct StreamFilter {
    needle: String,
}

impl StreamFilter {
    pub fn new(config: &StreamFilterConfig) -> Self {
        let needle = match config.mode {
            FilterMode::DefaultFormat => format!(" [{}-", config.target_namespace),
            FilterMode::CustomFormat => format!(" [namespace: {}", config.target_namespace),
        };
        Self { needle }
    }

    /// Raw lines are searched byte-wise, so lines that are not valid UTF-8
    /// still match on their ASCII needle.
    pub fn matches(&self, line: &[u8]) -> bool {
        let needle = self.needle.as_bytes();
        line.len() >= needle.len() && line.windows(needle.len()).any(|w| w == needle)
    }

    pub fn pattern(&self) -> &str {
        &self.needle
    }
}

/// One-shot form of [`StreamFilter::matches`].
#[cfg(test)]
pub fn matches(line: &str, config: &StreamFilterConfig) -> bool {
    StreamFilter::new(config).matches(line.as_bytes())
}
