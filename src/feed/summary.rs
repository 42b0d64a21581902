/// Number of header names shown in log output.
const PREVIEW_COLUMNS: usize = 5;

/// Shape of a downloaded CSV body, for logging only.
///
/// Values are never interpreted: the header line is split on commas
/// without quote handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSummary {
    pub lines: usize,
    pub columns: usize,
    /// First few header names, in order.
    pub header_preview: Vec<String>,
}

impl FeedSummary {
    pub fn from_text(text: &str) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let lines = text.lines().count();
        let header: Vec<&str> = match text.lines().next() {
            Some(first) if !first.trim().is_empty() => first.split(',').collect(),
            _ => Vec::new(),
        };

        Self {
            lines,
            columns: header.len(),
            header_preview: header
                .iter()
                .take(PREVIEW_COLUMNS)
                .map(|h| h.trim().to_string())
                .collect(),
        }
    }

    /// Header preview joined for display, with `...` when truncated.
    pub fn preview(&self) -> String {
        let mut out = self.header_preview.join(", ");
        if self.columns > self.header_preview.len() {
            out.push_str(", ...");
        }
        out
    }
}
