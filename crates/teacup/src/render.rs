//! Event rendering
//!
//! Turns lifecycle events into one human-readable line each. Rendering is a
//! pure function of the event plus the per-connection [`Renderer`] settings;
//! where the line goes is up to the [`EventSink`].

use std::time::Duration;

use crossterm::style::{Color, Stylize};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::event::{Event, EventKind, EventStatus};

/// Payload previews longer than this are cut
pub const PREVIEW_LIMIT: usize = 60;

const ELLIPSIS: &str = "...";

/// Marker for an absent payload
const NOTHING: &str = "Ø";

/// Foreground colors a connection can be rendered in
pub const PALETTE: [Color; 11] = [
    Color::Grey,
    Color::DarkBlue,
    Color::Blue,
    Color::DarkGreen,
    Color::Green,
    Color::DarkYellow,
    Color::Yellow,
    Color::DarkCyan,
    Color::Cyan,
    Color::DarkMagenta,
    Color::Magenta,
];

/// Pick a palette color for a new connection
pub fn pick_color() -> Color {
    PALETTE
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(Color::Grey)
}

/// Deny-list of method-name substrings whose events are never rendered
#[derive(Debug, Clone, Default)]
pub struct MethodFilter {
    denied: Vec<String>,
}

impl MethodFilter {
    pub fn new<I, S>(denied: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: denied
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, method: &str) -> bool {
        !self.denied.iter().any(|d| method.contains(d.as_str()))
    }
}

/// A rendered line and the color it should be shown in
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLine {
    pub color: Option<Color>,
    pub text: String,
}

/// Destination for rendered event lines
pub trait EventSink: Send + Sync {
    fn emit(&self, line: &RenderedLine);
}

/// Prints event lines on stdout
#[derive(Debug, Default)]
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, line: &RenderedLine) {
        match line.color {
            Some(color) => println!("{}", line.text.as_str().with(color)),
            None => println!("{}", line.text),
        }
    }
}

/// Per-connection rendering settings
#[derive(Debug, Clone)]
pub struct Renderer {
    name: String,
    color: Option<Color>,
    filter: MethodFilter,
}

impl Renderer {
    pub fn new(name: impl Into<String>, color: Option<Color>, filter: MethodFilter) -> Self {
        Self {
            name: name.into(),
            color,
            filter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn should_render(&self, event: &Event) -> bool {
        self.filter.allows(event.method())
    }

    /// Render `event` indented by `depth` pending requests, `delta` after the
    /// previous rendered line.
    pub fn render(&self, event: &Event, depth: usize, delta: Duration) -> RenderedLine {
        let text = format!(
            "{:>10} {}{} {} {}",
            format_delta(delta),
            "  ".repeat(depth),
            event.direction().arrow(),
            self.name,
            describe(event)
        );
        RenderedLine {
            color: self.color,
            text,
        }
    }
}

/// Body of a rendered line, without delta, indent, arrow or name
pub fn describe(event: &Event) -> String {
    let id = event.id();
    let method = event.method();

    match event.kind() {
        EventKind::Notification => {
            if method == "Log" {
                if let Some(msg) = log_message(event.params()) {
                    return format!("# {}", msg);
                }
            }
            format!("- {} {}", method, preview(event.params()))
        }
        EventKind::Request => match event.status() {
            EventStatus::Pending => format!("• [{}] {} {}", id, method, preview(event.params())),
            EventStatus::Completed => format!(
                "✔ [{}] {} ({:?}) {}",
                id,
                method,
                event.duration(),
                preview(event.result())
            ),
            EventStatus::Errored => format!(
                "✕ [{}] {} ({:?}) {}",
                id,
                method,
                event.duration(),
                truncate(event.error().map(|e| e.message.as_str()).unwrap_or(""))
            ),
            EventStatus::Cancelled => format!("⚐ [{}] {} ({:?})", id, method, event.duration()),
        },
    }
}

#[derive(Deserialize)]
struct LogParams {
    message: String,
}

fn log_message(params: Option<&RawValue>) -> Option<String> {
    let params: LogParams = serde_json::from_str(params?.get()).ok()?;
    Some(params.message)
}

/// Cut `s` to [`PREVIEW_LIMIT`] characters, marking the cut
pub fn truncate(s: &str) -> String {
    match s.char_indices().nth(PREVIEW_LIMIT) {
        Some((cut, _)) => format!("{}{}", &s[..cut], ELLIPSIS),
        None => s.to_string(),
    }
}

fn preview(payload: Option<&RawValue>) -> String {
    match payload {
        Some(raw) => truncate(raw.get()),
        None => NOTHING.to_string(),
    }
}

/// Time since the previous line: blank under 1ms, `+N ms` under 1s, else `+N.NN s`
pub fn format_delta(delta: Duration) -> String {
    if delta < Duration::from_millis(1) {
        String::new()
    } else if delta < Duration::from_secs(1) {
        format!("+{:.0} ms", delta.as_secs_f64() * 1000.0)
    } else {
        format!("+{:.2} s", delta.as_secs_f64())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Direction;
    use teacup_protocol::{ErrorCode, RpcError};

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    #[test]
    fn test_truncate_long_payload() {
        let long = "x".repeat(75);
        let cut = truncate(&long);
        assert_eq!(cut, format!("{}...", "x".repeat(60)));
    }

    #[test]
    fn test_truncate_boundary() {
        let exact = "y".repeat(60);
        assert_eq!(truncate(&exact), exact);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn test_truncate_counts_characters() {
        let wide = "é".repeat(61);
        assert_eq!(truncate(&wide), format!("{}...", "é".repeat(60)));
    }

    #[test]
    fn test_format_delta() {
        assert_eq!(format_delta(Duration::from_micros(500)), "");
        assert_eq!(format_delta(Duration::from_millis(42)), "+42 ms");
        assert_eq!(format_delta(Duration::from_millis(1500)), "+1.50 s");
    }

    #[test]
    fn test_filter_substring_match() {
        let filter = MethodFilter::new(["Fetch.Commons", "Profile.Data"]);
        assert!(!filter.allows("Fetch.Commons"));
        assert!(!filter.allows("Fetch.CommonsBatch"));
        assert!(!filter.allows("User.Profile.Data"));
        assert!(filter.allows("Fetch.Game"));
    }

    #[test]
    fn test_empty_filter_entries_are_ignored() {
        let filter = MethodFilter::new([""]);
        assert!(filter.allows("Anything"));
    }

    #[test]
    fn test_describe_pending() {
        let params = raw(r#"{"id":4}"#);
        let ev = Event::request(Direction::Outbound, 12, "Game.Fetch", Some(&params));
        assert_eq!(describe(&ev), r#"• [12] Game.Fetch {"id":4}"#);
    }

    #[test]
    fn test_describe_missing_params() {
        let ev = Event::request(Direction::Outbound, 1, "Ping", None);
        assert_eq!(describe(&ev), "• [1] Ping Ø");
    }

    #[test]
    fn test_describe_terminal_states() {
        let mut done = Event::request(Direction::Outbound, 1, "Ping", None);
        done.complete(Some(&raw("true")));
        let text = describe(&done);
        assert!(text.starts_with("✔ [1] Ping ("));
        assert!(text.ends_with(") true"));

        let mut failed = Event::request(Direction::Inbound, 2, "Pong", None);
        failed.fail(&RpcError::new(ErrorCode::InternalError, "kaboom"));
        let text = describe(&failed);
        assert!(text.starts_with("✕ [2] Pong ("));
        assert!(text.ends_with(") kaboom"));

        let mut gone = Event::request(Direction::Inbound, 3, "Wait", None);
        gone.cancel();
        let text = describe(&gone);
        assert!(text.starts_with("⚐ [3] Wait ("));
        assert!(text.ends_with(')'));
    }

    #[test]
    fn test_describe_notification() {
        let params = raw(r#"{"progress":0.5}"#);
        let ev = Event::notification(Direction::Inbound, "Progress", Some(&params));
        assert_eq!(describe(&ev), r#"- Progress {"progress":0.5}"#);
    }

    #[test]
    fn test_describe_log_notification() {
        let params = raw(r#"{"level":"info","message":"warming up"}"#);
        let ev = Event::notification(Direction::Inbound, "Log", Some(&params));
        assert_eq!(describe(&ev), "# warming up");

        let odd = raw(r#"[1]"#);
        let ev = Event::notification(Direction::Inbound, "Log", Some(&odd));
        assert_eq!(describe(&ev), "- Log [1]");
    }

    #[test]
    fn test_params_preview_is_truncated() {
        let body = format!(r#"{{"blob":"{}"}}"#, "z".repeat(80));
        let params = raw(&body);
        let ev = Event::request(Direction::Outbound, 5, "Upload", Some(&params));

        let text = describe(&ev);
        let shown = text.trim_start_matches("• [5] Upload ");
        assert_eq!(shown, format!("{}...", &body[..60]));
    }

    #[test]
    fn test_render_layout() {
        let renderer = Renderer::new("{9000}", None, MethodFilter::default());
        let ev = Event::request(Direction::Inbound, 7, "Ask", None);

        let line = renderer.render(&ev, 2, Duration::from_millis(5));
        assert_eq!(line.text, "     +5 ms     ← {9000} • [7] Ask Ø");
        assert!(line.color.is_none());

        let out = Event::request(Direction::Outbound, 8, "Tell", None);
        let line = renderer.render(&out, 0, Duration::ZERO);
        assert_eq!(line.text, "           → {9000} • [8] Tell Ø");
    }

    #[test]
    fn test_pick_color_from_palette() {
        for _ in 0..20 {
            assert!(PALETTE.contains(&pick_color()));
        }
    }
}
