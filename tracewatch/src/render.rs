//! Plain-text rendering of the reconstructed trace tree.
//!
//! One line per trace: root requests show the HTTP columns, sub-traces show
//! a name-specific label the way operators know them from the producer
//! (render steps, scripts, queries, websocket frames). Durations draw as a
//! bar against the current duration scale.

use tracewatch_core::filter::{duration_scale, scale_ticks, tick_label};
use tracewatch_core::format::{format_size, quantity_word, Speed};
use tracewatch_core::{Trace, WebSocketStatus};

const BAR_WIDTH: usize = 24;

/// Print the scale header and every given root with its subtree.
pub fn render_tree(roots: &[&Trace], effective_max: u64) {
    let scale = duration_scale(effective_max);
    let ticks = scale_ticks(scale);
    println!(
        "-- {} -- scale: {} | {} | {} | {} --",
        quantity_word(
            roots.len(),
            "no requests",
            "1 request",
            &format!("{} requests", roots.len())
        ),
        tick_label(ticks[0]),
        tick_label(ticks[1]),
        tick_label(ticks[2]),
        tick_label(ticks[3]),
    );
    for root in roots {
        render_root(root, scale);
    }
}

/// Print one root trace and its subtree.
pub fn render_root(trace: &Trace, scale: u64) {
    let status = if trace.is_websocket() {
        "101".to_string()
    } else {
        trace
            .data
            .get_u64("status")
            .map(|s| s.to_string())
            .unwrap_or_default()
    };
    let kind = if trace.is_websocket() {
        match trace.websocket_status() {
            Some(WebSocketStatus::Open) => "WebSocket (open)".to_string(),
            Some(WebSocketStatus::Closed) => "WebSocket (closed)".to_string(),
            None => "WebSocket".to_string(),
        }
    } else {
        trace.data.content_type.clone().unwrap_or_default()
    };
    let path = trace
        .data
        .get_str("url")
        .map(|url| url.split("://").last().unwrap_or(url).to_string())
        .unwrap_or_else(|| trace.path().to_string());

    println!(
        "{:>3} {:<4} {:<40} {:<18} {:>8} {:>7} ms {} {}",
        status,
        trace.data.get_str("method").unwrap_or(""),
        path,
        kind,
        format_size(trace.data.get_u64("size")),
        trace.duration,
        bar(trace.duration, scale),
        Speed::from_duration_ms(trace.duration).as_str(),
    );
    for child in &trace.children {
        render_child(child, 1, scale);
    }
}

fn render_child(trace: &Trace, level: usize, scale: u64) {
    let (label, detail) = describe(trace);
    println!(
        "    {:indent$}{:<14} {:<46} {:>7} ms {}",
        "",
        label,
        detail,
        trace.duration,
        bar(trace.duration, scale),
        indent = (level - 1) * 2,
    );
    for child in &trace.children {
        render_child(child, level + 1, scale);
    }
}

/// Label and detail column for a sub-trace, by operation kind.
fn describe(trace: &Trace) -> (String, String) {
    let data = &trace.data;
    match trace.name.as_str() {
        "renderComponent" => (
            capitalize(data.content_type.as_deref().unwrap_or("component")),
            data.get_str("contentPath")
                .or_else(|| data.get_str("componentPath"))
                .unwrap_or("")
                .to_string(),
        ),
        "renderFilter" => (
            capitalize(data.content_type.as_deref().unwrap_or("filter")),
            format!(
                "{} {}",
                data.get_str("app").unwrap_or(""),
                data.get_str("name").unwrap_or("")
            ),
        ),
        "controllerScript" => (
            "Script".to_string(),
            data.get_str("script").unwrap_or("").to_string(),
        ),
        "renderApp" => (
            "App".to_string(),
            data.get_str("script")
                .or(data.path.as_deref())
                .unwrap_or("")
                .to_string(),
        ),
        "websocket" => (
            format!("WS {}", data.content_type.as_deref().unwrap_or("")),
            data.get_str("message").unwrap_or("").to_string(),
        ),
        name if name.contains('.') => {
            let (stack, method) = name.split_once('.').unwrap_or((name, ""));
            let detail = if let Some(query) = data.get_str("query") {
                format!(
                    "{}, from={}, size={}, hits={}",
                    query,
                    data.get_u64("from").unwrap_or(0),
                    data.get_u64("size").unwrap_or(0),
                    data.get_u64("hits").unwrap_or(0),
                )
            } else {
                data.path
                    .as_deref()
                    .or(data.get_str("id"))
                    .unwrap_or("")
                    .to_string()
            };
            (format!("{} {}", stack, method), detail)
        }
        _ => (
            data.get_str("traceName").unwrap_or(&trace.name).to_string(),
            data.get_str("url").or(data.path.as_deref()).unwrap_or("").to_string(),
        ),
    }
}

fn bar(duration: u64, scale: u64) -> String {
    let scale = scale.max(1);
    let filled = ((duration as f64 / scale as f64) * BAR_WIDTH as f64).ceil() as usize;
    let filled = filled.clamp(if duration > 0 { 1 } else { 0 }, BAR_WIDTH);
    format!("[{}{}]", "#".repeat(filled), " ".repeat(BAR_WIDTH - filled))
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trace(value: serde_json::Value) -> Trace {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_bar_is_bounded() {
        assert_eq!(bar(0, 500).matches('#').count(), 0);
        assert_eq!(bar(500, 500).matches('#').count(), BAR_WIDTH);
        assert_eq!(bar(5000, 500).matches('#').count(), BAR_WIDTH);
        assert!(bar(1, 500).matches('#').count() >= 1);
    }

    #[test]
    fn test_describe_dotted_names() {
        let t = trace(json!({
            "id": "q", "name": "node.query",
            "data": {"query": "type = 'post'", "from": 0, "size": 10, "hits": 3}
        }));
        let (label, detail) = describe(&t);
        assert_eq!(label, "node query");
        assert!(detail.contains("type = 'post'"));
        assert!(detail.contains("hits=3"));
    }

    #[test]
    fn test_describe_render_component() {
        let t = trace(json!({
            "id": "c", "name": "renderComponent",
            "data": {"type": "part", "componentPath": "main/0"}
        }));
        let (label, detail) = describe(&t);
        assert_eq!(label, "Part");
        assert_eq!(detail, "main/0");
    }
}
