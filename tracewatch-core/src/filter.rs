//! Trace filtering and duration-scale computation
//!
//! Filtering is recomputed from scratch on every call: no incremental state,
//! O(n) over the current roots, which are bounded by session size. The
//! filtered result carries its own maximum duration so the timeline can be
//! rescaled to the visible subset independently of filtered-out traces.

use serde::{Deserialize, Serialize};

use crate::types::Trace;

/// Minimum duration scale; the session maximum also starts here.
pub const DURATION_FLOOR_MS: u64 = 500;

/// Path segment marking internal service requests.
const INTERNAL_SEGMENT: &str = "/_/";
const COMPONENT_SEGMENT: &str = "/_/component/";
const SERVICE_SEGMENT: &str = "/_/service/";
const ASSET_SEGMENT: &str = "/_/asset/";
const IMAGE_SEGMENT: &str = "/_/image/";

/// Request category a root trace can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceCategory {
    All,
    Page,
    Component,
    Service,
    Asset,
    Image,
    #[serde(rename = "ws")]
    WebSocket,
    Other,
}

impl TraceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceCategory::All => "all",
            TraceCategory::Page => "page",
            TraceCategory::Component => "component",
            TraceCategory::Service => "service",
            TraceCategory::Asset => "asset",
            TraceCategory::Image => "image",
            TraceCategory::WebSocket => "ws",
            TraceCategory::Other => "other",
        }
    }

    /// Whether `trace` falls into this category.
    pub fn matches(&self, trace: &Trace) -> bool {
        match self {
            TraceCategory::All => true,
            TraceCategory::Page => {
                let is_html = trace
                    .data
                    .content_type
                    .as_deref()
                    .is_some_and(|t| t.contains("text/html"));
                is_html && !path_contains(trace, INTERNAL_SEGMENT)
            }
            TraceCategory::Component => path_contains(trace, COMPONENT_SEGMENT),
            TraceCategory::Service => path_contains(trace, SERVICE_SEGMENT),
            TraceCategory::Asset => path_contains(trace, ASSET_SEGMENT),
            TraceCategory::Image => path_contains(trace, IMAGE_SEGMENT),
            TraceCategory::WebSocket => trace.is_websocket(),
            TraceCategory::Other => {
                !TraceCategory::Page.matches(trace)
                    && !TraceCategory::Component.matches(trace)
                    && !TraceCategory::Service.matches(trace)
                    && !TraceCategory::Asset.matches(trace)
                    && !TraceCategory::Image.matches(trace)
                    && !TraceCategory::WebSocket.matches(trace)
            }
        }
    }
}

impl std::str::FromStr for TraceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(TraceCategory::All),
            "page" => Ok(TraceCategory::Page),
            "component" => Ok(TraceCategory::Component),
            "service" => Ok(TraceCategory::Service),
            "asset" => Ok(TraceCategory::Asset),
            "image" => Ok(TraceCategory::Image),
            "ws" | "websocket" => Ok(TraceCategory::WebSocket),
            "other" => Ok(TraceCategory::Other),
            _ => Err(format!("unknown trace category: {}", s)),
        }
    }
}

fn path_contains(trace: &Trace, segment: &str) -> bool {
    trace.display_path().is_some_and(|p| p.contains(segment))
}

/// What the operator is currently filtering on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Category to keep; `None` and `All` keep everything.
    pub category: Option<TraceCategory>,

    /// Case-sensitive substring matched against the trace path; empty
    /// string disables text filtering.
    #[serde(default)]
    pub search_text: String,
}

impl FilterSpec {
    /// Both predicates must pass: the active category (if any) AND the
    /// active search text (if any).
    pub fn matches(&self, trace: &Trace) -> bool {
        let category_ok = match self.category {
            None | Some(TraceCategory::All) => true,
            Some(category) => category.matches(trace),
        };
        let text_ok = self.search_text.is_empty() || trace.path().contains(&self.search_text);
        category_ok && text_ok
    }

    /// Whether any predicate is active at all.
    pub fn is_active(&self) -> bool {
        !self.search_text.is_empty() || !matches!(self.category, None | Some(TraceCategory::All))
    }
}

/// The visible subset of roots together with its own duration maximum.
#[derive(Debug)]
pub struct FilterResult<'a> {
    /// Matching roots, in their committed order.
    pub traces: Vec<&'a Trace>,

    /// Maximum duration among the matched set only; `None` when no filter
    /// was active and the session-wide maximum applies.
    pub max_duration: Option<u64>,
}

impl FilterResult<'_> {
    /// The duration maximum to scale the timeline by: the filtered maximum
    /// when one is in effect and non-zero, otherwise the session-wide value.
    pub fn effective_max(&self, session_max: u64) -> u64 {
        match self.max_duration {
            Some(d) if d > 0 => d,
            _ => session_max,
        }
    }
}

/// Produce the ordered subsequence of `roots` matching `spec`.
pub fn filter_roots<'a>(roots: &'a [Trace], spec: &FilterSpec) -> FilterResult<'a> {
    if !spec.is_active() {
        return FilterResult {
            traces: roots.iter().collect(),
            max_duration: None,
        };
    }

    let mut max_duration = 0;
    let traces = roots
        .iter()
        .filter(|t| {
            let keep = spec.matches(t);
            if keep && t.duration > max_duration {
                max_duration = t.duration;
            }
            keep
        })
        .collect();

    FilterResult {
        traces,
        max_duration: Some(max_duration),
    }
}

// ============================================
// Duration scale
// ============================================

/// Display scale for a duration: floored at 500 ms, otherwise rounded up to
/// the next whole second.
pub fn duration_scale(d: u64) -> u64 {
    if d <= DURATION_FLOOR_MS {
        DURATION_FLOOR_MS
    } else {
        d.div_ceil(1000) * 1000
    }
}

/// Tick marks at 1/4, 1/2, 3/4 and full scale.
pub fn scale_ticks(scale: u64) -> [u64; 4] {
    [scale / 4, scale / 2, scale / 4 * 3, scale]
}

/// Tick label: whole seconds render as `N s`, everything else as `N ms`.
pub fn tick_label(value: u64) -> String {
    if value % 1000 == 0 {
        format!("{} s", value / 1000)
    } else {
        format!("{} ms", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trace(value: serde_json::Value) -> Trace {
        serde_json::from_value(value).unwrap()
    }

    fn roots() -> Vec<Trace> {
        vec![
            trace(json!({"id": "1", "name": "portalRequest", "duration": 80,
                "data": {"path": "/_/image/x", "type": "image/png"}})),
            trace(json!({"id": "2", "name": "portalRequest", "duration": 200,
                "data": {"path": "/_/service/y", "type": "application/json"}})),
            trace(json!({"id": "3", "name": "portalRequest", "duration": 950,
                "data": {"path": "/page", "type": "text/html; charset=utf-8"}})),
            trace(json!({"id": "4", "name": "portalRequest", "duration": 10,
                "data": {"path": "/chat", "websocket": true}})),
        ]
    }

    #[test]
    fn test_category_predicates() {
        let roots = roots();
        assert!(TraceCategory::Image.matches(&roots[0]));
        assert!(!TraceCategory::Image.matches(&roots[1]));
        assert!(TraceCategory::Service.matches(&roots[1]));
        assert!(TraceCategory::Page.matches(&roots[2]));
        assert!(TraceCategory::WebSocket.matches(&roots[3]));
        assert!(!TraceCategory::Other.matches(&roots[3]));

        // html served under an internal path is not a page
        let internal = trace(json!({"id": "5", "name": "portalRequest",
            "data": {"path": "/_/component/nav", "type": "text/html"}}));
        assert!(!TraceCategory::Page.matches(&internal));
        assert!(TraceCategory::Component.matches(&internal));
    }

    #[test]
    fn test_rawpath_preferred_for_classification() {
        let t = trace(json!({"id": "1", "name": "portalRequest",
            "data": {"path": "/pretty/url", "rawpath": "/_/asset/app/x.css"}}));
        assert!(TraceCategory::Asset.matches(&t));
    }

    #[test]
    fn test_filter_image_scenario() {
        let roots = roots();
        let spec = FilterSpec {
            category: Some(TraceCategory::Image),
            search_text: String::new(),
        };
        let result = filter_roots(&roots, &spec);
        assert_eq!(result.traces.len(), 1);
        assert_eq!(result.traces[0].id, "1");
        assert_eq!(result.max_duration, Some(80));
        assert_eq!(result.effective_max(2000), 80);
    }

    #[test]
    fn test_filter_and_composition() {
        let roots = roots();
        let both = FilterSpec {
            category: Some(TraceCategory::Service),
            search_text: "/y".to_string(),
        };
        let category_only = FilterSpec {
            category: Some(TraceCategory::Service),
            search_text: String::new(),
        };
        let text_only = FilterSpec {
            category: None,
            search_text: "/y".to_string(),
        };

        let combined: Vec<_> = filter_roots(&roots, &both)
            .traces
            .iter()
            .map(|t| t.id.clone())
            .collect();
        let intersection: Vec<_> = roots
            .iter()
            .filter(|t| category_only.matches(t) && text_only.matches(t))
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(combined, intersection);
        assert_eq!(combined, vec!["2".to_string()]);
    }

    #[test]
    fn test_search_is_case_sensitive() {
        let roots = roots();
        let spec = FilterSpec {
            category: None,
            search_text: "/PAGE".to_string(),
        };
        assert!(filter_roots(&roots, &spec).traces.is_empty());
    }

    #[test]
    fn test_inactive_filter_returns_everything() {
        let roots = roots();
        let result = filter_roots(&roots, &FilterSpec::default());
        assert_eq!(result.traces.len(), roots.len());
        assert_eq!(result.max_duration, None);
        assert_eq!(result.effective_max(2300), 2300);
    }

    #[test]
    fn test_duration_scale_floor_and_rounding() {
        assert_eq!(duration_scale(0), 500);
        assert_eq!(duration_scale(500), 500);
        assert_eq!(duration_scale(501), 1000);
        assert_eq!(duration_scale(1000), 1000);
        assert_eq!(duration_scale(1001), 2000);
        assert_eq!(duration_scale(7399), 8000);

        for d in [0, 1, 499, 500, 501, 999, 1000, 4321, 99999] {
            let s = duration_scale(d);
            assert!(s >= 500);
            if s > 500 {
                assert_eq!(s % 1000, 0);
            }
            assert!(s >= d);
        }
    }

    #[test]
    fn test_scale_ticks_and_labels() {
        assert_eq!(scale_ticks(2000), [500, 1000, 1500, 2000]);
        assert_eq!(tick_label(500), "500 ms");
        assert_eq!(tick_label(1000), "1 s");
        assert_eq!(tick_label(1500), "1500 ms");
        assert_eq!(tick_label(2000), "2 s");
    }
}
