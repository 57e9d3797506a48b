//! Best-effort recovery of anomaly events from generated-code output.
//!
//! Output is LLM-authored and frequently malformed, so extraction is a
//! cascade of increasingly loose scans. The first stage that yields at least
//! one event wins. Total failure yields an empty list, never an error.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::types::AnomalyEvent;

type Fields = BTreeMap<String, String>;

static ASSIGNED_ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(anomaly_events|events|anomalies)\s*=\s*\[([\s\S]*?)\]").expect("array regex")
});
static NAMED_ARRAY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"anomaly_events\s*=\s*\[([\s\S]*?)\]",
        r"events\s*=\s*\[([\s\S]*?)\]",
        r"const\s+anomalies\s*=\s*\[([\s\S]*?)\]",
        r"anomaly_event\s*=\s*\[([\s\S]*?)\]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("named array regex"))
    .collect()
});
static OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([^{}]*(?:\{[^{}]*\}[^{}]*)*)\}").expect("object regex")
});
static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:"?(\w+)"?\s*:|'?(\w+)'?\s*:)\s*(?:"([^"]*)"|('[^']*')|([^,}]*))"#)
        .expect("pair regex")
});
static OBJECT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\[\s*(\{.*?\}(?:\s*,\s*\{.*?\})*)\s*\]").expect("object list regex")
});
static PAIR_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*").expect("pair split regex"));

/// Keys that mark a bare object as an anomaly event in the last stage.
const EVENT_KEYS: [&str; 4] = ["data_source", "timestamp", "description", "cmdb_id"];

/// Run the extraction cascade over `output`.
pub fn extract_anomaly_events(output: &str) -> Vec<AnomalyEvent> {
    let stages: [(&str, fn(&str) -> Vec<Fields>); 3] = [
        ("assigned_array", scan_assigned_array),
        ("named_array", scan_named_arrays),
        ("object_list", scan_object_list),
    ];
    for (stage, scan) in stages {
        let found = scan(output);
        if !found.is_empty() {
            debug!(stage, count = found.len(), "anomaly events extracted");
            return found.into_iter().map(AnomalyEvent::from_fields).collect();
        }
    }
    Vec::new()
}

/// Stage 1: `name = [ ... ]` with balanced-brace item splitting.
fn scan_assigned_array(output: &str) -> Vec<Fields> {
    let Some(body) = ASSIGNED_ARRAY_RE
        .captures(output)
        .and_then(|caps| caps.get(2))
    else {
        return Vec::new();
    };
    split_balanced_objects(body.as_str())
        .iter()
        .map(|item| parse_split_pairs(item))
        .filter(|fields| !fields.is_empty())
        .collect()
}

/// Stage 2: known array names, objects matched by regex, lenient pairs.
fn scan_named_arrays(output: &str) -> Vec<Fields> {
    for re in NAMED_ARRAY_RES.iter() {
        let Some(body) = re.captures(output).and_then(|caps| caps.get(1)) else {
            continue;
        };
        let events: Vec<Fields> = OBJECT_RE
            .captures_iter(body.as_str())
            .filter_map(|caps| caps.get(1))
            .map(|m| parse_regex_pairs(m.as_str()))
            .filter(|fields| !fields.is_empty())
            .collect();
        if !events.is_empty() {
            return events;
        }
    }
    Vec::new()
}

/// Stage 3: any bracketed list of objects, kept only if they look like events.
fn scan_object_list(output: &str) -> Vec<Fields> {
    let Some(body) = OBJECT_LIST_RE.captures(output).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };
    OBJECT_RE
        .captures_iter(body.as_str())
        .filter_map(|caps| caps.get(1))
        .map(|m| parse_regex_pairs(m.as_str()))
        .filter(|fields| EVENT_KEYS.iter().any(|key| fields.contains_key(*key)))
        .collect()
}

/// Top-level `{...}` items of an array body, braces included.
fn split_balanced_objects(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in body.chars() {
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' if depth > 0 => {
                depth -= 1;
                current.push(ch);
                if depth == 0 {
                    let item = current.trim().to_string();
                    if !item.is_empty() {
                        items.push(item);
                    }
                    current.clear();
                }
            }
            _ if depth > 0 => current.push(ch),
            _ => {}
        }
    }
    items
}

fn strip_quotes(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Split on commas, then on the first colon of each pair.
fn parse_split_pairs(item: &str) -> Fields {
    let inner = item.trim().trim_matches(|c| c == '{' || c == '}');
    let mut fields = Fields::new();
    for pair in PAIR_SPLIT_RE.split(inner) {
        if let Some((key, value)) = pair.split_once(':') {
            let key = strip_quotes(key);
            if !key.is_empty() {
                fields.insert(key.to_string(), strip_quotes(value).to_string());
            }
        }
    }
    fields
}

/// Regex-driven `key: value` scan; pairs with an empty key or value are dropped.
fn parse_regex_pairs(object: &str) -> Fields {
    let mut fields = Fields::new();
    for caps in PAIR_RE.captures_iter(object) {
        let key = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
        let value = caps
            .get(3)
            .or_else(|| caps.get(4))
            .or_else(|| caps.get(5))
            .map(|m| strip_quotes(m.as_str()));
        if let (Some(key), Some(value)) = (key, value)
            && !key.is_empty()
            && !value.is_empty()
        {
            fields.insert(key.to_string(), value.to_string());
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigned_python_literal_is_recovered() {
        let output = "Analysis done\nanomaly_events = [\
            {'data_source': 'Metric', 'timestamp': '2021-03-04 14:30:00', \
            'cmdb_id': 'Tomcat01', 'description': 'cpu spike'}, \
            {\"data_source\": \"Log\", \"cmdb_id\": \"Mysql02\"}]";
        let events = extract_anomaly_events(output);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data_source.as_deref(), Some("Metric"));
        assert_eq!(events[0].timestamp.as_deref(), Some("2021-03-04 14:30:00"));
        assert_eq!(events[0].component_id.as_deref(), Some("Tomcat01"));
        assert_eq!(events[0].description.as_deref(), Some("cpu spike"));
        assert_eq!(events[1].component_id.as_deref(), Some("Mysql02"));
    }

    #[test]
    fn singular_array_name_keeps_objects_without_event_keys() {
        let output = "anomaly_event = [{\"cmdb_id\": \"IG01\", \"description\": \"latency\"}, {\"note\": \"x\"}]";
        let events = extract_anomaly_events(output);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].component_id.as_deref(), Some("IG01"));
        assert_eq!(events[1].extra.get("note").map(String::as_str), Some("x"));
    }

    #[test]
    fn object_list_tolerates_nested_brackets() {
        // The assigned-array scans stop at the inner `]` and find no whole object.
        let output = "const anomalies = [{\"cmdb_id\": \"IG01\", \"tags\": [\"x\"], \"description\": \"nested {ok}\"}]";
        let events = extract_anomaly_events(output);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].component_id.as_deref(), Some("IG01"));
        assert_eq!(events[0].description.as_deref(), Some("nested {ok}"));
    }

    #[test]
    fn bare_object_list_requires_event_keys() {
        let output = "printed: [{\"cmdb_id\": \"apache01\", \"score\": 9}, {\"other\": 1}]";
        let events = extract_anomaly_events(output);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].component_id.as_deref(), Some("apache01"));
        assert_eq!(events[0].extra.get("score").map(String::as_str), Some("9"));
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(extract_anomaly_events("no events were found in the window").is_empty());
        assert!(extract_anomaly_events("values = [1, 2, 3]").is_empty());
    }

    #[test]
    fn empty_assigned_array_falls_through() {
        assert!(extract_anomaly_events("anomaly_events = []").is_empty());
    }
}
