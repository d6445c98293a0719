//! Sample filtering and topic derivation.
//!
//! A sample is published iff its family name is a key of the target's filter
//! map and every configured label matches one of its allowed values. The
//! topic is a pure function of (prefix, sample name, ordered label pairs).

use crate::config::{LabelFilter, ScraperConfig};
use crate::exposition::MetricFamily;

/// Select the (topic, value) pairs to publish from a parsed scrape.
pub fn select(
    families: &[MetricFamily],
    prefix: &str,
    scraper: &ScraperConfig,
) -> Vec<(String, f64)> {
    let mut out = Vec::new();

    for family in families {
        let Some(filter) = scraper.filters.get(&family.name) else {
            continue;
        };
        for sample in &family.samples {
            if matches(filter, &sample.labels) {
                out.push((
                    flatten_topic(prefix, &sample.name, &sample.labels),
                    sample.value,
                ));
            }
        }
    }

    out
}

/// Check a sample's labels against a configured filter. An empty filter
/// passes everything; otherwise every configured label must be present with
/// an allowed value.
fn matches(filter: &LabelFilter, labels: &[(String, String)]) -> bool {
    filter.iter().all(|(name, allowed)| {
        labels
            .iter()
            .find(|(label, _)| label == name)
            .is_some_and(|(_, value)| allowed.contains(value))
    })
}

/// Derive the topic for a sample.
///
/// Joins `label_value` pairs with underscores onto the sample name, replaces
/// topic-level separators (`/`) in the flattened part with underscores,
/// collapses runs of underscores, and trims a trailing one. The prefix is
/// prepended untouched.
pub fn flatten_topic(prefix: &str, name: &str, labels: &[(String, String)]) -> String {
    let mut flat = String::with_capacity(name.len() + labels.len() * 8);
    flat.push_str(name);
    for (label, value) in labels {
        flat.push('_');
        flat.push_str(label);
        flat.push('_');
        flat.push_str(value);
    }

    let mut topic = String::with_capacity(prefix.len() + flat.len());
    topic.push_str(prefix);
    let mut last_was_underscore = false;
    for c in flat.chars() {
        let c = if c == '/' { '_' } else { c };
        if c == '_' {
            if !last_was_underscore {
                topic.push('_');
            }
            last_was_underscore = true;
        } else {
            topic.push(c);
            last_was_underscore = false;
        }
    }

    while topic.len() > prefix.len() && topic.ends_with('_') {
        topic.pop();
    }

    topic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::exposition::parse;

    fn scraper(json: &str) -> ScraperConfig {
        json5::from_str(json).unwrap()
    }

    #[test]
    fn test_label_filter_selects_matching_sample() {
        let scraper = scraper(
            r#"{
                exporter_url: "http://x/metrics",
                filters: { temp: { room: "kitchen" } }
            }"#,
        );
        let families = parse("temp{room=\"kitchen\"} 21.5\ntemp{room=\"bath\"} 19.0\n");

        let selected = select(&families, "", &scraper);
        assert_eq!(selected, vec![("temp_room_kitchen".to_string(), 21.5)]);
    }

    #[test]
    fn test_family_absent_from_filters_never_published() {
        let scraper = scraper(
            r#"{
                exporter_url: "http://x/metrics",
                filters: { temp: {} }
            }"#,
        );
        let families = parse("humidity{room=\"kitchen\"} 55\nhumidity{room=\"bath\"} 70\n");

        assert!(select(&families, "", &scraper).is_empty());
    }

    #[test]
    fn test_empty_label_filter_passes_all() {
        let scraper = scraper(
            r#"{
                exporter_url: "http://x/metrics",
                filters: { temp: {} }
            }"#,
        );
        let families = parse("temp{room=\"kitchen\"} 21.5\ntemp{room=\"bath\"} 19.0\n");

        assert_eq!(select(&families, "", &scraper).len(), 2);
    }

    #[test]
    fn test_missing_label_fails_filter() {
        let scraper = scraper(
            r#"{
                exporter_url: "http://x/metrics",
                filters: { temp: { room: "kitchen" } }
            }"#,
        );
        let families = parse("temp 21.5\n");

        assert!(select(&families, "", &scraper).is_empty());
    }

    #[test]
    fn test_value_set_filter() {
        let scraper = scraper(
            r#"{
                exporter_url: "http://x/metrics",
                filters: { temp: { room: ["kitchen", "bath"] } }
            }"#,
        );
        let families = parse(
            "temp{room=\"kitchen\"} 21.5\ntemp{room=\"bath\"} 19.0\ntemp{room=\"hall\"} 18.0\n",
        );

        assert_eq!(select(&families, "", &scraper).len(), 2);
    }

    #[test]
    fn test_topic_prefix_and_separator_replacement() {
        let topic = flatten_topic("home/", "a/b", &[("x".to_string(), "y".to_string())]);
        assert_eq!(topic, "home/a_b_x_y");
    }

    #[test]
    fn test_topic_no_labels_has_no_trailing_separator() {
        assert_eq!(flatten_topic("home/", "uptime", &[]), "home/uptime");
        assert_eq!(flatten_topic("", "uptime", &[]), "uptime");
    }

    #[test]
    fn test_topic_collapses_separator_runs() {
        let topic = flatten_topic("", "a//b", &[("x_".to_string(), "_y".to_string())]);
        assert_eq!(topic, "a_b_x_y");
    }

    #[test]
    fn test_topic_is_deterministic() {
        let labels = vec![
            ("room".to_string(), "kitchen".to_string()),
            ("floor".to_string(), "1".to_string()),
        ];
        let a = flatten_topic("home/", "temp", &labels);
        let b = flatten_topic("home/", "temp", &labels);
        assert_eq!(a, b);
        assert_eq!(a, "home/temp_room_kitchen_floor_1");
    }

    #[test]
    fn test_flattened_part_never_contains_path_separator() {
        let topic = flatten_topic("", "a/b/c", &[("p/q".to_string(), "r/s".to_string())]);
        assert!(!topic.contains('/'));
    }
}
