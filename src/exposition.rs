//! Prometheus text exposition format parser.
//!
//! Parses scrape responses into metric families. Labels keep their source
//! order, which downstream topic derivation depends on. Malformed lines are
//! skipped with a debug log; parsing never fails, and an empty input yields
//! zero families.

/// A named group of samples sharing a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub samples: Vec<Sample>,
}

/// One measurement: a name, ordered label pairs, and a numeric value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Sample-name suffixes that belong to the family declared by a
/// `# TYPE`/`# HELP` line (counter/histogram/summary series).
const FAMILY_SUFFIXES: &[&str] = &["_total", "_sum", "_count", "_bucket", "_created"];

/// Parse an exposition-format body into metric families.
pub fn parse(text: &str) -> Vec<MetricFamily> {
    let mut families: Vec<MetricFamily> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let mut parts = comment.split_whitespace();
            if let (Some(keyword), Some(name)) = (parts.next(), parts.next())
                && (keyword == "TYPE" || keyword == "HELP")
                && families.last().map(|f| f.name.as_str()) != Some(name)
            {
                families.push(MetricFamily {
                    name: name.to_string(),
                    samples: Vec::new(),
                });
            }
            continue;
        }

        match parse_sample(line) {
            Some(sample) => attach(&mut families, sample),
            None => tracing::debug!(line, "skipping malformed exposition line"),
        }
    }

    families
}

/// Attach a sample to the family it belongs to, starting a new family named
/// after the sample when it matches no declared family.
fn attach(families: &mut Vec<MetricFamily>, sample: Sample) {
    if let Some(family) = families.last_mut()
        && belongs_to(&family.name, &sample.name)
    {
        family.samples.push(sample);
        return;
    }
    families.push(MetricFamily {
        name: sample.name.clone(),
        samples: vec![sample],
    });
}

fn belongs_to(family: &str, sample_name: &str) -> bool {
    match sample_name.strip_prefix(family) {
        Some("") => true,
        Some(rest) => FAMILY_SUFFIXES.contains(&rest),
        None => false,
    }
}

fn parse_sample(line: &str) -> Option<Sample> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_metric_name(name) {
        return None;
    }

    let mut rest = &line[name_end..];
    let mut labels = Vec::new();
    if rest.starts_with('{') {
        let (parsed, after) = parse_labels(rest)?;
        labels = parsed;
        rest = after;
    }

    let mut fields = rest.split_whitespace();
    let value: f64 = fields.next()?.parse().ok()?;
    // Optional timestamp, ignored.
    let _ = fields.next();
    if fields.next().is_some() {
        return None;
    }

    Some(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

/// Parse a `{label="value",...}` block, returning the labels and the
/// remainder of the line after the closing brace.
fn parse_labels(s: &str) -> Option<(Vec<(String, String)>, &str)> {
    let mut labels = Vec::new();
    let mut rest = &s[1..];

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Some((labels, after));
        }

        let eq = rest.find('=')?;
        let name = rest[..eq].trim();
        if name.is_empty() {
            return None;
        }

        let quoted = rest[eq + 1..].trim_start().strip_prefix('"')?;
        let mut value = String::new();
        let mut end = None;
        let mut chars = quoted.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return None,
                },
                '"' => {
                    end = Some(i);
                    break;
                }
                _ => value.push(c),
            }
        }
        let end = end?;
        labels.push((name.to_string(), value));

        rest = quoted[end + 1..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        }
    }
}

/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
