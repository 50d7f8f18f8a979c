//! Threshold-program parsing: one filter/rank statement per line, each
//! built around a single metric-collector call rewritten to the literal
//! token `RESULT`.

use crate::error::{Result, SchedulerError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// A metric-collector query: a function name plus positional literal args,
/// sent to C7 as `[name, arg1, arg2, ...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub name: String,
    pub args: Vec<String>,
}

impl Query {
    pub fn to_argv(&self) -> Value {
        let mut items = vec![Value::String(self.name.clone())];
        items.extend(self.args.iter().map(|a| literal_to_value(a)));
        Value::Array(items)
    }
}

fn literal_to_value(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    let unquoted = raw.trim_matches(|c| c == '\'' || c == '"');
    Value::String(unquoted.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Filter,
    Rank,
}

/// One parsed line of a threshold program.
#[derive(Debug, Clone)]
pub struct ThresholdLine {
    pub raw: String,
    /// The line with the call-site replaced by the literal token `RESULT`,
    /// the rest of the right-hand side kept verbatim (per the design's
    /// resolution of the original's token-dropping bug).
    pub rewritten: String,
    pub query: Query,
    pub kind: LineKind,
}

impl ThresholdLine {
    /// Evaluate this line against `metrics[index]`, binding `RESULT` to it.
    pub fn evaluate(&self, index: usize, metrics: &[Value]) -> Result<Value> {
        let result = metrics
            .get(index)
            .cloned()
            .ok_or_else(|| SchedulerError::EvalError("missing metric result".into()))?;
        let mut vars = HashMap::new();
        vars.insert("RESULT".to_string(), result);
        crate::expr::eval(&self.rewritten, &vars)
    }
}

/// A parsed multi-line threshold program: blank lines and `#`-prefixed
/// comments are ignored; in-line comments are not supported.
#[derive(Debug, Clone, Default)]
pub struct ThresholdProgram {
    pub lines: Vec<ThresholdLine>,
}

static CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\(([^()]*)\)").expect("static regex is valid")
});

impl ThresholdProgram {
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        for raw_line in text.lines() {
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            lines.push(Self::parse_line(trimmed)?);
        }
        Ok(Self { lines })
    }

    fn parse_line(line: &str) -> Result<ThresholdLine> {
        let caps = CALL_RE.captures(line).ok_or_else(|| {
            SchedulerError::ConfigError(format!("threshold line has no metric call: {line}"))
        })?;
        let full_match = caps.get(0).expect("capture 0 always present");
        let name = caps[1].to_string();
        let args_raw = caps[2].trim();
        let args = if args_raw.is_empty() {
            Vec::new()
        } else {
            args_raw.split(',').map(|a| a.trim().to_string()).collect()
        };
        let mut rewritten = String::with_capacity(line.len());
        rewritten.push_str(&line[..full_match.start()]);
        rewritten.push_str("RESULT");
        rewritten.push_str(&line[full_match.end()..]);

        let kind = if crate::expr::root_is_comparison(&rewritten)? {
            LineKind::Filter
        } else {
            LineKind::Rank
        };

        Ok(ThresholdLine { raw: line.to_string(), rewritten, query: Query { name, args }, kind })
    }

    /// Deduplicated union of every query referenced across all lines, in
    /// first-seen order — the order the per-host fetch array is built in.
    pub fn queries(&self) -> Vec<Query> {
        let mut out: Vec<Query> = Vec::new();
        for line in &self.lines {
            if !out.contains(&line.query) {
                out.push(line.query.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filter_and_rank_lines() {
        let program = ThresholdProgram::parse("cpu_percent() < 70\ngetloadavg()[0]").unwrap();
        assert_eq!(program.lines.len(), 2);
        assert_eq!(program.lines[0].kind, LineKind::Filter);
        assert_eq!(program.lines[0].rewritten, "RESULT < 70");
        assert_eq!(program.lines[1].kind, LineKind::Rank);
        assert_eq!(program.lines[1].rewritten, "RESULT[0]");
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let program = ThresholdProgram::parse("# comment\n\ncpu_percent() < 50\n").unwrap();
        assert_eq!(program.lines.len(), 1);
    }

    #[test]
    fn dedupes_repeated_queries() {
        let program = ThresholdProgram::parse("cpu_percent() < 50\ncpu_percent() < 90").unwrap();
        assert_eq!(program.queries().len(), 1);
    }

    #[test]
    fn positional_args_parsed_as_literals() {
        let program = ThresholdProgram::parse("metric(1, 'x') > 0").unwrap();
        assert_eq!(program.lines[0].query.args, vec!["1".to_string(), "'x'".to_string()]);
    }
}
