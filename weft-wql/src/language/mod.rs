pub(crate) mod builder;
pub(crate) mod parser;
mod render;

use parser::ParseError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Join semantics between streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    /// Inner join: a correlation requires events from every stream.
    And,
    /// Left outer join: left events correlate even without a match.
    Or,
    /// Anti join: left events correlate only when no match exists.
    Unless,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::And => "and",
            JoinType::Or => "or",
            JoinType::Unless => "unless",
        }
    }
}

/// One stream selection: `source({selector})[5m]` with an optional `as alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    /// Adapter name as registered with the engine.
    pub source: String,
    /// Opaque selector, forwarded verbatim to the adapter.
    pub selector: String,
    /// Stream time range (the `[5m]` part).
    pub time_range: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl StreamQuery {
    /// The name this stream is known by in correlations: the alias if given,
    /// the source name otherwise.
    pub fn label(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.source)
    }
}

/// `left=right` inside `on(...)`: the left stream joins on label `left`, the
/// other side joins on label `right`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapping {
    pub left: String,
    pub right: String,
}

/// Post-filter matcher operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOp {
    Eq,
    Ne,
    Re,
    NotRe,
}

impl MatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Eq => "=",
            MatchOp::Ne => "!=",
            MatchOp::Re => "=~",
            MatchOp::NotRe => "!~",
        }
    }
}

/// A single `label <op> "value"` post-filter term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matcher {
    pub label: String,
    pub op: MatchOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupSide {
    Left,
    Right,
}

/// Cardinality control: `group_left` pairs each left event with all matching
/// right events (many-to-one), `group_right` is the mirror image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub side: GroupSide,
    pub labels: Vec<String>,
}

/// A parsed and semantically validated correlation query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub left: StreamQuery,
    pub right: StreamQuery,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<StreamQuery>,
    pub join_type: JoinType,
    /// Ordered join keys; may be empty only when `ignoring` is non-empty.
    pub join_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignoring: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<LabelMapping>,
    /// Maximum span between the earliest and latest event of a correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Grouping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Matcher>,
    /// The correlation window, inherited from the left stream's time range.
    pub time_window: Duration,
}

impl Query {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        parser::query_from_str(input)
    }

    /// All streams in query order: left, right, then the additional ones.
    pub fn streams(&self) -> impl Iterator<Item = &StreamQuery> {
        std::iter::once(&self.left)
            .chain(std::iter::once(&self.right))
            .chain(self.additional.iter())
    }

    pub fn total_streams(&self) -> usize {
        2 + self.additional.len()
    }

    /// The primary join-key name recorded on emitted correlations.
    pub fn primary_join_key(&self) -> &str {
        self.join_keys.first().map(|k| k.as_str()).unwrap_or("composite")
    }

    /// Make every stream label unique. Selecting the same source twice
    /// without aliases is legal and gets implicit `source_2`, `source_3`, …
    /// aliases; explicitly duplicated aliases are an error.
    pub(crate) fn assign_implicit_aliases(&mut self) -> Result<(), ParseError> {
        let mut seen = std::collections::BTreeSet::new();
        let mut streams: Vec<&mut StreamQuery> = Vec::with_capacity(2 + self.additional.len());
        streams.push(&mut self.left);
        streams.push(&mut self.right);
        streams.extend(self.additional.iter_mut());
        for stream in streams {
            let label = stream.label().to_owned();
            if seen.insert(label.clone()) {
                continue;
            }
            if stream.alias.is_some() {
                return Err(ParseError::semantic(format!(
                    "duplicate stream alias `{}`",
                    label
                )));
            }
            let mut n = 2;
            let mut candidate = format!("{}_{}", stream.source, n);
            while seen.contains(&candidate) {
                n += 1;
                candidate = format!("{}_{}", stream.source, n);
            }
            seen.insert(candidate.clone());
            stream.alias = Some(candidate);
        }
        Ok(())
    }

    /// Semantic validation shared by the parser and the builder.
    pub(crate) fn check(&self) -> Result<(), ParseError> {
        if self.join_keys.is_empty() && self.ignoring.is_empty() {
            return Err(ParseError::semantic(
                "a join must specify join keys in on(...) or an ignoring(...) modifier",
            ));
        }
        for m in &self.mappings {
            if !self.join_keys.iter().any(|k| k == &m.left) {
                return Err(ParseError::semantic(format!(
                    "label mapping `{}={}` does not correspond to any join key",
                    m.left, m.right
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_label_falls_back_to_source() {
        let s = StreamQuery {
            source: "loki".into(),
            selector: "{}".into(),
            time_range: Duration::from_secs(300),
            alias: None,
        };
        assert_eq!(s.label(), "loki");
        let aliased = StreamQuery {
            alias: Some("left".into()),
            ..s
        };
        assert_eq!(aliased.label(), "left");
    }
}
