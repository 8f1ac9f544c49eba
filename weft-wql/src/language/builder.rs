use super::{parser::ParseError, GroupSide, Grouping, JoinType, LabelMapping, MatchOp, Matcher, Query, StreamQuery};
use std::time::Duration;

/// Programmatic construction of [`Query`] plans, with the same semantic
/// validation as the parser. The result renders to the textual surface via
/// `Display`, so both entry points stay interchangeable.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    streams: Vec<StreamQuery>,
    join_type: Option<JoinType>,
    join_keys: Vec<String>,
    ignoring: Vec<String>,
    mappings: Vec<LabelMapping>,
    temporal: Option<Duration>,
    grouping: Option<Grouping>,
    filter: Vec<Matcher>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(self, source: impl Into<String>, selector: impl Into<String>, time_range: Duration) -> Self {
        self.push_stream(source, selector, time_range, None)
    }

    pub fn stream_as(
        self,
        source: impl Into<String>,
        selector: impl Into<String>,
        time_range: Duration,
        alias: impl Into<String>,
    ) -> Self {
        self.push_stream(source, selector, time_range, Some(alias.into()))
    }

    fn push_stream(
        mut self,
        source: impl Into<String>,
        selector: impl Into<String>,
        time_range: Duration,
        alias: Option<String>,
    ) -> Self {
        self.streams.push(StreamQuery {
            source: source.into(),
            selector: selector.into(),
            time_range,
            alias,
        });
        self
    }

    pub fn join(mut self, join_type: JoinType) -> Self {
        self.join_type = Some(join_type);
        self
    }

    pub fn on(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.join_keys.contains(&key) {
            self.join_keys.push(key);
        }
        self
    }

    /// Join on a key that is named differently on the two sides:
    /// the left stream uses `left`, all other streams use `right`.
    pub fn on_mapped(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        let left = left.into();
        self.mappings.push(LabelMapping {
            left: left.clone(),
            right: right.into(),
        });
        if !self.join_keys.contains(&left) {
            self.join_keys.push(left);
        }
        self
    }

    pub fn ignoring(mut self, label: impl Into<String>) -> Self {
        self.ignoring.push(label.into());
        self
    }

    pub fn within(mut self, temporal: Duration) -> Self {
        self.temporal = Some(temporal);
        self
    }

    pub fn group_left<I: IntoIterator<Item = S>, S: Into<String>>(mut self, labels: I) -> Self {
        self.grouping = Some(Grouping {
            side: GroupSide::Left,
            labels: labels.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn group_right<I: IntoIterator<Item = S>, S: Into<String>>(mut self, labels: I) -> Self {
        self.grouping = Some(Grouping {
            side: GroupSide::Right,
            labels: labels.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn matcher(mut self, label: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        self.filter.push(Matcher {
            label: label.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn build(mut self) -> Result<Query, ParseError> {
        if self.streams.len() < 2 {
            return Err(ParseError::semantic("a query needs at least two streams"));
        }
        let left = self.streams.remove(0);
        let right = self.streams.remove(0);
        let time_window = left.time_range;
        let mut query = Query {
            left,
            right,
            additional: self.streams,
            join_type: self.join_type.unwrap_or(JoinType::And),
            join_keys: self.join_keys,
            ignoring: self.ignoring,
            mappings: self.mappings,
            temporal: self.temporal,
            grouping: self.grouping,
            filter: self.filter,
            time_window,
        };
        query.assign_implicit_aliases()?;
        query.check()?;
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_same_plan_as_the_parser() {
        let built = QueryBuilder::new()
            .stream("loki", r#"{service="a"}"#, Duration::from_secs(300))
            .stream_as("loki", r#"{service="b"}"#, Duration::from_secs(300), "db")
            .join(JoinType::And)
            .on("request_id")
            .within(Duration::from_secs(30))
            .matcher("status", MatchOp::Re, "5..")
            .build()
            .unwrap();
        let parsed = Query::parse(
            r#"loki({service="a"})[5m] and on(request_id) within(30s) loki({service="b"})[5m] as db {status=~"5.."}"#,
        )
        .unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn builder_output_renders_and_reparses() {
        let built = QueryBuilder::new()
            .stream("loki", "a", Duration::from_secs(60))
            .stream_as("graylog", "b", Duration::from_secs(60), "gl")
            .join(JoinType::Unless)
            .on_mapped("request_id", "trace_id")
            .build()
            .unwrap();
        let reparsed = Query::parse(&built.to_string()).unwrap();
        assert_eq!(built, reparsed);
    }

    #[test]
    fn rejects_underspecified_queries() {
        let err = QueryBuilder::new()
            .stream("loki", "a", Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("two streams"));

        let err = QueryBuilder::new()
            .stream("loki", "a", Duration::from_secs(60))
            .stream_as("loki", "b", Duration::from_secs(60), "other")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("join keys"), "got {}", err);
    }

    #[test]
    fn same_source_twice_is_aliased_implicitly() {
        let q = QueryBuilder::new()
            .stream("loki", "a", Duration::from_secs(60))
            .stream("loki", "b", Duration::from_secs(60))
            .on("k")
            .build()
            .unwrap();
        assert_eq!(q.right.alias.as_deref(), Some("loki_2"));
    }

    #[test]
    fn rejects_explicit_duplicate_aliases() {
        let err = QueryBuilder::new()
            .stream_as("loki", "a", Duration::from_secs(60), "x")
            .stream_as("loki", "b", Duration::from_secs(60), "x")
            .on("k")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate stream alias"));
    }
}
