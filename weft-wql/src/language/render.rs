//! Canonical text rendering. `Query::parse(q.to_string())` yields a plan
//! equal to `q`, which is what the round-trip tests below pin down.

use super::{GroupSide, Grouping, JoinType, MatchOp, Matcher, Query, StreamQuery};
use std::fmt::{self, Display, Formatter};
use weft_types::format_duration;

impl Display for JoinType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for MatchOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Display for Matcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}\"{}\"", self.label, self.op, escape(&self.value))
    }
}

impl Display for StreamQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})[{}]", self.source, self.selector, format_duration(self.time_range))?;
        if let Some(alias) = &self.alias {
            write!(f, " as {}", alias)?;
        }
        Ok(())
    }
}

impl Display for Grouping {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            GroupSide::Left => "group_left",
            GroupSide::Right => "group_right",
        };
        f.write_str(side)?;
        if !self.labels.is_empty() {
            write!(f, "({})", self.labels.join(", "))?;
        }
        Ok(())
    }
}

impl Query {
    fn fmt_join_keys(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for key in &self.join_keys {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            match self.mappings.iter().find(|m| &m.left == key) {
                Some(m) => write!(f, "{}={}", key, m.right)?,
                None => f.write_str(key)?,
            }
        }
        Ok(())
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.left)?;
        for (i, stream) in std::iter::once(&self.right).chain(self.additional.iter()).enumerate() {
            write!(f, " {} on(", self.join_type)?;
            self.fmt_join_keys(f)?;
            f.write_str(")")?;
            // modifiers render once, on the first join clause
            if i == 0 {
                if let Some(temporal) = self.temporal {
                    write!(f, " within({})", format_duration(temporal))?;
                }
                if !self.ignoring.is_empty() {
                    write!(f, " ignoring({})", self.ignoring.join(", "))?;
                }
                if let Some(grouping) = &self.grouping {
                    write!(f, " {}", grouping)?;
                }
            }
            write!(f, " {}", stream)?;
        }
        if !self.filter.is_empty() {
            let matchers: Vec<String> = self.filter.iter().map(|m| m.to_string()).collect();
            write!(f, " {{{}}}", matchers.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn round_trip(input: &str) {
        let q = Query::parse(input).unwrap();
        let rendered = q.to_string();
        let again = Query::parse(&rendered).unwrap_or_else(|e| panic!("rendered `{}` fails to parse: {}", rendered, e));
        assert_eq!(q, again, "round trip changed the plan for `{}`", input);
    }

    #[test]
    fn renders_canonical_text() {
        let q = Query::parse(r#"loki({service="a"})[5m] and on(request_id) loki({service="b"})[5m] as db"#).unwrap();
        assert_eq!(
            q.to_string(),
            r#"loki({service="a"})[5m] and on(request_id) loki({service="b"})[5m] as db"#
        );
    }

    #[test]
    fn round_trips() {
        for input in [
            r#"loki(a)[5m] and on(k) loki(b)[5m] as other"#,
            r#"loki({service="a"})[30s] or on(request_id, session_id) loki({service="b"})[1h] as db"#,
            r#"loki(a)[5m] and on(request_id=trace_id) graylog(b)[5m]"#,
            r#"loki(a)[5m] unless on() ignoring(timestamp, pod) loki(b)[5m] as other"#,
            r#"loki(a)[5m] and on(k) within(30s) group_left(instance, job) loki(b)[5m] as other"#,
            r#"loki(a)[5m] and on(k) group_right loki(b)[5m] as other"#,
            r#"loki(a)[5m] and on(k) loki(b)[5m] as two and on(k) graylog(c)[1d]"#,
            r#"loki(a)[5m] and on(k) loki(b)[5m] as other {status=~"5..", level!="debug"}"#,
            r#"loki(a)[5m] and on(k) loki(b)[5m] as other {msg=~"say \"hi\" \\ \d+"}"#,
        ] {
            round_trip(input);
        }
    }

    #[test]
    fn implicit_aliases_render_explicitly() {
        let q = Query::parse("loki(a)[5m] and on(k) loki(b)[5m]").unwrap();
        assert_eq!(q.to_string(), "loki(a)[5m] and on(k) loki(b)[5m] as loki_2");
        round_trip(&q.to_string());
    }

    #[test]
    fn normalized_whitespace_round_trips() {
        let q = Query::parse("loki(a)[5m]\n  and on(k)\n  loki(b)[5m] as other").unwrap();
        round_trip(&q.to_string());
        assert_eq!(q.to_string(), "loki(a)[5m] and on(k) loki(b)[5m] as other");
    }
}
