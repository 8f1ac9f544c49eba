#![allow(clippy::upper_case_acronyms)]

use super::{GroupSide, Grouping, JoinType, LabelMapping, MatchOp, Matcher, Query, StreamQuery};
use anyhow::{bail, Result};
use pest::{error::ErrorVariant, error::LineColLocation, Parser};
use std::fmt;
use weft_types::parse_duration;

mod utils;
use utils::*;

#[derive(pest_derive::Parser)]
#[grammar = "language/wql.pest"]
struct Wql;

/// A query that failed to parse or validate.
///
/// Syntax failures carry the cursor position and the set of tokens the
/// grammar would have accepted there; semantic failures carry a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Syntax {
        line: usize,
        col: usize,
        expected: Vec<String>,
    },
    Semantic {
        message: String,
    },
}

impl ParseError {
    pub(crate) fn semantic(message: impl Into<String>) -> Self {
        ParseError::Semantic {
            message: message.into(),
        }
    }

    /// Best-effort continuations for the input, derived from the grammar
    /// state at the cursor. Empty for semantic errors.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            ParseError::Syntax { expected, .. } => expected.clone(),
            ParseError::Semantic { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Syntax { line, col, expected } => write!(
                f,
                "parse error at line {}, column {}: expected {}",
                line,
                col,
                expected.join(" | ")
            ),
            ParseError::Semantic { message } => write!(f, "invalid query: {}", message),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        let (line, col) = match e.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        let expected = match &e.variant {
            ErrorVariant::ParsingError { positives, .. } => {
                let mut tokens: Vec<String> = positives.iter().map(|r| token_name(*r).to_owned()).collect();
                tokens.sort();
                tokens.dedup();
                tokens
            }
            ErrorVariant::CustomError { message } => vec![message.clone()],
        };
        ParseError::Syntax { line, col, expected }
    }
}

fn token_name(rule: Rule) -> &'static str {
    match rule {
        Rule::ident | Rule::ident_char => "identifier",
        Rule::duration | Rule::duration_unit => "duration",
        Rule::selector => "selector",
        Rule::stream | Rule::query | Rule::main_query => "stream",
        Rule::stream_alias | Rule::kw_as => "as",
        Rule::join | Rule::join_type => "join",
        Rule::kw_and => "and",
        Rule::kw_or => "or",
        Rule::kw_unless => "unless",
        Rule::kw_on => "on",
        Rule::kw_within | Rule::within_mod => "within",
        Rule::kw_ignoring | Rule::ignoring_mod => "ignoring",
        Rule::kw_group_left => "group_left",
        Rule::kw_group_right => "group_right",
        Rule::group_side | Rule::group_mod | Rule::modifier => "modifier",
        Rule::join_keys | Rule::key_item => "join key",
        Rule::id_list => "label list",
        Rule::filter => "filter",
        Rule::matcher => "matcher",
        Rule::match_op => "matcher operator",
        Rule::string | Rule::string_inner | Rule::escape => "string",
        Rule::EOI => "end of input",
        Rule::WHITESPACE => "whitespace",
    }
}

/// Result of [`validate`]: the parse verdict plus autocomplete material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub ok: bool,
    pub error: Option<ParseError>,
    pub suggestions: Vec<String>,
}

/// Check a query without constructing a plan; never fails.
pub fn validate(input: &str) -> Validation {
    match Query::parse(input) {
        Ok(_) => Validation {
            ok: true,
            error: None,
            suggestions: Vec::new(),
        },
        Err(e) => {
            let suggestions = e.suggestions();
            Validation {
                ok: false,
                error: Some(e),
                suggestions,
            }
        }
    }
}

fn r_duration(p: P) -> Result<std::time::Duration> {
    Ok(parse_duration(p.as_str())?)
}

fn r_stream(p: P) -> Result<StreamQuery> {
    let mut source = None;
    let mut selector = None;
    let mut time_range = None;
    let mut alias = None;
    for part in p.inner() {
        match part.as_rule() {
            Rule::ident => source = Some(part.as_str().to_owned()),
            Rule::selector => selector = Some(part.as_str().to_owned()),
            Rule::duration => time_range = Some(r_duration(part)?),
            Rule::stream_alias => {
                alias = part
                    .inner()
                    .find(|x| x.as_rule() == Rule::ident)
                    .map(|x| x.as_str().to_owned())
            }
            x => bail!("unexpected token: {:?}", x),
        }
    }
    Ok(StreamQuery {
        source: source.ok_or(NoVal("source"))?,
        selector: selector.ok_or(NoVal("selector"))?,
        time_range: time_range.ok_or(NoVal("time range"))?,
        alias,
    })
}

// everything a join clause can contribute to the plan
#[derive(Default)]
struct JoinClause {
    join_type: Option<JoinType>,
    keys: Vec<String>,
    mappings: Vec<LabelMapping>,
    ignoring: Vec<String>,
    temporal: Option<std::time::Duration>,
    grouping: Option<Grouping>,
}

fn r_join(p: P) -> Result<JoinClause> {
    let mut clause = JoinClause::default();
    for part in p.inner() {
        match part.as_rule() {
            Rule::kw_on => {}
            Rule::join_type => {
                clause.join_type = Some(match part.single()?.as_rule() {
                    Rule::kw_and => JoinType::And,
                    Rule::kw_or => JoinType::Or,
                    Rule::kw_unless => JoinType::Unless,
                    x => bail!("unexpected token: {:?}", x),
                })
            }
            Rule::join_keys => {
                for item in part.inner() {
                    let mut item = item.inner();
                    let left = item.expect_next("join key")?.as_str().to_owned();
                    if let Some(right) = item.next() {
                        clause.mappings.push(LabelMapping {
                            left: left.clone(),
                            right: right.as_str().to_owned(),
                        });
                    }
                    clause.keys.push(left);
                }
            }
            Rule::modifier => r_modifier(part.single()?, &mut clause)?,
            x => bail!("unexpected token: {:?}", x),
        }
    }
    Ok(clause)
}

fn r_modifier(p: P, clause: &mut JoinClause) -> Result<()> {
    match p.as_rule() {
        Rule::within_mod => {
            let d = p
                .inner()
                .find(|x| x.as_rule() == Rule::duration)
                .ok_or(NoVal("within duration"))?;
            clause.temporal = Some(r_duration(d)?);
        }
        Rule::ignoring_mod => {
            let list = p
                .inner()
                .find(|x| x.as_rule() == Rule::id_list)
                .ok_or(NoVal("ignoring labels"))?;
            for label in list.inner() {
                clause.ignoring.push(label.as_str().to_owned());
            }
        }
        Rule::group_mod => {
            let mut side = None;
            let mut labels = Vec::new();
            for part in p.inner() {
                match part.as_rule() {
                    Rule::group_side => {
                        side = Some(match part.single()?.as_rule() {
                            Rule::kw_group_left => GroupSide::Left,
                            Rule::kw_group_right => GroupSide::Right,
                            x => bail!("unexpected token: {:?}", x),
                        })
                    }
                    Rule::id_list => labels = part.inner().map(|l| l.as_str().to_owned()).collect(),
                    x => bail!("unexpected token: {:?}", x),
                }
            }
            clause.grouping = Some(Grouping {
                side: side.ok_or(NoVal("group side"))?,
                labels,
            });
        }
        x => bail!("unexpected token: {:?}", x),
    }
    Ok(())
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                // unknown escapes pass through untouched so regex classes
                // like \d survive a single level of quoting
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn r_filter(p: P) -> Result<Vec<Matcher>> {
    let mut matchers = Vec::new();
    for m in p.inner() {
        let mut m = m.inner();
        let label = m.expect_next("label")?.as_str().to_owned();
        let op = match m.expect_next("operator")?.as_str() {
            "=" => MatchOp::Eq,
            "!=" => MatchOp::Ne,
            "=~" => MatchOp::Re,
            "!~" => MatchOp::NotRe,
            x => bail!("unexpected operator: {:?}", x),
        };
        let value = unescape(m.expect_next("value")?.single()?.as_str());
        matchers.push(Matcher { label, op, value });
    }
    Ok(matchers)
}

fn r_query(p: P) -> Result<Query, ParseError> {
    let inner = || -> Result<Query> {
        let mut streams = Vec::new();
        let mut clauses = Vec::new();
        let mut filter = Vec::new();
        for part in p.inner() {
            match part.as_rule() {
                Rule::stream => streams.push(r_stream(part)?),
                Rule::join => clauses.push(r_join(part)?),
                Rule::filter => filter = r_filter(part)?,
                x => bail!("unexpected token: {:?}", x),
            }
        }
        assemble(streams, clauses, filter)
    };
    inner().map_err(|e| match e.downcast::<ParseError>() {
        Ok(p) => p,
        Err(e) => ParseError::semantic(e.to_string()),
    })
}

/// Merge the join clauses into one plan. All clauses must agree on the join
/// type; keys, mappings and ignored labels are unioned in query order, and a
/// later `within`/`group_*` modifier overrides an earlier one.
fn assemble(mut streams: Vec<StreamQuery>, clauses: Vec<JoinClause>, filter: Vec<Matcher>) -> Result<Query> {
    if streams.len() < 2 || clauses.is_empty() {
        bail!("a query needs at least two streams and one join");
    }
    let mut join_type = None;
    let mut join_keys: Vec<String> = Vec::new();
    let mut mappings: Vec<LabelMapping> = Vec::new();
    let mut ignoring: Vec<String> = Vec::new();
    let mut temporal = None;
    let mut grouping = None;
    for clause in clauses {
        match (join_type, clause.join_type) {
            (None, t) => join_type = t,
            (Some(a), Some(b)) if a != b => bail!(ParseError::semantic(format!(
                "mixed join types `{}` and `{}` in one query are not supported",
                a.as_str(),
                b.as_str()
            ))),
            _ => {}
        }
        for key in clause.keys {
            if !join_keys.contains(&key) {
                join_keys.push(key);
            }
        }
        for mapping in clause.mappings {
            if !mappings.contains(&mapping) {
                mappings.push(mapping);
            }
        }
        for label in clause.ignoring {
            if !ignoring.contains(&label) {
                ignoring.push(label);
            }
        }
        temporal = clause.temporal.or(temporal);
        grouping = clause.grouping.or(grouping);
    }
    let join_type = join_type.ok_or(NoVal("join type"))?;
    let left = streams.remove(0);
    let right = streams.remove(0);
    let time_window = left.time_range;
    let mut query = Query {
        left,
        right,
        additional: streams,
        join_type,
        join_keys,
        ignoring,
        mappings,
        temporal,
        grouping,
        filter,
        time_window,
    };
    query.assign_implicit_aliases().map_err(anyhow::Error::from)?;
    query.check().map_err(anyhow::Error::from)?;
    Ok(query)
}

pub(crate) fn query_from_str(input: &str) -> Result<Query, ParseError> {
    let mut pairs = Wql::parse(Rule::main_query, input)?;
    let main = pairs.next().expect("grammar yields exactly one main_query");
    let query = main
        .into_inner()
        .next()
        .expect("main_query wraps exactly one query");
    r_query(query)
}
