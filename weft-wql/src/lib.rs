//! The weft correlation query language (WQL).
//!
//! A query names at least two event streams, how to join them, and an optional
//! post-filter:
//!
//! ```text
//! loki({service="api"})[5m]
//!   and on(request_id) within(30s)
//! loki({service="db"})[5m]
//!   {status=~"5.."}
//! ```
//!
//! [`Query::parse`] turns the text into a validated plan, [`Query`] renders
//! back to canonical text (`Display`), and [`QueryBuilder`] constructs plans
//! programmatically with the same validation.

mod language;

pub use language::{
    builder::QueryBuilder,
    parser::{validate, ParseError, Validation},
    GroupSide, Grouping, JoinType, LabelMapping, MatchOp, Matcher, Query, StreamQuery,
};
