use super::Rule;
use anyhow::{anyhow, Result};
use pest::iterators::{Pair, Pairs};

pub(crate) type P<'i> = Pair<'i, Rule>;

#[derive(Debug, Clone)]
pub(crate) struct NoVal(pub &'static str);

impl std::fmt::Display for NoVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no value was present for {}", self.0)
    }
}

impl std::error::Error for NoVal {}

pub(crate) trait PairExt<'i> {
    fn inner(self) -> Pairs<'i, Rule>;
    /// The exactly-one inner pair of this pair.
    fn single(self) -> Result<P<'i>>;
}

impl<'i> PairExt<'i> for P<'i> {
    fn inner(self) -> Pairs<'i, Rule> {
        self.into_inner()
    }

    fn single(self) -> Result<P<'i>> {
        let rule = self.as_rule();
        let mut inner = self.into_inner();
        let first = inner
            .next()
            .ok_or_else(|| anyhow!("no inner token in {:?}", rule))?;
        if inner.next().is_some() {
            return Err(anyhow!("more than one inner token in {:?}", rule));
        }
        Ok(first)
    }
}

pub(crate) trait PairsExt<'i> {
    fn expect_next(&mut self, what: &'static str) -> Result<P<'i>>;
}

impl<'i> PairsExt<'i> for Pairs<'i, Rule> {
    fn expect_next(&mut self, what: &'static str) -> Result<P<'i>> {
        self.next().ok_or_else(|| anyhow!(NoVal(what)))
    }
}
