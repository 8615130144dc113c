use super::{Filter, Processor};
use crate::context::MessageProcessingContext;
use crate::{error::StreamError, Result};

/// Which processor chain of a rule was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Then,
    Else,
}

impl Branch {
    /// Metrics scope segment for the branch.
    pub fn scope_name(&self) -> &'static str {
        match self {
            Branch::Then => "filterPass",
            Branch::Else => "filterFail",
        }
    }
}

/// Frozen filter plus then/else processor chains.
///
/// A rule without a filter always takes the then-chain, and its else-chain is
/// always empty.
pub struct Rule {
    filter: Option<Box<dyn Filter>>,
    then_chain: Box<[Box<dyn Processor>]>,
    else_chain: Box<[Box<dyn Processor>]>,
}

impl Rule {
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    pub fn filter(&self) -> Option<&dyn Filter> {
        self.filter.as_deref()
    }

    pub fn then_chain(&self) -> &[Box<dyn Processor>] {
        &self.then_chain
    }

    pub fn else_chain(&self) -> &[Box<dyn Processor>] {
        &self.else_chain
    }

    pub fn chain(&self, branch: Branch) -> &[Box<dyn Processor>] {
        match branch {
            Branch::Then => &self.then_chain,
            Branch::Else => &self.else_chain,
        }
    }

    pub fn select(&self, ctx: &MessageProcessingContext<'_>) -> Result<Branch> {
        let passes = match &self.filter {
            None => true,
            Some(filter) => filter.passes(ctx)?,
        };
        Ok(if passes { Branch::Then } else { Branch::Else })
    }
}

/// Accumulates processors into whichever chain was selected last (the
/// then-chain initially).
pub struct RuleBuilder {
    filter: Option<Box<dyn Filter>>,
    then_chain: Vec<Box<dyn Processor>>,
    else_chain: Vec<Box<dyn Processor>>,
    target: Branch,
}

impl Default for RuleBuilder {
    fn default() -> Self {
        Self {
            filter: None,
            then_chain: Vec::new(),
            else_chain: Vec::new(),
            target: Branch::Then,
        }
    }
}

impl RuleBuilder {
    pub fn filter(self, filter: impl Filter + 'static) -> Self {
        self.filter_boxed(Box::new(filter))
    }

    pub fn filter_boxed(mut self, filter: Box<dyn Filter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Subsequent processors go to the then-chain.
    pub fn then(mut self) -> Self {
        self.target = Branch::Then;
        self
    }

    /// Subsequent processors go to the else-chain.
    pub fn otherwise(mut self) -> Self {
        self.target = Branch::Else;
        self
    }

    pub fn add(self, processor: impl Processor + 'static) -> Self {
        self.add_boxed(Box::new(processor))
    }

    pub fn add_boxed(mut self, processor: Box<dyn Processor>) -> Self {
        match self.target {
            Branch::Then => self.then_chain.push(processor),
            Branch::Else => self.else_chain.push(processor),
        }
        self
    }

    pub fn build(self) -> Result<Rule> {
        if self.filter.is_none() && !self.else_chain.is_empty() {
            return Err(StreamError::InvalidConfig(
                "a rule without a filter cannot have an else chain".to_string(),
            ));
        }

        Ok(Rule {
            filter: self.filter,
            then_chain: self.then_chain.into_boxed_slice(),
            else_chain: self.else_chain.into_boxed_slice(),
        })
    }
}
