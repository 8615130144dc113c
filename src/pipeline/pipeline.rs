use super::Rule;
use crate::context::MessageProcessingContext;
use crate::Result;

/// Ordered, read-only list of rules.
pub struct Pipeline {
    rules: Box<[Rule]>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule in order against the message in `ctx`.
    ///
    /// Each rule and each processor call runs inside its own metrics scope and
    /// timer. The scopes unwind on every exit path, including early returns.
    pub fn process(&self, ctx: &mut MessageProcessingContext<'_>) -> Result<()> {
        let metrics = ctx.stream().metrics().clone();

        for (rule_index, rule) in self.rules.iter().enumerate() {
            let _rule_scope = metrics.push(format!("rule-{}", rule_index));
            let _rule_timer = metrics.timer("time").time();

            let branch = rule.select(ctx)?;
            let _branch_scope = metrics.push(branch.scope_name());

            for (processor_index, processor) in rule.chain(branch).iter().enumerate() {
                let _processor_scope = metrics.push(format!(
                    "proc-{} ({})",
                    processor_index,
                    processor.type_name()
                ));
                let _processor_timer = metrics.timer("time").time();

                processor.process(ctx)?;
                if !ctx.should_continue() {
                    break;
                }
            }

            if !ctx.should_continue() {
                break;
            }
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    rules: Vec<Rule>,
}

impl PipelineBuilder {
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn add_rule(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            rules: self.rules.into_boxed_slice(),
        }
    }
}
