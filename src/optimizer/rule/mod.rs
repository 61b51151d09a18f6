mod sort_limit_as_topn;

pub use sort_limit_as_topn::SortLimitAsTopN;

use crate::optimizer::PlanNode;

pub trait OptimizerRule {
    fn name(&self) -> &str;

    /// Rewrite the node, or `None` when the rule does not apply.
    fn try_optimize(&self, plan: &PlanNode) -> Option<PlanNode>;
}
