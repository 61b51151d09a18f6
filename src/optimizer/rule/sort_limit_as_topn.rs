use crate::optimizer::rule::OptimizerRule;
use crate::optimizer::PlanNode;

/// Replace a `Limit` directly above a `Sort` with a single `TopN` node that
/// keeps the sort keys and the limit, so execution can hold a bounded heap
/// instead of sorting everything.
pub struct SortLimitAsTopN;

impl OptimizerRule for SortLimitAsTopN {
    fn name(&self) -> &str {
        "SortLimitAsTopN"
    }

    fn try_optimize(&self, plan: &PlanNode) -> Option<PlanNode> {
        let PlanNode::Limit { input, limit } = plan else {
            return None;
        };
        let PlanNode::Sort { input, order_bys } = input.as_ref() else {
            return None;
        };
        Some(PlanNode::TopN {
            input: input.clone(),
            order_bys: order_bys.clone(),
            limit: *limit,
        })
    }
}
