pub mod rule;

use std::sync::Arc;

use log::debug;

use crate::transaction::TableOid;
use rule::{OptimizerRule, SortLimitAsTopN};

/// Sort key: output column index plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: usize,
    pub desc: bool,
}

/// The slice of the plan language the optimizer rewrites operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    TableScan {
        oid: TableOid,
    },
    Sort {
        input: Arc<PlanNode>,
        order_bys: Vec<OrderBy>,
    },
    Limit {
        input: Arc<PlanNode>,
        limit: usize,
    },
    TopN {
        input: Arc<PlanNode>,
        order_bys: Vec<OrderBy>,
        limit: usize,
    },
}

impl PlanNode {
    fn children(&self) -> Vec<Arc<PlanNode>> {
        match self {
            PlanNode::TableScan { .. } => Vec::new(),
            PlanNode::Sort { input, .. }
            | PlanNode::Limit { input, .. }
            | PlanNode::TopN { input, .. } => vec![input.clone()],
        }
    }

    fn with_children(&self, mut children: Vec<Arc<PlanNode>>) -> PlanNode {
        match self {
            PlanNode::TableScan { oid } => PlanNode::TableScan { oid: *oid },
            PlanNode::Sort { order_bys, .. } => PlanNode::Sort {
                input: children.remove(0),
                order_bys: order_bys.clone(),
            },
            PlanNode::Limit { limit, .. } => PlanNode::Limit {
                input: children.remove(0),
                limit: *limit,
            },
            PlanNode::TopN {
                order_bys, limit, ..
            } => PlanNode::TopN {
                input: children.remove(0),
                order_bys: order_bys.clone(),
                limit: *limit,
            },
        }
    }
}

/// Rule-driven plan rewriter, applying each rule bottom-up.
pub struct Optimizer {
    rules: Vec<Arc<dyn OptimizerRule>>,
}

impl Optimizer {
    pub fn new() -> Self {
        Self {
            rules: vec![Arc::new(SortLimitAsTopN)],
        }
    }

    pub fn with_rules(rules: Vec<Arc<dyn OptimizerRule>>) -> Self {
        Self { rules }
    }

    pub fn optimize(&self, plan: &PlanNode) -> PlanNode {
        let children = plan
            .children()
            .iter()
            .map(|child| Arc::new(self.optimize(child)))
            .collect();
        let mut optimized = plan.with_children(children);
        for rule in &self.rules {
            if let Some(rewritten) = rule.try_optimize(&optimized) {
                debug!("rule {} rewrote a {:?} node", rule.name(), optimized);
                optimized = rewritten;
            }
        }
        optimized
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}
