mod plan;
mod planner;

pub use plan::{ExtensionAction, ExtensionPlan, ExtensionPlanAction, ExtensionPlanNode, NodeIndex};
pub use planner::{ExtensionPlanner, PlanOptions};
