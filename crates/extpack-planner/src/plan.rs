use std::collections::BTreeSet;
use std::fmt;

use extpack_core::{namespace_label, ExtensionId, LocalExtension, ResolvedExtension};
use serde::Serialize;

pub type NodeIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtensionAction {
    Install,
    Upgrade,
    Uninstall,
    None,
}

impl ExtensionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Uninstall => "uninstall",
            Self::None => "none",
        }
    }

    pub fn changes_state(self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionPlanAction {
    pub extension: ResolvedExtension,
    pub action: ExtensionAction,
    pub namespace: Option<String>,
    /// The installed release an `Upgrade` replaces.
    pub previous: Option<LocalExtension>,
    pub dependency: bool,
    /// Implicit install into a named namespace following a root install.
    pub propagated: bool,
    /// Ids of the plan nodes that reached this one through a dependency edge.
    pub required_by: BTreeSet<String>,
}

impl ExtensionPlanAction {
    pub fn id(&self) -> &ExtensionId {
        self.extension.id()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ExtensionPlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.action.as_str(),
            self.id(),
            namespace_label(self.namespace())
        )?;
        if let Some(previous) = &self.previous {
            write!(f, " (from {})", previous.id().version)?;
        }
        if self.propagated {
            write!(f, " (propagated)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionPlanNode {
    pub action: ExtensionPlanAction,
    pub children: Vec<NodeIndex>,
}

/// A read-only plan: an arena of nodes (shared children appear once), the
/// top-level node per request, and the flattened action list in execution
/// order (dependencies before dependents).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionPlan {
    nodes: Vec<ExtensionPlanNode>,
    roots: Vec<NodeIndex>,
    actions: Vec<ExtensionPlanAction>,
}

impl ExtensionPlan {
    pub(crate) fn new(
        nodes: Vec<ExtensionPlanNode>,
        roots: Vec<NodeIndex>,
        actions: Vec<ExtensionPlanAction>,
    ) -> Self {
        Self {
            nodes,
            roots,
            actions,
        }
    }

    pub fn nodes(&self) -> &[ExtensionPlanNode] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> Option<&ExtensionPlanNode> {
        self.nodes.get(index)
    }

    pub fn roots(&self) -> &[NodeIndex] {
        &self.roots
    }

    pub fn actions(&self) -> &[ExtensionPlanAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions that change installed state, in execution order.
    pub fn effective_actions(&self) -> impl Iterator<Item = &ExtensionPlanAction> {
        self.actions
            .iter()
            .filter(|action| action.action.changes_state())
    }

    /// Indented tree, one node per line, children below their parent.
    pub fn render_tree(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for &root in &self.roots {
            self.render_node(root, 0, &mut lines);
        }
        lines
    }

    fn render_node(&self, index: NodeIndex, depth: usize, lines: &mut Vec<String>) {
        let Some(node) = self.nodes.get(index) else {
            return;
        };
        lines.push(format!("{}{}", "  ".repeat(depth), node.action));
        for &child in &node.children {
            self.render_node(child, depth + 1, lines);
        }
    }
}
