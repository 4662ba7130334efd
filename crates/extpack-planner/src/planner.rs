use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use extpack_core::{
    namespace_label, validate_namespace, Extension, ExtensionDependency, ExtensionError,
    ExtensionId, ExtensionResult, LocalExtension, ResolvedExtension,
};
use extpack_repository::{CoreRepository, RepositoryChain};
use extpack_store::LocalExtensionStore;

use crate::plan::{ExtensionAction, ExtensionPlan, ExtensionPlanAction, ExtensionPlanNode, NodeIndex};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub interactive: bool,
    pub root_modifications_allowed: bool,
    /// Per-repository budget for remote lookups; `None` waits indefinitely.
    pub remote_timeout: Option<Duration>,
}

/// Builds install and uninstall plans without side effects.
pub struct ExtensionPlanner<'a> {
    core: &'a CoreRepository,
    store: &'a LocalExtensionStore,
    chain: &'a RepositoryChain,
    options: PlanOptions,
}

impl<'a> ExtensionPlanner<'a> {
    pub fn new(
        core: &'a CoreRepository,
        store: &'a LocalExtensionStore,
        chain: &'a RepositoryChain,
    ) -> Self {
        Self {
            core,
            store,
            chain,
            options: PlanOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PlanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn plan_install(
        &self,
        ids: &[ExtensionId],
        namespace: Option<&str>,
    ) -> ExtensionResult<ExtensionPlan> {
        if let Some(namespace) = namespace {
            validate_namespace(namespace).map_err(|err| {
                let requested = ids.iter().map(ToString::to_string).collect::<Vec<_>>();
                ExtensionError::install(requested.join(", "), Some(namespace), err.to_string())
            })?;
        }
        tracing::debug!(
            targets = ids.len(),
            namespace = namespace_label(namespace),
            interactive = self.options.interactive,
            "planning install"
        );

        let mut builder = PlanBuilder::new(namespace);
        for id in ids {
            let index = self.visit_requested(&mut builder, id)?;
            builder.roots.push(index);
        }

        Ok(builder.finish(|action| self.propagations(action)))
    }

    pub fn plan_uninstall(
        &self,
        ids: &[ExtensionId],
        namespace: Option<&str>,
    ) -> ExtensionResult<ExtensionPlan> {
        tracing::debug!(
            targets = ids.len(),
            namespace = namespace_label(namespace),
            "planning uninstall"
        );

        let mut builder = PlanBuilder::new(namespace);
        for id in ids {
            if self.core.contains(&id.id) {
                return Err(ExtensionError::uninstall(
                    id.to_string(),
                    namespace,
                    "extension is part of core",
                ));
            }
            let local = self
                .store
                .resolve(id)
                .map_err(|_| ExtensionError::uninstall(id.to_string(), namespace, "not installed"))?;

            let targets: Vec<Option<String>> = match namespace {
                Some(name) if local.is_installed_in(Some(name)) => vec![Some(name.to_string())],
                Some(_) if local.is_installed_at_root() => {
                    return Err(ExtensionError::uninstall(
                        id.to_string(),
                        namespace,
                        "installed at root; uninstall it from the root namespace",
                    ));
                }
                Some(_) => {
                    return Err(ExtensionError::uninstall(
                        id.to_string(),
                        namespace,
                        "not installed",
                    ));
                }
                None if local.is_installed_at_root() => vec![None],
                None => local.namespaces.iter().cloned().collect(),
            };

            for target in targets {
                let index = self.visit_uninstall(&mut builder, &local, target, false)?;
                builder.roots.push(index);
            }
        }

        Ok(builder.finish(|_| Vec::new()))
    }

    fn visit_requested(
        &self,
        builder: &mut PlanBuilder,
        id: &ExtensionId,
    ) -> ExtensionResult<NodeIndex> {
        let namespace = builder.namespace.clone();
        let ns = namespace.as_deref();
        let key = (id.id.clone(), namespace.clone());
        if let Some(&index) = builder.memo.get(&key) {
            let planned = &builder.nodes[index].action;
            if planned.id() != id {
                return Err(ExtensionError::resolve(
                    id.to_string(),
                    format!("{} is already part of this plan", planned.id()),
                ));
            }
            if !planned.action.changes_state() {
                // Reached earlier as a satisfied dependency; refuse it the
                // same way as when it is requested first.
                self.classify_requested(id, ns)?;
                return Err(ExtensionError::install(id.to_string(), ns, "already installed"));
            }
            builder.nodes[index].action.dependency = false;
            return Ok(index);
        }

        let (extension, action, previous) = self.classify_requested(id, ns)?;
        builder.in_progress.push(id.id.clone());
        let children = self.visit_dependencies(builder, &extension)?;
        builder.in_progress.pop();

        Ok(builder.add_node(
            key,
            ExtensionPlanAction {
                extension: ResolvedExtension::Remote(extension),
                action,
                namespace,
                previous,
                dependency: false,
                propagated: false,
                required_by: BTreeSet::new(),
            },
            children,
        ))
    }

    fn classify_requested(
        &self,
        id: &ExtensionId,
        ns: Option<&str>,
    ) -> ExtensionResult<(Extension, ExtensionAction, Option<LocalExtension>)> {
        if let Some(local) = self.installed_in(&id.id, ns) {
            let installed = &local.id().version;
            if installed == &id.version {
                return Err(ExtensionError::install(
                    id.to_string(),
                    ns,
                    "already installed",
                ));
            }
            if installed > &id.version {
                return Err(ExtensionError::install(
                    id.to_string(),
                    ns,
                    format!(
                        "would downgrade from {installed}; uninstall it first to install an older version"
                    ),
                ));
            }
            let extension = self.resolve_remote(id)?;
            return Ok((extension, ExtensionAction::Upgrade, Some(local)));
        }

        if self.core.contains(&id.id) {
            return Err(ExtensionError::install(
                id.to_string(),
                ns,
                "extension is part of core",
            ));
        }

        if ns.is_some() {
            if let Some(local) = self.installed_in(&id.id, None) {
                let reason = if local.id() == id {
                    "already installed at root".to_string()
                } else {
                    format!(
                        "version {} is installed at root; change it there",
                        local.id().version
                    )
                };
                return Err(ExtensionError::install(id.to_string(), ns, reason));
            }
        }

        let extension = self.resolve_remote(id)?;
        Ok((extension, ExtensionAction::Install, None))
    }

    fn visit_dependencies(
        &self,
        builder: &mut PlanBuilder,
        extension: &Extension,
    ) -> ExtensionResult<Vec<NodeIndex>> {
        let mut children = Vec::with_capacity(extension.dependencies.len());
        for dependency in &extension.dependencies {
            if let Some(index) = self.visit_dependency(builder, &extension.id, dependency)? {
                builder.nodes[index]
                    .action
                    .required_by
                    .insert(extension.id.id.clone());
                if !children.contains(&index) {
                    children.push(index);
                }
            }
        }
        Ok(children)
    }

    fn visit_dependency(
        &self,
        builder: &mut PlanBuilder,
        parent: &ExtensionId,
        dependency: &ExtensionDependency,
    ) -> ExtensionResult<Option<NodeIndex>> {
        if let Some(position) = builder
            .in_progress
            .iter()
            .position(|id| id == &dependency.id)
        {
            let mut chain = builder.in_progress[position..].to_vec();
            chain.push(dependency.id.clone());
            return Err(ExtensionError::DependencyCycle { chain });
        }

        let namespace = builder.namespace.clone();
        let ns = namespace.as_deref();
        let key = (dependency.id.clone(), namespace.clone());
        if let Some(&index) = builder.memo.get(&key) {
            let planned = builder.nodes[index].action.id();
            if !dependency.matches(planned) {
                return Err(ExtensionError::resolve(
                    dependency.to_string(),
                    format!(
                        "{parent} requires {dependency} but {planned} is already part of this plan"
                    ),
                ));
            }
            return Ok(Some(index));
        }

        let classified = match self.classify_dependency(dependency, ns) {
            Ok(classified) => classified,
            Err(err) if dependency.optional => {
                tracing::warn!(
                    parent = %parent,
                    dependency = %dependency,
                    error = %err,
                    "skipping unresolvable optional dependency"
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let (extension, action, previous) = classified;

        let children = if action.changes_state() {
            builder.in_progress.push(dependency.id.clone());
            let extension = extension.extension().clone();
            let children = self.visit_dependencies(builder, &extension)?;
            builder.in_progress.pop();
            children
        } else {
            Vec::new()
        };

        Ok(Some(builder.add_node(
            key,
            ExtensionPlanAction {
                extension,
                action,
                namespace,
                previous,
                dependency: true,
                propagated: false,
                required_by: BTreeSet::new(),
            },
            children,
        )))
    }

    fn classify_dependency(
        &self,
        dependency: &ExtensionDependency,
        ns: Option<&str>,
    ) -> ExtensionResult<(ResolvedExtension, ExtensionAction, Option<LocalExtension>)> {
        if let Some(core) = self.core.get(&dependency.id) {
            if dependency.matches(core.id()) {
                return Ok((ResolvedExtension::Core(core.clone()), ExtensionAction::None, None));
            }
            return Err(ExtensionError::resolve(
                dependency.to_string(),
                format!("core provides {} which does not match", core.id()),
            ));
        }

        if let Some(local) = self.installed_in(&dependency.id, ns) {
            if dependency.matches(local.id()) {
                return Ok((ResolvedExtension::Local(local), ExtensionAction::None, None));
            }
            let extension = self.resolve_remote_dependency(dependency)?;
            let installed = &local.id().version;
            if &extension.id.version < installed {
                return Err(ExtensionError::install(
                    extension.id.to_string(),
                    ns,
                    format!(
                        "{dependency} would downgrade from {installed}; uninstall it first to install an older version"
                    ),
                ));
            }
            return Ok((
                ResolvedExtension::Remote(extension),
                ExtensionAction::Upgrade,
                Some(local),
            ));
        }

        if ns.is_some() {
            if let Some(local) = self.installed_in(&dependency.id, None) {
                if dependency.matches(local.id()) {
                    return Ok((ResolvedExtension::Local(local), ExtensionAction::None, None));
                }
                return Err(ExtensionError::resolve(
                    dependency.to_string(),
                    format!(
                        "{} is installed at root and does not match",
                        local.id()
                    ),
                ));
            }
        }

        let extension = self.resolve_remote_dependency(dependency)?;
        Ok((ResolvedExtension::Remote(extension), ExtensionAction::Install, None))
    }

    /// Propagated installs for a root action into each named namespace that
    /// does not already hold the id.
    fn propagations(&self, action: &ExtensionPlanAction) -> Vec<ExtensionPlanAction> {
        if action.namespace.is_some()
            || !self.options.root_modifications_allowed
            || !matches!(
                action.action,
                ExtensionAction::Install | ExtensionAction::Upgrade
            )
        {
            return Vec::new();
        }

        self.store
            .namespaces()
            .into_iter()
            .filter(|namespace| {
                self.installed_in(&action.id().id, Some(namespace.as_str()))
                    .is_none()
            })
            .map(|namespace| ExtensionPlanAction {
                extension: action.extension.clone(),
                action: ExtensionAction::Install,
                namespace: Some(namespace),
                previous: None,
                dependency: action.dependency,
                propagated: true,
                required_by: action.required_by.clone(),
            })
            .collect()
    }

    fn visit_uninstall(
        &self,
        builder: &mut PlanBuilder,
        local: &LocalExtension,
        namespace: Option<String>,
        dependency: bool,
    ) -> ExtensionResult<NodeIndex> {
        let key = (local.id().id.clone(), namespace.clone());
        if let Some(&index) = builder.memo.get(&key) {
            return Ok(index);
        }

        builder.in_progress.push(local.id().id.clone());
        let mut children = Vec::new();
        for (dependent, dependent_namespace) in self.dependents(local.id(), namespace.as_deref())
        {
            if builder.in_progress.contains(&dependent.id().id) {
                continue;
            }
            let index = self.visit_uninstall(builder, &dependent, dependent_namespace, true)?;
            builder.nodes[index]
                .action
                .required_by
                .insert(local.id().id.clone());
            if !children.contains(&index) {
                children.push(index);
            }
        }
        builder.in_progress.pop();

        Ok(builder.add_node(
            key,
            ExtensionPlanAction {
                extension: ResolvedExtension::Local(local.clone()),
                action: ExtensionAction::Uninstall,
                namespace,
                previous: None,
                dependency,
                propagated: false,
                required_by: BTreeSet::new(),
            },
            children,
        ))
    }

    /// Installed extensions that depend on `id` where it is visible from
    /// `namespace`. A root install is visible everywhere, so every
    /// namespace's dependents count.
    fn dependents(
        &self,
        id: &ExtensionId,
        namespace: Option<&str>,
    ) -> Vec<(LocalExtension, Option<String>)> {
        if namespace.is_some() {
            return self
                .store
                .backward_dependencies(&id.id, namespace)
                .into_iter()
                .map(|local| (local, namespace.map(ToOwned::to_owned)))
                .collect();
        }

        let mut dependents = Vec::new();
        for local in self.store.all_extensions() {
            if !local.extension.depends_on(&id.id) {
                continue;
            }
            for dependent_namespace in &local.namespaces {
                dependents.push((local.clone(), dependent_namespace.clone()));
            }
        }
        dependents
    }

    fn installed_in(&self, id: &str, ns: Option<&str>) -> Option<LocalExtension> {
        self.store
            .get_installed_extension(id, ns)
            .filter(|local| local.is_installed_in(ns))
    }

    fn resolve_remote(&self, id: &ExtensionId) -> ExtensionResult<Extension> {
        match self.options.remote_timeout {
            Some(timeout) => self.chain.resolve_with_timeout(id, timeout),
            None => self.chain.resolve(id),
        }
    }

    fn resolve_remote_dependency(
        &self,
        dependency: &ExtensionDependency,
    ) -> ExtensionResult<Extension> {
        match self.options.remote_timeout {
            Some(timeout) => self.chain.resolve_dependency_with_timeout(dependency, timeout),
            None => self.chain.resolve_dependency(dependency),
        }
    }
}

type MemoKey = (String, Option<String>);

struct PlanBuilder {
    namespace: Option<String>,
    nodes: Vec<ExtensionPlanNode>,
    roots: Vec<NodeIndex>,
    memo: HashMap<MemoKey, NodeIndex>,
    in_progress: Vec<String>,
    post_order: Vec<NodeIndex>,
}

impl PlanBuilder {
    fn new(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace.map(ToOwned::to_owned),
            nodes: Vec::new(),
            roots: Vec::new(),
            memo: HashMap::new(),
            in_progress: Vec::new(),
            post_order: Vec::new(),
        }
    }

    /// Children are added first, so pushing here yields post-order.
    fn add_node(
        &mut self,
        key: MemoKey,
        action: ExtensionPlanAction,
        children: Vec<NodeIndex>,
    ) -> NodeIndex {
        let index = self.nodes.len();
        self.nodes.push(ExtensionPlanNode { action, children });
        self.memo.insert(key, index);
        self.post_order.push(index);
        index
    }

    fn finish(
        self,
        propagations: impl Fn(&ExtensionPlanAction) -> Vec<ExtensionPlanAction>,
    ) -> ExtensionPlan {
        let mut actions = Vec::with_capacity(self.post_order.len());
        for &index in &self.post_order {
            let action = self.nodes[index].action.clone();
            let propagated = propagations(&action);
            actions.push(action);
            actions.extend(propagated);
        }
        ExtensionPlan::new(self.nodes, self.roots, actions)
    }
}
