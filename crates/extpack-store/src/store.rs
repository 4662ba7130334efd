use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use extpack_core::{
    ArchiveType, Extension, ExtensionError, ExtensionId, ExtensionResult, LocalExtension,
    RepositoryId,
};
use fs2::FileExt;
use semver::Version;

use crate::layout::StoreLayout;
use crate::record::{parse_record, render_record};

type Versions = BTreeMap<Version, LocalExtension>;
type Records = BTreeMap<String, Versions>;

/// Durable record of which extension versions are installed in which
/// namespaces (the "local" repository).
///
/// Reads share one `RwLock`, which writers hold only to publish a finished
/// change. Writes are serialized per id, since a record file carries every
/// namespace of its release and a root install touches all of them. Record
/// files are replaced under an exclusive `fs2` lock on their sibling `.lock`
/// file.
#[derive(Debug)]
pub struct LocalExtensionStore {
    layout: StoreLayout,
    records: RwLock<Records>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalExtensionStore {
    pub fn open(layout: StoreLayout) -> ExtensionResult<Self> {
        let records = load_records(&layout)
            .map_err(|err| ExtensionError::collect_from(RepositoryId::local().to_string(), &err))?;
        tracing::debug!(
            records = records.values().map(BTreeMap::len).sum::<usize>(),
            root = %layout.prefix().display(),
            "opened local extension store"
        );
        Ok(Self {
            layout,
            records: RwLock::new(records),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn resolve(&self, id: &ExtensionId) -> ExtensionResult<LocalExtension> {
        self.read_records()
            .get(&id.id)
            .and_then(|versions| versions.get(&id.version))
            .cloned()
            .ok_or_else(|| ExtensionError::resolve(id.to_string(), "not installed"))
    }

    /// The installed release of `id` visible from `namespace`: an install in
    /// that exact namespace wins over a root install; the highest version wins
    /// within each.
    pub fn get_installed_extension(
        &self,
        id: &str,
        namespace: Option<&str>,
    ) -> Option<LocalExtension> {
        let records = self.read_records();
        let versions = records.get(id)?;
        versions
            .values()
            .rev()
            .find(|local| local.is_installed_in(namespace))
            .or_else(|| {
                versions
                    .values()
                    .rev()
                    .find(|local| local.is_installed_at_root())
            })
            .cloned()
    }

    /// Extensions recorded in exactly `namespace` (`None` lists root installs).
    pub fn installed_extensions(&self, namespace: Option<&str>) -> Vec<LocalExtension> {
        self.read_records()
            .values()
            .flat_map(BTreeMap::values)
            .filter(|local| local.is_installed_in(namespace))
            .cloned()
            .collect()
    }

    pub fn all_extensions(&self) -> Vec<LocalExtension> {
        self.read_records()
            .values()
            .flat_map(BTreeMap::values)
            .cloned()
            .collect()
    }

    /// Every named namespace that holds at least one extension.
    pub fn namespaces(&self) -> BTreeSet<String> {
        self.read_records()
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(|local| local.named_namespaces().map(ToOwned::to_owned))
            .collect()
    }

    pub fn count_extensions(&self) -> usize {
        self.read_records().values().map(BTreeMap::len).sum()
    }

    /// Extensions installed in exactly `namespace` that declare a dependency
    /// on `id`.
    pub fn backward_dependencies(&self, id: &str, namespace: Option<&str>) -> Vec<LocalExtension> {
        self.read_records()
            .values()
            .flat_map(BTreeMap::values)
            .filter(|local| local.is_installed_in(namespace) && local.extension.depends_on(id))
            .cloned()
            .collect()
    }

    pub fn artifact_path(&self, extension: &Extension) -> PathBuf {
        let archive_type = extension
            .artifact
            .as_ref()
            .and_then(|artifact| artifact.archive_type().ok())
            .unwrap_or(ArchiveType::Bin);
        self.layout
            .artifact_cache_path(&extension.id.id, &extension.id.version, archive_type)
    }

    /// Records `extension` as installed in `namespace`. Installing at root
    /// drops the id's named-namespace entries.
    pub fn install(
        &self,
        extension: &Extension,
        namespace: Option<&str>,
        dependency_of: Option<&str>,
    ) -> ExtensionResult<LocalExtension> {
        let id = &extension.id.id;
        let key_lock = self.write_lock(id);
        let _key_guard = key_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = self.versions_of(id);
        let mut after = before.clone();
        let mut touched = Vec::new();
        let installed =
            stage_install(&mut after, &mut touched, extension, namespace, dependency_of)?;
        self.commit(id, &before, after, &touched)
            .map_err(|err| ExtensionError::install(id, namespace, format!("{err:#}")))?;
        tracing::info!(
            extension = %installed.id(),
            namespace = extpack_core::namespace_label(namespace),
            "recorded installed extension"
        );
        Ok(installed)
    }

    /// Replaces `previous` with `extension` in `namespace` as one write; on
    /// failure both records stay as they were.
    pub fn upgrade(
        &self,
        previous: &LocalExtension,
        extension: &Extension,
        namespace: Option<&str>,
        dependency_of: Option<&str>,
    ) -> ExtensionResult<LocalExtension> {
        let id = &extension.id.id;
        if previous.id().id != *id {
            return Err(ExtensionError::install(
                extension.id.to_string(),
                namespace,
                format!("cannot replace {}", previous.id()),
            ));
        }
        let key_lock = self.write_lock(id);
        let _key_guard = key_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = self.versions_of(id);
        let mut after = before.clone();
        let mut touched = Vec::new();
        stage_uninstall(&mut after, &mut touched, previous.id(), namespace)
            .map_err(|err| ExtensionError::install(id, namespace, err.to_string()))?;
        let installed =
            stage_install(&mut after, &mut touched, extension, namespace, dependency_of)?;
        self.commit(id, &before, after, &touched)
            .map_err(|err| ExtensionError::install(id, namespace, format!("{err:#}")))?;
        tracing::info!(
            extension = %installed.id(),
            previous = %previous.id(),
            namespace = extpack_core::namespace_label(namespace),
            "replaced installed extension"
        );
        Ok(installed)
    }

    /// Removes `namespace` from the record of `id`; the record file is
    /// deleted once no namespace remains. Returns the record as it was.
    pub fn uninstall(
        &self,
        id: &ExtensionId,
        namespace: Option<&str>,
    ) -> ExtensionResult<LocalExtension> {
        let key_lock = self.write_lock(&id.id);
        let _key_guard = key_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = self.versions_of(&id.id);
        let mut after = before.clone();
        let mut touched = Vec::new();
        let removed = stage_uninstall(&mut after, &mut touched, id, namespace)?;
        self.commit(&id.id, &before, after, &touched)
            .map_err(|err| ExtensionError::uninstall(id.to_string(), namespace, format!("{err:#}")))?;
        tracing::info!(
            extension = %id,
            namespace = extpack_core::namespace_label(namespace),
            "removed installed extension record"
        );
        Ok(removed)
    }

    /// Persists the touched releases of `after`, then publishes it. If a
    /// write fails the touched records are rewritten from `before` and the
    /// in-memory state is left alone.
    fn commit(
        &self,
        id: &str,
        before: &Versions,
        mut after: Versions,
        touched: &[ExtensionId],
    ) -> Result<()> {
        if let Err(err) = self.persist(&after, touched) {
            if let Err(restore_err) = self.persist(before, touched) {
                tracing::warn!(
                    extension = id,
                    error = %format!("{restore_err:#}"),
                    "failed to restore install records"
                );
            }
            return Err(err);
        }

        after.retain(|_, local| !local.namespaces.is_empty());
        let mut records = self.write_records();
        if after.is_empty() {
            records.remove(id);
        } else {
            records.insert(id.to_string(), after);
        }
        Ok(())
    }

    /// Writes each touched record, deleting those absent from `versions` or
    /// left without a namespace.
    fn persist(&self, versions: &Versions, touched: &[ExtensionId]) -> Result<()> {
        for id in touched {
            match versions.get(&id.version) {
                Some(local) if !local.namespaces.is_empty() => write_record(&self.layout, local)?,
                _ => remove_record(&self.layout, id)?,
            }
        }
        Ok(())
    }

    fn versions_of(&self, id: &str) -> Versions {
        self.read_records().get(id).cloned().unwrap_or_default()
    }

    fn write_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, Records> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, Records> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn stage_install(
    versions: &mut Versions,
    touched: &mut Vec<ExtensionId>,
    extension: &Extension,
    namespace: Option<&str>,
    dependency_of: Option<&str>,
) -> ExtensionResult<LocalExtension> {
    let id = &extension.id.id;
    if let Some(existing) = versions
        .values()
        .find(|local| local.is_installed_in(namespace))
    {
        return Err(ExtensionError::install(
            id,
            namespace,
            format!("version {} is already installed", existing.id().version),
        ));
    }
    if namespace.is_some() {
        if let Some(existing) = versions.values().find(|local| local.is_installed_at_root()) {
            return Err(ExtensionError::install(
                id,
                namespace,
                format!("version {} is already installed at root", existing.id().version),
            ));
        }
    }

    if namespace.is_none() {
        for local in versions.values_mut() {
            if local.named_namespaces().next().is_some() {
                local.namespaces.retain(Option::is_none);
                touched.push(local.id().clone());
            }
        }
    }

    let local = versions
        .entry(extension.id.version.clone())
        .or_insert_with(|| LocalExtension {
            extension: extension.clone(),
            namespaces: BTreeSet::new(),
            installed_as_dependency_of: BTreeSet::new(),
            installed_at_unix: now_unix(),
        });
    local.namespaces.insert(namespace.map(ToOwned::to_owned));
    if let Some(parent) = dependency_of {
        local.installed_as_dependency_of.insert(parent.to_string());
    }
    touched.push(local.id().clone());
    Ok(local.clone())
}

fn stage_uninstall(
    versions: &mut Versions,
    touched: &mut Vec<ExtensionId>,
    id: &ExtensionId,
    namespace: Option<&str>,
) -> ExtensionResult<LocalExtension> {
    let Some(local) = versions
        .get_mut(&id.version)
        .filter(|local| local.is_installed_in(namespace))
    else {
        return Err(ExtensionError::uninstall(
            id.to_string(),
            namespace,
            "not installed",
        ));
    };
    let removed = local.clone();
    local.namespaces.remove(&namespace.map(ToOwned::to_owned));
    touched.push(id.clone());
    Ok(removed)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn load_records(layout: &StoreLayout) -> Result<Records> {
    let dir = layout.installed_state_dir();
    let mut records = Records::new();
    if !dir.exists() {
        return Ok(records);
    }

    for entry in fs::read_dir(&dir)
        .with_context(|| format!("failed to read install state directory: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        for record_entry in fs::read_dir(entry.path())? {
            let path = record_entry?.path();
            if path.extension().and_then(|v| v.to_str()) != Some("record") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read install record: {}", path.display()))?;
            let local = parse_record(&raw)
                .with_context(|| format!("failed to parse install record: {}", path.display()))?;
            records
                .entry(local.id().id.clone())
                .or_default()
                .insert(local.id().version.clone(), local);
        }
    }

    Ok(records)
}

fn write_record(layout: &StoreLayout, local: &LocalExtension) -> Result<()> {
    let id = local.id();
    let dir = layout.record_dir(&id.id);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let lock_path = layout.record_lock_path(&id.id, &id.version);
    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open record lock: {}", lock_path.display()))?;
    lock_file
        .lock_exclusive()
        .with_context(|| format!("failed to lock record: {}", lock_path.display()))?;

    let path = layout.record_path(&id.id, &id.version);
    let temp_path = path.with_extension("record.tmp");
    fs::write(&temp_path, render_record(local).as_bytes())
        .with_context(|| format!("failed to write install record: {}", temp_path.display()))?;
    fs::rename(&temp_path, &path)
        .with_context(|| format!("failed to replace install record: {}", path.display()))?;
    Ok(())
}

fn remove_record(layout: &StoreLayout, id: &ExtensionId) -> Result<()> {
    let lock_path = layout.record_lock_path(&id.id, &id.version);
    let path = layout.record_path(&id.id, &id.version);
    {
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("failed to open record lock: {}", lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .with_context(|| format!("failed to lock record: {}", lock_path.display()))?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove install record: {}", path.display()))?;
        }
    }
    let _ = fs::remove_file(&lock_path);
    let _ = fs::remove_dir(layout.record_dir(&id.id));
    Ok(())
}
