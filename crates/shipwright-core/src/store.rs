//! YAML-on-disk and in-memory implementations of the persistence contracts.

use crate::collab::{CycleStore, ServiceDirectory};
use crate::cycle::{Cycle, CycleId, GeneratedFile};
use crate::deployment::ServiceRecord;
use crate::error::{Result, ShipwrightError};
use crate::io::atomic_write;
use crate::paths;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Run filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ShipwrightError::Io(std::io::Error::other(e)))?
}

// ---------------------------------------------------------------------------
// YamlCycleStore
// ---------------------------------------------------------------------------

/// One YAML document per cycle under `.shipwright/cycles/`, generated
/// sources under `.shipwright/cycles/<id>/files/`.
#[derive(Debug, Clone)]
pub struct YamlCycleStore {
    root: PathBuf,
}

impl YamlCycleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn write_cycle(root: &Path, cycle: &Cycle) -> Result<()> {
    let data = serde_yaml::to_string(cycle)?;
    atomic_write(&paths::cycle_path(root, cycle.id), data.as_bytes())
}

fn read_cycle(path: &Path) -> Result<Cycle> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&data)?)
}

fn list_cycles(root: &Path) -> Result<Vec<Cycle>> {
    let dir = paths::cycles_dir(root);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cycles = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        match read_cycle(&path) {
            Ok(c) => cycles.push(c),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cycle")
            }
        }
    }
    cycles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(cycles)
}

fn replace_files(dir: &Path, files: &[GeneratedFile]) -> Result<()> {
    for file in files {
        paths::validate_relative_path(&file.path)?;
    }
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    for file in files {
        atomic_write(&dir.join(&file.path), file.content.as_bytes())?;
    }
    Ok(())
}

#[async_trait]
impl CycleStore for YamlCycleStore {
    async fn create(&self, cycle: &Cycle) -> Result<()> {
        let root = self.root.clone();
        let cycle = cycle.clone();
        blocking(move || {
            if paths::cycle_path(&root, cycle.id).exists() {
                return Err(ShipwrightError::Validation(format!(
                    "cycle {} already exists",
                    cycle.id
                )));
            }
            write_cycle(&root, &cycle)
        })
        .await
    }

    async fn get(&self, id: CycleId) -> Result<Option<Cycle>> {
        let path = paths::cycle_path(&self.root, id);
        blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            read_cycle(&path).map(Some)
        })
        .await
    }

    async fn update(&self, cycle: &Cycle) -> Result<()> {
        let root = self.root.clone();
        let cycle = cycle.clone();
        blocking(move || write_cycle(&root, &cycle)).await
    }

    async fn list(&self) -> Result<Vec<Cycle>> {
        let root = self.root.clone();
        blocking(move || list_cycles(&root)).await
    }

    async fn save_files(&self, id: CycleId, files: &[GeneratedFile]) -> Result<()> {
        let dir = paths::cycle_files_dir(&self.root, id);
        let files = files.to_vec();
        blocking(move || replace_files(&dir, &files)).await
    }

    async fn load_files(&self, id: CycleId) -> Result<Vec<GeneratedFile>> {
        let dir = paths::cycle_files_dir(&self.root, id);
        blocking(move || {
            let mut out = Vec::new();
            if dir.exists() {
                collect_files(&dir, &dir, &mut out)?;
            }
            out.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(out)
        })
        .await
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<GeneratedFile>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
            continue;
        }
        let rel = path
            .strip_prefix(base)
            .map_err(|e| ShipwrightError::Validation(e.to_string()))?;
        out.push(GeneratedFile {
            path: rel.to_string_lossy().replace('\\', "/"),
            content: std::fs::read_to_string(&path)?,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// YamlServiceDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: Vec<ServiceRecord>,
}

impl ServicesFile {
    fn load(root: &Path) -> Result<Self> {
        let path = paths::services_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        atomic_write(&paths::services_path(root), data.as_bytes())
    }
}

/// All service records in `.shipwright/services.yaml`. Writes are
/// serialized through a lock so concurrent cycles never lose a record.
#[derive(Debug)]
pub struct YamlServiceDirectory {
    root: PathBuf,
    lock: Mutex<()>,
}

impl YamlServiceDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<ServicesFile> {
        let root = self.root.clone();
        blocking(move || ServicesFile::load(&root)).await
    }

    pub async fn list(&self) -> Result<Vec<ServiceRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.services)
    }
}

#[async_trait]
impl ServiceDirectory for YamlServiceDirectory {
    /// Replaces any earlier record for the same cycle.
    async fn create(&self, record: &ServiceRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let root = self.root.clone();
        let record = record.clone();
        blocking(move || {
            let mut file = ServicesFile::load(&root)?;
            file.services.retain(|s| s.cycle_id != record.cycle_id);
            file.services.push(record);
            file.save(&root)
        })
        .await
    }

    async fn get_by_cycle_id(&self, cycle_id: CycleId) -> Result<Option<ServiceRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .services
            .into_iter()
            .find(|s| s.cycle_id == cycle_id))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ServiceRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.services.into_iter().find(|s| s.id == id))
    }
}

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

/// Volatile store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryCycleStore {
    cycles: DashMap<CycleId, Cycle>,
    files: DashMap<CycleId, Vec<GeneratedFile>>,
}

#[async_trait]
impl CycleStore for MemoryCycleStore {
    async fn create(&self, cycle: &Cycle) -> Result<()> {
        if self.cycles.contains_key(&cycle.id) {
            return Err(ShipwrightError::Validation(format!(
                "cycle {} already exists",
                cycle.id
            )));
        }
        self.cycles.insert(cycle.id, cycle.clone());
        Ok(())
    }

    async fn get(&self, id: CycleId) -> Result<Option<Cycle>> {
        Ok(self.cycles.get(&id).map(|c| c.clone()))
    }

    async fn update(&self, cycle: &Cycle) -> Result<()> {
        self.cycles.insert(cycle.id, cycle.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Cycle>> {
        let mut out: Vec<Cycle> = self.cycles.iter().map(|c| c.value().clone()).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn save_files(&self, id: CycleId, files: &[GeneratedFile]) -> Result<()> {
        self.files.insert(id, files.to_vec());
        Ok(())
    }

    async fn load_files(&self, id: CycleId) -> Result<Vec<GeneratedFile>> {
        Ok(self.files.get(&id).map(|f| f.clone()).unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryServiceDirectory {
    records: DashMap<Uuid, ServiceRecord>,
}

#[async_trait]
impl ServiceDirectory for MemoryServiceDirectory {
    async fn create(&self, record: &ServiceRecord) -> Result<()> {
        self.records.retain(|_, r| r.cycle_id != record.cycle_id);
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_by_cycle_id(&self, cycle_id: CycleId) -> Result<Option<ServiceRecord>> {
        Ok(self
            .records
            .iter()
            .find(|r| r.cycle_id == cycle_id)
            .map(|r| r.value().clone()))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ServiceRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CycleOptions;
    use crate::deployment::EndpointSpec;
    use crate::types::{Phase, ServiceKind};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn cycle() -> Cycle {
        Cycle::new("inventory api", CycleOptions::default(), "default", 3)
    }

    #[tokio::test]
    async fn yaml_store_create_get_update() {
        let dir = TempDir::new().unwrap();
        let store = YamlCycleStore::new(dir.path());
        let mut c = cycle();
        store.create(&c).await.unwrap();
        assert!(store.create(&c).await.is_err());

        c.phase = Phase::Coding;
        store.update(&c).await.unwrap();
        let back = store.get(c.id).await.unwrap().unwrap();
        assert_eq!(back.phase, Phase::Coding);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn yaml_store_lists_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = YamlCycleStore::new(dir.path());
        let mut older = cycle();
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        let newer = cycle();
        store.create(&older).await.unwrap();
        store.create(&newer).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newer.id);
    }

    #[tokio::test]
    async fn files_roundtrip_and_replace() {
        let dir = TempDir::new().unwrap();
        let store = YamlCycleStore::new(dir.path());
        let id = Uuid::new_v4();
        let files = vec![
            GeneratedFile {
                path: "src/index.ts".into(),
                content: "console.log(1)".into(),
            },
            GeneratedFile {
                path: "package.json".into(),
                content: "{}".into(),
            },
        ];
        store.save_files(id, &files).await.unwrap();
        let back = store.load_files(id).await.unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].path, "package.json");
        assert_eq!(back[1].path, "src/index.ts");

        store.save_files(id, &files[..1]).await.unwrap();
        assert_eq!(store.load_files(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn files_cannot_escape() {
        let dir = TempDir::new().unwrap();
        let store = YamlCycleStore::new(dir.path());
        let bad = vec![GeneratedFile {
            path: "../../outside.txt".into(),
            content: String::new(),
        }];
        assert!(store.save_files(Uuid::new_v4(), &bad).await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_saves_on_one_thread() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(YamlCycleStore::new(dir.path()));
        let cycles: Vec<Cycle> = (0..8).map(|_| cycle()).collect();
        let tasks: Vec<_> = cycles
            .iter()
            .cloned()
            .map(|c| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.create(&c).await?;
                    let files = vec![GeneratedFile {
                        path: "src/index.js".into(),
                        content: c.id.to_string(),
                    }];
                    store.save_files(c.id, &files).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 8);
        for c in &cycles {
            let files = store.load_files(c.id).await.unwrap();
            assert_eq!(files[0].content, c.id.to_string());
        }
    }

    #[tokio::test]
    async fn service_directory_replaces_per_cycle() {
        let dir = TempDir::new().unwrap();
        let services = YamlServiceDirectory::new(dir.path());
        let cycle_id = Uuid::new_v4();
        let mut record = ServiceRecord {
            id: Uuid::new_v4(),
            cycle_id,
            name: "inventory".into(),
            namespace: "default".into(),
            kind: ServiceKind::Api,
            url: "http://10.0.0.1:30080".into(),
            endpoints: vec![EndpointSpec::new("GET", "/api/items")],
            created_at: Utc::now(),
        };
        services.create(&record).await.unwrap();
        record.id = Uuid::new_v4();
        record.url = "http://10.0.0.1:30081".into();
        services.create(&record).await.unwrap();

        assert_eq!(services.list().await.unwrap().len(), 1);
        let found = services.get_by_cycle_id(cycle_id).await.unwrap().unwrap();
        assert_eq!(found.url, "http://10.0.0.1:30081");
        assert!(services.get_by_id(record.id).await.unwrap().is_some());
    }
}
