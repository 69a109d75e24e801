use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::error::RegistryError;
use crate::core::java::JavaRuntime;
use crate::core::java_discovery::JavaDiscovery;
use crate::core::java_probe::resolve_executable;

/// Known-good Java runtimes, keyed by executable path.
///
/// Readers (`get`, `resolve`) only take the read lock for a copy. Every
/// mutation, including a whole refresh cycle, is serialized by the writer
/// lock, and a refresh publishes its result with a single swap, so readers
/// see the set from before or after a refresh and never one in between.
pub struct JavaRuntimeRegistry {
    discovery: JavaDiscovery,
    runtimes: RwLock<BTreeMap<PathBuf, JavaRuntime>>,
    writer: Mutex<WriterState>,
    refreshing: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct WriterState {
    initialized: bool,
}

/// Clears the refreshing flag when dropped, even if the task never ran.
struct RefreshDone(Arc<JavaRuntimeRegistry>);

impl Drop for RefreshDone {
    fn drop(&mut self) {
        self.0.refreshing.send_replace(false);
    }
}

impl JavaRuntimeRegistry {
    pub fn new(discovery: JavaDiscovery) -> Self {
        Self {
            discovery,
            runtimes: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(WriterState::default()),
            refreshing: watch::Sender::new(false),
        }
    }

    pub fn discovery(&self) -> &JavaDiscovery {
        &self.discovery
    }

    /// Loads persisted executable paths, probing each one again. Paths that
    /// no longer validate are dropped. May only be called once.
    pub fn init<I, P>(&self, paths: I) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut writer = lock(&self.writer);
        if writer.initialized {
            return Err(RegistryError::AlreadyInitialized);
        }

        let mut loaded = BTreeMap::new();
        for path in paths {
            match self.discovery.probe().probe(path.as_ref()) {
                Ok(runtime) => {
                    loaded
                        .entry(runtime.executable().to_path_buf())
                        .or_insert(runtime);
                }
                Err(error) => warn!(%error, "failed to load saved Java runtime"),
            }
        }

        let count = loaded.len();
        let mut runtimes = write(&self.runtimes);
        for (path, runtime) in loaded {
            runtimes.entry(path).or_insert(runtime);
        }
        writer.initialized = true;
        Ok(count)
    }

    /// Snapshot in ranking order.
    pub fn get(&self) -> Vec<JavaRuntime> {
        let mut runtimes: Vec<_> = read(&self.runtimes).values().cloned().collect();
        runtimes.sort_by(JavaRuntime::rank);
        runtimes
    }

    pub fn len(&self) -> usize {
        read(&self.runtimes).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.runtimes).is_empty()
    }

    /// Returns `false` when a runtime with the same path is already known;
    /// the existing entry is kept.
    pub fn add(&self, runtime: JavaRuntime) -> bool {
        let _writer = lock(&self.writer);
        let mut runtimes = write(&self.runtimes);
        if runtimes.contains_key(runtime.executable()) {
            return false;
        }
        runtimes.insert(runtime.executable().to_path_buf(), runtime);
        true
    }

    pub fn remove(&self, path: &Path) -> Option<JavaRuntime> {
        let _writer = lock(&self.writer);
        write(&self.runtimes).remove(path)
    }

    /// Looks a runtime up by executable path, or by home directory.
    pub fn resolve(&self, path: &Path) -> Option<JavaRuntime> {
        let runtimes = read(&self.runtimes);
        runtimes
            .get(path)
            .or_else(|| runtimes.get(&resolve_executable(path)))
            .cloned()
    }

    /// Runtime for a required major version: an exact match if there is one,
    /// otherwise the closest newer major. Without a requirement the top
    /// ranked runtime wins.
    pub fn best_match(&self, required_major: Option<u32>) -> Option<JavaRuntime> {
        let runtimes = self.get();
        let Some(required) = required_major else {
            return runtimes.into_iter().next();
        };
        runtimes
            .iter()
            .find(|runtime| runtime.version() == Some(required))
            .or_else(|| {
                runtimes
                    .iter()
                    .filter(|runtime| runtime.version().is_some_and(|major| major > required))
                    .min_by_key(|runtime| runtime.version())
            })
            .cloned()
    }

    /// Executable paths to persist, in ranking order.
    pub fn runtime_paths(&self) -> Vec<String> {
        self.get()
            .iter()
            .map(|runtime| runtime.executable().to_string_lossy().to_string())
            .collect()
    }

    /// Starts a background refresh and returns immediately. Returns `false`
    /// without doing anything if one is already running.
    pub fn refresh(self: &Arc<Self>) -> bool {
        let started = self.refreshing.send_if_modified(|refreshing| {
            if *refreshing {
                return false;
            }
            *refreshing = true;
            true
        });
        if !started {
            debug!("Java search already running");
            return false;
        }

        let done = RefreshDone(Arc::clone(self));
        let task = move || {
            let done = done;
            done.0.refresh_now();
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("searchJava".to_string())
                    .spawn(task);
                if let Err(error) = spawned {
                    warn!(%error, "failed to start Java search");
                    return false;
                }
            }
        }
        true
    }

    pub fn is_refreshing(&self) -> bool {
        *self.refreshing.borrow()
    }

    /// Resolves once no refresh is in flight.
    pub async fn wait_for_refresh(&self) {
        let mut receiver = self.refreshing.subscribe();
        let _ = receiver.wait_for(|refreshing| !*refreshing).await;
    }

    /// One refresh cycle on the calling thread: drop runtimes that fail
    /// re-validation, then merge everything the search finds.
    pub fn refresh_now(&self) {
        let _writer = lock(&self.writer);

        let current = read(&self.runtimes).clone();
        let mut next = BTreeMap::new();
        for (path, runtime) in current {
            match self.discovery.probe().revalidate(&runtime) {
                Ok(_) => {
                    next.insert(path, runtime);
                }
                Err(error) => warn!(%error, %runtime, "expired Java runtime"),
            }
        }

        info!("Start searching for potential Java runtimes...");
        let started = Instant::now();
        let mut found = 0usize;
        for runtime in self.discovery.discover() {
            found += 1;
            next.entry(runtime.executable().to_path_buf())
                .or_insert(runtime);
        }
        debug!(
            found,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished searching potential Java runtimes"
        );

        *write(&self.runtimes) = next;

        let runtimes = self.get();
        debug!(total = runtimes.len(), "Java runtimes in registry");
        for runtime in &runtimes {
            debug!(%runtime);
        }
    }
}

impl Default for JavaRuntimeRegistry {
    fn default() -> Self {
        Self::new(JavaDiscovery::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::core::error::JavaError;
    use crate::core::java::{Bitness, JavaPlatform, OperatingSystem};
    use crate::core::java_discovery::tests::{install, FakeProbe};
    use crate::core::java_discovery::{PlatformSearch, SearchContext};
    use crate::core::java_probe::JavaProbe;

    struct SlowProbe(Duration);

    impl JavaProbe for SlowProbe {
        fn probe(&self, path: &Path) -> Result<JavaRuntime, JavaError> {
            std::thread::sleep(self.0);
            FakeProbe.probe(path)
        }
    }

    fn registry_with(probe: Arc<dyn JavaProbe>, context: SearchContext) -> Arc<JavaRuntimeRegistry> {
        Arc::new(JavaRuntimeRegistry::new(JavaDiscovery::with_context(
            probe,
            PlatformSearch::for_os(OperatingSystem::Unknown),
            context,
        )))
    }

    fn runtime(path: &str, version: Option<u32>) -> JavaRuntime {
        JavaRuntime::new(
            PathBuf::from(path),
            version,
            None,
            JavaPlatform::new(OperatingSystem::Linux, Bitness::X64),
        )
    }

    fn path_of(homes: &[PathBuf]) -> std::ffi::OsString {
        std::env::join_paths(homes.iter().map(|home| home.join("bin"))).unwrap()
    }

    #[test]
    fn init_twice_is_rejected_and_keeps_state() {
        let root = tempfile::tempdir().unwrap();
        let java = install(&root.path().join("jdk-17"), "17");
        let registry = registry_with(Arc::new(FakeProbe), SearchContext::default());

        assert_eq!(registry.init([&java]), Ok(1));
        let other = install(&root.path().join("jdk-21"), "21");
        assert_eq!(
            registry.init([&other]),
            Err(RegistryError::AlreadyInitialized)
        );
        assert_eq!(registry.runtime_paths(), vec![java.to_string_lossy().to_string()]);
    }

    #[test]
    fn init_drops_paths_that_no_longer_validate() {
        let root = tempfile::tempdir().unwrap();
        let java = install(&root.path().join("jdk-8"), "1.8.0_301");
        let registry = registry_with(Arc::new(FakeProbe), SearchContext::default());

        let loaded = registry
            .init([java.clone(), root.path().join("gone").join("bin").join("java")])
            .unwrap();
        assert_eq!(loaded, 1);
        assert!(registry.resolve(&java).is_some());
    }

    #[test]
    fn resolve_returns_added_runtime_until_removed() {
        let registry = registry_with(Arc::new(FakeProbe), SearchContext::default());
        let java = runtime("/opt/jdk-17/bin/java", Some(17));

        assert!(registry.add(java.clone()));
        assert!(!registry.add(runtime("/opt/jdk-17/bin/java", Some(99))));

        let resolved = registry.resolve(Path::new("/opt/jdk-17/bin/java")).unwrap();
        assert_eq!(resolved.version(), Some(17));

        assert_eq!(registry.remove(java.executable()), Some(java.clone()));
        assert!(registry.resolve(java.executable()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn get_orders_newest_first_regardless_of_insertion() {
        let registry = registry_with(Arc::new(FakeProbe), SearchContext::default());
        registry.add(runtime("/a/java", Some(8)));
        registry.add(runtime("/b/java", None));
        registry.add(runtime("/c/java", Some(21)));
        registry.add(runtime("/d/java", Some(17)));

        let versions: Vec<_> = registry.get().iter().map(JavaRuntime::version).collect();
        assert_eq!(versions, vec![Some(21), Some(17), Some(8), None]);
    }

    #[test]
    fn best_match_prefers_exact_then_closest_newer() {
        let registry = registry_with(Arc::new(FakeProbe), SearchContext::default());
        registry.add(runtime("/a/java", Some(8)));
        registry.add(runtime("/c/java", Some(21)));
        registry.add(runtime("/d/java", Some(17)));

        let pick = |major| registry.best_match(major).and_then(|java| java.version());
        assert_eq!(pick(Some(8)), Some(8));
        assert_eq!(pick(Some(11)), Some(17));
        assert_eq!(pick(None), Some(21));
        assert_eq!(pick(Some(25)), None);
    }

    #[tokio::test]
    async fn refresh_deduplicates_candidates_by_path() {
        let root = tempfile::tempdir().unwrap();
        let home = root.path().join("jdk-17");
        install(&home, "17");
        let context = SearchContext::default()
            .with_var("PATH", path_of(&[home.clone(), home.clone()]))
            .with_var("JAVA_HOME", home.clone().into_os_string());
        let registry = registry_with(Arc::new(FakeProbe), context);
        registry.init(Vec::<PathBuf>::new()).unwrap();

        assert!(registry.refresh());
        registry.wait_for_refresh().await;

        assert!(!registry.is_refreshing());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get()[0].executable(), home.join("bin").join("java"));
    }

    #[test]
    fn refresh_drops_expired_runtimes() {
        let root = tempfile::tempdir().unwrap();
        let replaced = install(&root.path().join("replaced"), "17");
        let registry = registry_with(Arc::new(FakeProbe), SearchContext::default());
        registry.add(JavaRuntime::new(
            replaced,
            Some(8),
            None,
            JavaPlatform::new(OperatingSystem::Linux, Bitness::X64),
        ));
        registry.add(runtime("/deleted/bin/java", Some(11)));

        registry.refresh_now();

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn second_refresh_while_running_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let home = root.path().join("jdk-21");
        install(&home, "21");
        let context = SearchContext::default().with_var("PATH", path_of(&[home]));
        let registry = registry_with(Arc::new(SlowProbe(Duration::from_millis(200))), context);

        assert!(registry.refresh());
        assert!(registry.is_refreshing());
        assert!(!registry.refresh());

        registry.wait_for_refresh().await;
        assert!(!registry.is_refreshing());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn flag_clears_when_the_search_task_never_runs() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let handle = runtime.handle().clone();
        drop(runtime);

        let registry = registry_with(Arc::new(FakeProbe), SearchContext::default());
        let _context = handle.enter();
        registry.refresh();

        assert!(!registry.is_refreshing());
        assert!(registry.refresh());
    }

    #[tokio::test]
    async fn readers_never_observe_a_partial_refresh() {
        let root = tempfile::tempdir().unwrap();
        let homes: Vec<_> = ["jdk-8", "jdk-17", "jdk-21"]
            .iter()
            .map(|name| root.path().join(name))
            .collect();
        for (home, version) in homes.iter().zip(["8", "17", "21"]) {
            install(home, version);
        }
        let context = SearchContext::default().with_var("PATH", path_of(&homes));
        let registry = registry_with(Arc::new(SlowProbe(Duration::from_millis(50))), context);

        assert!(registry.refresh());
        let reader = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let mut seen = HashSet::new();
                loop {
                    let refreshing = registry.is_refreshing();
                    seen.insert(registry.get().len());
                    if !refreshing {
                        break;
                    }
                }
                seen
            })
        };
        registry.wait_for_refresh().await;
        let seen = reader.join().unwrap();

        assert!(seen.iter().all(|len| *len == 0 || *len == 3), "{seen:?}");
        assert_eq!(registry.len(), 3);
    }
}
