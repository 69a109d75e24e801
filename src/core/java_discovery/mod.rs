//! Where Java installs live on each platform.
//!
//! Every platform is a table of [`SearchSource`]s. Sources are expanded one at
//! a time while the candidate iterator is consumed, and a failing source only
//! loses its own candidates.

mod registry;

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::error::DiscoveryError;
use crate::core::java::{JavaRuntime, OperatingSystem};
use crate::core::java_probe::{CommandProbe, JavaProbe};

#[derive(Debug, Clone, Copy)]
pub(crate) enum SearchRoot {
    Absolute(&'static str),
    /// `<$var>/<relative>`, or `<fallback>/<relative>` when the variable is unset.
    Env {
        var: &'static str,
        fallback: Option<&'static str>,
        relative: &'static str,
    },
    UserHome(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum SearchSource {
    /// Registry key whose MSI-installed subkeys name a `JavaHome`.
    Registry(&'static str),
    /// Each subdirectory of `<root>/<vendor>` (of `<root>` when there are no
    /// vendors), joined with `suffix`, is a home. `nested_jre` also tries the
    /// `jre` folder inside that home.
    Homes {
        roots: &'static [SearchRoot],
        vendors: &'static [&'static str],
        suffix: Option<&'static str>,
        nested_jre: bool,
    },
    /// Game launcher runtime cache: `<root>/<component>/<platform>/<component>`.
    GameRuntimes(SearchRoot),
    Direct(SearchRoot),
}

const PROGRAM_FILES: &[SearchRoot] = &[
    SearchRoot::Env {
        var: "ProgramFiles",
        fallback: None,
        relative: "",
    },
    SearchRoot::Env {
        var: "ProgramFiles(x86)",
        fallback: None,
        relative: "",
    },
    SearchRoot::Env {
        var: "ProgramFiles(ARM)",
        fallback: None,
        relative: "",
    },
];

const WINDOWS_VENDORS: &[&str] = &[
    "Java",
    "BellSoft",
    "AdoptOpenJDK",
    "Zulu",
    "Microsoft",
    "Eclipse Foundation",
    "Semeru",
];

const WINDOWS_SOURCES: &[SearchSource] = &[
    SearchSource::Registry("HKEY_LOCAL_MACHINE\\SOFTWARE\\JavaSoft\\Java Runtime Environment\\"),
    SearchSource::Registry("HKEY_LOCAL_MACHINE\\SOFTWARE\\JavaSoft\\Java Development Kit\\"),
    SearchSource::Registry("HKEY_LOCAL_MACHINE\\SOFTWARE\\JavaSoft\\JRE\\"),
    SearchSource::Registry("HKEY_LOCAL_MACHINE\\SOFTWARE\\JavaSoft\\JDK\\"),
    SearchSource::Homes {
        roots: PROGRAM_FILES,
        vendors: WINDOWS_VENDORS,
        suffix: None,
        nested_jre: false,
    },
    SearchSource::GameRuntimes(SearchRoot::Env {
        var: "LocalAppData",
        fallback: None,
        relative: "Packages/Microsoft.4297127D64EC6_8wekyb3d8bbwe/LocalCache/Local/runtime",
    }),
    SearchSource::GameRuntimes(SearchRoot::Env {
        var: "ProgramFiles(x86)",
        fallback: Some("C:\\Program Files (x86)"),
        relative: "Minecraft Launcher/runtime",
    }),
];

const LINUX_SOURCES: &[SearchSource] = &[
    SearchSource::Homes {
        roots: &[
            SearchRoot::Absolute("/usr/java"),
            SearchRoot::Absolute("/usr/lib/jvm"),
            SearchRoot::Absolute("/usr/lib32/jvm"),
        ],
        vendors: &[],
        suffix: None,
        nested_jre: false,
    },
    SearchSource::GameRuntimes(SearchRoot::UserHome(".minecraft/runtime")),
];

const MACOS_SOURCES: &[SearchSource] = &[
    SearchSource::Homes {
        roots: &[
            SearchRoot::Absolute("/Library/Java/JavaVirtualMachines"),
            SearchRoot::UserHome("Library/Java/JavaVirtualMachines"),
        ],
        vendors: &[],
        suffix: Some("Contents/Home"),
        nested_jre: true,
    },
    SearchSource::Homes {
        roots: &[SearchRoot::Absolute("/System/Library/Java/JavaVirtualMachines")],
        vendors: &[],
        suffix: Some("Contents/Home"),
        nested_jre: false,
    },
    SearchSource::Direct(SearchRoot::Absolute(
        "/Library/Internet Plug-Ins/JavaAppletPlugin.plugin/Contents/Home/bin/java",
    )),
    SearchSource::Direct(SearchRoot::Absolute(
        "/Applications/Xcode.app/Contents/Applications/Application Loader.app/Contents/MacOS/itms/java/bin/java",
    )),
    SearchSource::GameRuntimes(SearchRoot::UserHome(
        "Library/Application Support/minecraft/runtime",
    )),
];

/// The candidate sources of one operating system.
#[derive(Debug, Clone, Copy)]
pub struct PlatformSearch {
    os: OperatingSystem,
    sources: &'static [SearchSource],
}

impl PlatformSearch {
    pub fn for_os(os: OperatingSystem) -> Self {
        let sources = match os {
            OperatingSystem::Windows => WINDOWS_SOURCES,
            OperatingSystem::MacOs => MACOS_SOURCES,
            OperatingSystem::Linux => LINUX_SOURCES,
            OperatingSystem::Unknown => &[],
        };
        Self { os, sources }
    }

    pub fn current() -> Self {
        Self::for_os(OperatingSystem::current())
    }

    pub fn os(&self) -> OperatingSystem {
        self.os
    }
}

/// Environment the search reads: variables, the user home and an optional
/// prefix applied to absolute table paths.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    vars: HashMap<String, OsString>,
    home: Option<PathBuf>,
    fs_root: Option<PathBuf>,
}

impl SearchContext {
    pub fn from_env() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(key, value)| key.into_string().ok().map(|key| (key, value)))
                .collect(),
            home: dirs::home_dir(),
            fs_root: None,
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_fs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fs_root = Some(root.into());
        self
    }

    fn var(&self, key: &str) -> Option<&OsString> {
        self.vars.get(key).or_else(|| {
            self.vars
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
    }

    fn absolute(&self, path: &str) -> PathBuf {
        match &self.fs_root {
            Some(root) => join_relative(root, path),
            None => PathBuf::from(path),
        }
    }

    fn resolve(&self, root: SearchRoot) -> Option<PathBuf> {
        match root {
            SearchRoot::Absolute(path) => Some(self.absolute(path)),
            SearchRoot::Env {
                var,
                fallback,
                relative,
            } => {
                let base = self
                    .var(var)
                    .map(PathBuf::from)
                    .or_else(|| fallback.map(|path| self.absolute(path)))?;
                Some(join_relative(&base, relative))
            }
            SearchRoot::UserHome(relative) => {
                self.home.as_ref().map(|home| join_relative(home, relative))
            }
        }
    }
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(base.to_path_buf(), |path, segment| path.join(segment))
}

fn list_directories(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(DiscoveryError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn or_skip(result: Result<Vec<PathBuf>, DiscoveryError>) -> Vec<PathBuf> {
    match result {
        Ok(paths) => paths,
        Err(error) => {
            debug!(%error, "skipping Java search source");
            Vec::new()
        }
    }
}

impl SearchSource {
    fn expand(&self, context: &SearchContext) -> Vec<PathBuf> {
        match *self {
            SearchSource::Registry(key) => or_skip(registry::query_java_homes(key)),
            SearchSource::Homes {
                roots,
                vendors,
                suffix,
                nested_jre,
            } => {
                let mut homes = Vec::new();
                let scan_dirs = roots
                    .iter()
                    .filter_map(|root| context.resolve(*root))
                    .flat_map(|root| {
                        if vendors.is_empty() {
                            vec![root]
                        } else {
                            vendors.iter().map(|vendor| root.join(vendor)).collect()
                        }
                    });
                for dir in scan_dirs {
                    for entry in or_skip(list_directories(&dir)) {
                        let Some(suffix) = suffix else {
                            homes.push(entry);
                            continue;
                        };
                        let home = join_relative(&entry, suffix);
                        if home.exists() {
                            homes.push(home.clone());
                        }
                        let jre = home.join("jre");
                        if nested_jre && jre.exists() {
                            homes.push(jre);
                        }
                    }
                }
                homes
            }
            SearchSource::GameRuntimes(root) => {
                let Some(root) = context.resolve(root) else {
                    return Vec::new();
                };
                let mut homes = Vec::new();
                for component in or_skip(list_directories(&root)) {
                    let Some(name) = component.file_name().map(|name| name.to_os_string()) else {
                        continue;
                    };
                    for platform in or_skip(list_directories(&component)) {
                        homes.push(platform.join(&name));
                    }
                }
                homes
            }
            SearchSource::Direct(root) => context.resolve(root).into_iter().collect(),
        }
    }
}

/// Enumerates and validates Java runtimes on this machine.
pub struct JavaDiscovery {
    probe: Arc<dyn JavaProbe>,
    search: PlatformSearch,
    /// Fixed context for tests; `None` reads the live environment on every search.
    context: Option<SearchContext>,
}

impl JavaDiscovery {
    pub fn new(probe: Arc<dyn JavaProbe>) -> Self {
        Self {
            probe,
            search: PlatformSearch::current(),
            context: None,
        }
    }

    pub fn with_context(
        probe: Arc<dyn JavaProbe>,
        search: PlatformSearch,
        context: SearchContext,
    ) -> Self {
        Self {
            probe,
            search,
            context: Some(context),
        }
    }

    pub fn probe(&self) -> &dyn JavaProbe {
        self.probe.as_ref()
    }

    /// Raw candidate paths (homes or executables), in priority order: system
    /// locations, game launcher caches, `PATH`, then `JAVA_HOME`.
    pub fn candidates(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let context = Arc::new(self.context.clone().unwrap_or_else(SearchContext::from_env));
        let java = self.search.os.java_bin_name();

        let system = {
            let context = Arc::clone(&context);
            self.search
                .sources
                .iter()
                .flat_map(move |source| source.expand(&context))
        };
        let path = {
            let context = Arc::clone(&context);
            std::iter::once_with(move || path_candidates(&context, java)).flatten()
        };
        let current = std::iter::once_with(move || {
            context
                .var("JAVA_HOME")
                .filter(|home| !home.is_empty())
                .map(PathBuf::from)
        })
        .flatten();

        system.chain(path).chain(current)
    }

    /// Candidates that pass the probe. Rejected ones are only traced.
    pub fn discover(&self) -> impl Iterator<Item = JavaRuntime> + '_ {
        self.candidates().filter_map(move |candidate| {
            trace!(path = %candidate.display(), "query Java candidate");
            match self.probe.probe(&candidate) {
                Ok(runtime) => Some(runtime),
                Err(error) => {
                    trace!(%error, "dropping Java candidate");
                    None
                }
            }
        })
    }
}

impl Default for JavaDiscovery {
    fn default() -> Self {
        Self::new(Arc::new(CommandProbe))
    }
}

fn path_candidates(context: &SearchContext, java: &str) -> Vec<PathBuf> {
    let Some(path) = context.var("PATH") else {
        return Vec::new();
    };
    std::env::split_paths(path)
        .filter(|dir| dir.file_name().is_some_and(|name| name == "bin"))
        .map(|bin| bin.join(java))
        .collect()
}
