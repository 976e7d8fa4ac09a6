//! Path model: one namespace, two domains.
//!
//! A leading `:` marks a device path (`:/lib/code.py`); everything else is
//! local. Each domain has its own working directory, carried in an explicit
//! [`Context`] rather than process globals. Resolution is a pure string
//! algorithm - it never touches the disk or the device.

use std::fmt;

/// Marker prefix for device paths.
pub const REMOTE_MARKER: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Local,
    Remote,
}

/// A normalized absolute path within one domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathRef {
    pub domain: Domain,
    path: String,
}

impl PathRef {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            domain: Domain::Local,
            path: normalize(&path.into()),
        }
    }

    pub fn remote(path: impl Into<String>) -> Self {
        Self {
            domain: Domain::Remote,
            path: normalize(&path.into()),
        }
    }

    /// The absolute path within its domain (no marker).
    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_remote(&self) -> bool {
        self.domain == Domain::Remote
    }

    /// Child path with the same domain.
    pub fn join(&self, name: &str) -> PathRef {
        let joined = if self.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.path)
        };
        PathRef {
            domain: self.domain,
            path: normalize(&joined),
        }
    }

    /// Final component, or "/" for the root.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("/")
    }
}

impl fmt::Display for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.domain {
            Domain::Local => write!(f, "{}", self.path),
            Domain::Remote => write!(f, "{}{}", REMOTE_MARKER, self.path),
        }
    }
}

/// Working directories for both domains. Process-wide state scoped to one
/// shell invocation; mutated only by an explicit change-directory.
#[derive(Debug, Clone)]
pub struct Context {
    pub local_cwd: String,
    pub remote_cwd: String,
}

impl Context {
    /// Local cwd from the invoking shell, remote cwd at the device root.
    pub fn new() -> Self {
        let local_cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/".to_string());
        Self {
            local_cwd,
            remote_cwd: "/".to_string(),
        }
    }

    /// Classify and resolve `raw` into an absolute path in its domain.
    /// Pure: relative components are folded without any I/O.
    pub fn resolve(&self, raw: &str) -> PathRef {
        if let Some(rest) = raw.strip_prefix(REMOTE_MARKER) {
            let abs = if rest.starts_with('/') {
                rest.to_string()
            } else if rest.is_empty() {
                self.remote_cwd.clone()
            } else {
                format!("{}/{}", self.remote_cwd, rest)
            };
            return PathRef::remote(abs);
        }

        let expanded = expand_tilde(raw);
        let abs = if expanded.starts_with('/') {
            expanded
        } else if expanded.is_empty() {
            self.local_cwd.clone()
        } else {
            format!("{}/{}", self.local_cwd, expanded)
        };
        PathRef::local(abs)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand `~` and `~/...` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if path == "~" {
        return dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.to_string_lossy(), rest);
        }
    }
    path.to_string()
}

/// Fold `.`, `..`, empty components and trailing slashes out of an absolute
/// path. `..` never climbs above the root.
pub fn normalize(path: &str) -> String {
    let mut comps: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                comps.pop();
            }
            other => comps.push(other),
        }
    }
    if comps.is_empty() {
        "/".to_string()
    } else {
        let mut out = String::new();
        for comp in comps {
            out.push('/');
            out.push_str(comp);
        }
        out
    }
}
