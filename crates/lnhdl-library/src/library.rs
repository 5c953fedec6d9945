//! Name/id directory for modules with a text-file backing store
//!
//! Ids are unique per registry path and kept dense by recycling freed ids.
//! Registries never link across paths; the manager hands out at most one
//! registry per path.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default backing-store file name under the registry path
pub const LIBRARY_FILE: &str = "graph_library";

pub type Result<T> = std::result::Result<T, LibraryError>;

/// Errors from registry operations
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed library record at {path}:{line}: {text}")]
    Parse {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("module '{0}' not found in registry")]
    UnknownModule(String),

    #[error("module '{0}' already exists in registry")]
    DuplicateModule(String),
}

/// Stable module id; 0 is invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl ModuleId {
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Port direction in a submodule signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// One flattened port in a submodule signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPort {
    pub name: String,
    pub bits: u32,
    pub direction: PortDirection,
    pub signed: bool,
}

/// Port/parameter record of one defined module, in declaration order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubNode {
    pub name: String,
    pub source: String,
    ports: Vec<SubPort>,
    parameters: IndexMap<String, String>,
}

impl SubNode {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            ports: Vec::new(),
            parameters: IndexMap::new(),
        }
    }

    pub fn add_input_pin(&mut self, name: &str, bits: u32, signed: bool) {
        self.ports.push(SubPort {
            name: name.to_string(),
            bits,
            direction: PortDirection::Input,
            signed,
        });
    }

    pub fn add_output_pin(&mut self, name: &str, bits: u32, signed: bool) {
        self.ports.push(SubPort {
            name: name.to_string(),
            bits,
            direction: PortDirection::Output,
            signed,
        });
    }

    /// External-module parameters keep declaration order
    pub fn add_parameter(&mut self, name: &str, value: &str) {
        self.parameters.insert(name.to_string(), value.to_string());
    }

    pub fn ports(&self) -> &[SubPort] {
        &self.ports
    }

    pub fn parameters(&self) -> &IndexMap<String, String> {
        &self.parameters
    }

    pub fn port_direction(&self, name: &str) -> Option<PortDirection> {
        self.ports
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.direction)
    }
}

/// Per-module attributes, keyed by a non-zero module id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphAttributes {
    pub name: String,
    /// Sequence order in which the module was last modified
    pub version: u32,
    /// Active registrations against this module
    pub open_count: u32,
}

impl GraphAttributes {
    fn invalid() -> Self {
        Self {
            name: "INVALID".to_string(),
            version: 0,
            open_count: 0,
        }
    }
}

/// One on-disk module registry
#[derive(Debug)]
pub struct GraphLibrary {
    path: PathBuf,
    max_version: u32,
    name2id: HashMap<String, ModuleId>,
    // Slot 0 stays invalid so ids index directly
    attributes: Vec<GraphAttributes>,
    recycled_ids: Vec<ModuleId>,
    subs: IndexMap<String, SubNode>,
    clean: bool,
}

impl GraphLibrary {
    /// Open (and reload, if its backing file exists) the registry at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut library = Self {
            path,
            max_version: 0,
            name2id: HashMap::new(),
            attributes: vec![GraphAttributes::invalid()],
            recycled_ids: Vec::new(),
            subs: IndexMap::new(),
            clean: true,
        };
        library.reload()?;
        Ok(library)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register `name`, returning its stable id; existing names keep theirs.
    /// Freed ids are reused so ids stay dense.
    pub fn add_name(&mut self, name: &str) -> ModuleId {
        if let Some(&id) = self.name2id.get(name) {
            return id;
        }
        let id = match self.recycled_ids.pop() {
            Some(id) => {
                self.attributes[id.0 as usize] = GraphAttributes {
                    name: name.to_string(),
                    version: 0,
                    open_count: 0,
                };
                id
            }
            None => {
                let id = ModuleId(self.attributes.len() as u32);
                self.attributes.push(GraphAttributes {
                    name: name.to_string(),
                    version: 0,
                    open_count: 0,
                });
                id
            }
        };
        self.name2id.insert(name.to_string(), id);
        self.clean = false;
        id
    }

    /// Id of `name`, if registered
    pub fn get_id(&self, name: &str) -> Option<ModuleId> {
        self.name2id.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name2id.contains_key(name)
    }

    /// Name stored under `id`
    ///
    /// # Panics
    /// Panics on an invalid or out-of-range id.
    pub fn get_name(&self, id: ModuleId) -> &str {
        assert!(id.is_valid(), "module id 0 is invalid");
        &self.attributes[id.0 as usize].name
    }

    pub fn module_count(&self) -> usize {
        self.name2id.len()
    }

    /// Mark `id` modified, bumping its version from the monotonic counter
    pub fn update(&mut self, id: ModuleId) {
        self.max_version += 1;
        self.attributes[id.0 as usize].version = self.max_version;
        self.clean = false;
    }

    /// Version of `id`; 0 for an unknown or out-of-range id
    pub fn get_version(&self, id: ModuleId) -> u32 {
        if !id.is_valid() || id.0 as usize >= self.attributes.len() {
            return 0;
        }
        self.attributes[id.0 as usize].version
    }

    pub fn get_max_version(&self) -> u32 {
        self.max_version
    }

    /// Visit every registered module in id order
    pub fn each_module(&self, mut f: impl FnMut(&str, ModuleId)) {
        let mut ids: Vec<_> = self.name2id.values().copied().collect();
        ids.sort();
        for id in ids {
            f(&self.attributes[id.0 as usize].name, id);
        }
    }

    /// Rename a module, keeping its id
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if self.name2id.contains_key(new) {
            return Err(LibraryError::DuplicateModule(new.to_string()));
        }
        let id = self
            .name2id
            .remove(old)
            .ok_or_else(|| LibraryError::UnknownModule(old.to_string()))?;
        self.attributes[id.0 as usize].name = new.to_string();
        self.name2id.insert(new.to_string(), id);
        if let Some(sub) = self.subs.shift_remove(old) {
            self.subs.insert(new.to_string(), SubNode { name: new.to_string(), ..sub });
        }
        self.clean = false;
        Ok(())
    }

    /// Drop a module entirely, recycling its id
    pub fn expunge(&mut self, name: &str) -> bool {
        let Some(id) = self.name2id.remove(name) else {
            return false;
        };
        self.attributes[id.0 as usize] = GraphAttributes::invalid();
        self.recycled_ids.push(id);
        self.subs.shift_remove(name);
        self.clean = false;
        true
    }

    /// Track an active use of `name`, registering it if needed
    pub fn register(&mut self, name: &str) -> ModuleId {
        let id = self.add_name(name);
        self.attributes[id.0 as usize].open_count += 1;
        id
    }

    /// Release one active use; false if the module was unknown
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(&id) = self.name2id.get(name) else {
            return false;
        };
        let attrs = &mut self.attributes[id.0 as usize];
        attrs.open_count = attrs.open_count.saturating_sub(1);
        true
    }

    /// Atomically clear and re-open the port/parameter record of `name`
    pub fn reset_sub(&mut self, name: &str, source: &str) -> &mut SubNode {
        self.add_name(name);
        self.clean = false;
        self.subs.insert(name.to_string(), SubNode::new(name, source));
        self.subs.get_mut(name).expect("just inserted")
    }

    pub fn get_sub(&self, name: &str) -> Option<&SubNode> {
        self.subs.get(name)
    }

    /// Durability barrier: atomically rewrite the backing store
    pub fn sync(&mut self) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        let mut out = String::new();
        let mut ids: Vec<_> = self.name2id.values().copied().collect();
        ids.sort();
        for id in ids {
            let attrs = &self.attributes[id.0 as usize];
            out.push_str(&format!("{} {} {}\n", id, attrs.name, attrs.version));
        }
        let final_path = self.path.join(LIBRARY_FILE);
        let tmp_path = self.path.join(format!("{LIBRARY_FILE}.tmp"));
        fs::write(&tmp_path, out)?;
        fs::rename(&tmp_path, &final_path)?;
        self.clean = true;
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let file = self.path.join(LIBRARY_FILE);
        if !file.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&file)?;
        let mut max_id = 0u32;
        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let parse_err = || LibraryError::Parse {
                path: file.clone(),
                line: lineno + 1,
                text: line.to_string(),
            };
            let id: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(parse_err)?;
            let name = parts.next().ok_or_else(parse_err)?.to_string();
            let version: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(parse_err)?;
            max_id = max_id.max(id);
            records.push((id, name, version));
        }

        self.attributes = vec![GraphAttributes::invalid(); max_id as usize + 1];
        for (id, name, version) in records {
            self.attributes[id as usize] = GraphAttributes {
                name: name.clone(),
                version,
                open_count: 0,
            };
            self.name2id.insert(name, ModuleId(id));
            self.max_version = self.max_version.max(version);
        }
        // Gaps in the id space come back as recycled ids
        for id in 1..=max_id {
            if self.attributes[id as usize].name == "INVALID" {
                self.recycled_ids.push(ModuleId(id));
            }
        }
        Ok(())
    }
}

impl Drop for GraphLibrary {
    fn drop(&mut self) {
        if !self.clean {
            if let Err(e) = self.sync() {
                warn!(path = %self.path.display(), error = %e, "failed to flush module registry");
            }
        }
    }
}

/// Owner of all registries in the process, keyed by filesystem path
///
/// Replaces a per-path global singleton: lifetime is explicit, tests get a
/// fresh manager each. Modules never link across paths.
#[derive(Debug, Default)]
pub struct LibraryManager {
    libraries: HashMap<PathBuf, GraphLibrary>,
}

impl LibraryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for `path`, opening it on first use
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<&mut GraphLibrary> {
        let path = path.as_ref().to_path_buf();
        if !self.libraries.contains_key(&path) {
            let library = GraphLibrary::open(&path)?;
            self.libraries.insert(path.clone(), library);
        }
        Ok(self.libraries.get_mut(&path).expect("just inserted"))
    }

    /// Flush every open registry
    pub fn sync_all(&mut self) -> Result<()> {
        for library in self.libraries.values_mut() {
            library.sync()?;
        }
        Ok(())
    }
}
