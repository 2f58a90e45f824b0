//! Command registry: scans a module tree and publishes the command catalog.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    command::{
        qualify, Body, CommandDescriptor, ExecMode, ExecUi, FunctionDef, ModuleTree,
        SharedDescriptor,
    },
    inspect::inspect,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("{name}: malformed annotation: {reason}")]
    MalformedAnnotation { name: String, reason: String },
    #[error("{0}: already registered")]
    Duplicate(String),
    #[error("{name}: unsupported signature: {reason}")]
    UnsupportedSignature { name: String, reason: String },
}

impl RegistrationError {
    pub fn command(&self) -> &str {
        match self {
            RegistrationError::MalformedAnnotation { name, .. }
            | RegistrationError::UnsupportedSignature { name, .. }
            | RegistrationError::Duplicate(name) => name,
        }
    }
}

/// An immutable, ordered set of commands keyed by qualified name.
#[derive(Debug, Default)]
pub struct Catalog {
    root: String,
    generation: u64,
    commands: IndexMap<String, SharedDescriptor>,
}

impl Catalog {
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Incremented on every published scan.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, qualified_name: &str) -> Option<&SharedDescriptor> {
        self.commands.get(qualified_name)
    }

    /// Looks up by qualified name, then by bare function name when that is
    /// unambiguous.
    pub fn find(&self, name: &str) -> Option<&SharedDescriptor> {
        if let Some(found) = self.get(name) {
            return Some(found);
        }
        let mut matches = self.commands.values().filter(|d| d.name() == name);
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedDescriptor> {
        self.commands.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug)]
pub struct ScanReport {
    pub catalog: Arc<Catalog>,
    pub errors: Vec<RegistrationError>,
}

/// Holds the published catalog. Readers take `Arc` snapshots; a scan builds
/// a complete new catalog and swaps it in.
#[derive(Debug, Default)]
pub struct Registry {
    current: RwLock<Arc<Catalog>>,
    generation: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `path` in `tree` and publishes the result, replacing the
    /// previous catalog.
    pub fn scan(&self, tree: &ModuleTree, path: &str) -> ScanReport {
        let (mut catalog, errors) = build_catalog(tree, path);
        // Numbered under the write lock so publication order and
        // generation order agree.
        let catalog = {
            let mut current = self.current.write();
            catalog.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let catalog = Arc::new(catalog);
            *current = catalog.clone();
            catalog
        };
        let generation = catalog.generation;
        info!(
            root = path,
            generation,
            commands = catalog.len(),
            errors = errors.len(),
            "command catalog published"
        );
        ScanReport { catalog, errors }
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.current.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<SharedDescriptor> {
        self.catalog().find(name).cloned()
    }
}

/// The pure scan step: modules in path order, functions in declaration
/// order. A broken function is reported and skipped; the scan goes on.
pub fn build_catalog(tree: &ModuleTree, path: &str) -> (Catalog, Vec<RegistrationError>) {
    let mut commands: IndexMap<String, SharedDescriptor> = IndexMap::new();
    let mut errors = Vec::new();
    let mut visited = 0usize;

    for module in tree.walk(path) {
        visited += 1;
        for def in module.functions() {
            let Some(annotation) = def.annotation() else {
                continue;
            };
            let qualified = qualify(module.path(), def.name());
            if commands.contains_key(&qualified) {
                warn!(command = %qualified, "duplicate command name");
                errors.push(RegistrationError::Duplicate(qualified));
                continue;
            }
            match describe(module.path(), def, annotation) {
                Ok(descriptor) => {
                    debug!(command = %qualified, mode = %descriptor.mode(), "registered");
                    commands.insert(qualified, Arc::new(descriptor));
                }
                Err(err) => {
                    warn!(error = %err, "command skipped");
                    errors.push(err);
                }
            }
        }
    }

    if visited == 0 {
        warn!(root = path, "no modules found under module path");
    }

    let catalog = Catalog {
        root: path.to_string(),
        generation: 0,
        commands,
    };
    (catalog, errors)
}

fn describe(
    module_path: &str,
    def: &FunctionDef,
    annotation: &ExecUi,
) -> Result<CommandDescriptor, RegistrationError> {
    let qualified = qualify(module_path, def.name());
    let malformed = |reason: &str| RegistrationError::MalformedAnnotation {
        name: qualified.clone(),
        reason: reason.to_string(),
    };

    let mode = match (annotation.use_gui_app, annotation.use_kernel) {
        (true, true) => return Err(malformed("use_gui_app and use_kernel are mutually exclusive")),
        (true, false) => ExecMode::GraphicalSubapp,
        (false, true) => ExecMode::InterpreterSession,
        (false, false) => ExecMode::InProcess,
    };
    match (mode, def.body()) {
        (ExecMode::InterpreterSession, Body::Native(_)) => {
            return Err(malformed("use_kernel needs source text for the interpreter"))
        }
        (ExecMode::InProcess | ExecMode::GraphicalSubapp, Body::Remote(_)) => {
            return Err(malformed("remote source can only run with use_kernel"))
        }
        _ => {}
    }

    let inspection = inspect(module_path, def)?;
    let description = annotation
        .description
        .clone()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(inspection.description);

    Ok(CommandDescriptor::new(
        module_path,
        def.name(),
        description,
        def.doc_text().to_string(),
        inspection.params,
        mode,
        annotation.input_request.clone(),
        def.body().clone(),
    ))
}
