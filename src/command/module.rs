//! Module tree: the host program's declaration of annotated functions.
//!
//! Rust has no runtime reflection over a module tree, so the host declares
//! modules by dotted path and lists function definitions in declaration
//! order. The registry scans this tree the way a loader would scan packages.

use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

use serde_json::Value;

use crate::{bridge::Console, execution::BoundArgs, execution::Response};

/// Native function body. Errors are the function's "raised condition".
pub type Callable =
    Arc<dyn Fn(&mut CallContext<'_>) -> anyhow::Result<Response> + Send + Sync + 'static>;

/// Everything a native command sees while it runs.
pub struct CallContext<'a> {
    pub args: &'a BoundArgs,
    pub console: &'a mut Console,
    toolkit: Option<&'a mut (dyn Any + Send)>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        args: &'a BoundArgs,
        console: &'a mut Console,
        toolkit: Option<&'a mut (dyn Any + Send)>,
    ) -> Self {
        Self { args, console, toolkit }
    }

    /// The shared graphical toolkit state, only present for graphical-subapp
    /// commands. `None` as well when the state is not a `T`.
    pub fn toolkit<T: 'static>(&mut self) -> Option<&mut T> {
        self.toolkit.as_deref_mut()?.downcast_mut::<T>()
    }

    pub fn has_toolkit(&self) -> bool {
        self.toolkit.is_some()
    }
}

#[derive(Clone)]
pub enum Body {
    /// Runs on a worker thread of this process.
    Native(Callable),
    /// Source text sent to an interpreter session.
    Remote(String),
}

impl Body {
    pub fn is_remote(&self) -> bool {
        matches!(self, Body::Remote(_))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Native(_) => f.write_str("Native(..)"),
            Body::Remote(src) => f.debug_tuple("Remote").field(&src.len()).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredKind {
    PositionalOrKeyword,
    KeywordOnly,
    VarPositional,
    VarKeyword,
}

/// A parameter as written in the function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredParam {
    pub name: String,
    pub type_name: Option<String>,
    pub default: Option<Value>,
    pub kind: DeclaredKind,
}

impl DeclaredParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            default: None,
            kind: DeclaredKind::PositionalOrKeyword,
        }
    }

    pub fn typed(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::new(name)
        }
    }

    pub fn var_positional(name: impl Into<String>) -> Self {
        Self {
            kind: DeclaredKind::VarPositional,
            ..Self::new(name)
        }
    }

    pub fn var_keyword(name: impl Into<String>) -> Self {
        Self {
            kind: DeclaredKind::VarKeyword,
            ..Self::new(name)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn keyword_only(mut self) -> Self {
        self.kind = DeclaredKind::KeywordOnly;
        self
    }
}

/// The command annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecUi {
    pub description: Option<String>,
    pub use_gui_app: bool,
    pub use_kernel: bool,
    pub input_request: Vec<String>,
}

impl ExecUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn use_gui_app(mut self) -> Self {
        self.use_gui_app = true;
        self
    }

    pub fn use_kernel(mut self) -> Self {
        self.use_kernel = true;
        self
    }

    pub fn input_request<I, S>(mut self, captions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_request = captions.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    name: String,
    params: Vec<DeclaredParam>,
    doc: String,
    annotation: Option<ExecUi>,
    body: Body,
}

impl FunctionDef {
    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> anyhow::Result<Response> + Send + Sync + 'static,
    {
        Self::with_body(name, Body::Native(Arc::new(f)))
    }

    pub fn remote(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::with_body(name, Body::Remote(source.into()))
    }

    fn with_body(name: impl Into<String>, body: Body) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            doc: String::new(),
            annotation: None,
            body,
        }
    }

    pub fn param(mut self, param: DeclaredParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn doc(mut self, text: impl Into<String>) -> Self {
        self.doc = text.into();
        self
    }

    pub fn exec_ui(mut self, annotation: ExecUi) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[DeclaredParam] {
        &self.params
    }

    pub fn doc_text(&self) -> &str {
        &self.doc
    }

    pub fn annotation(&self) -> Option<&ExecUi> {
        self.annotation.as_ref()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    path: String,
    functions: Vec<FunctionDef>,
}

impl Module {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            functions: Vec::new(),
        }
    }

    pub fn function(mut self, def: FunctionDef) -> Self {
        self.functions.push(def);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn functions(&self) -> &[FunctionDef] {
        &self.functions
    }
}

/// Modules keyed by dotted path, iterated in lexical path order.
#[derive(Debug, Clone, Default)]
pub struct ModuleTree {
    modules: BTreeMap<String, Module>,
}

impl ModuleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. Declaring the same path twice appends the functions of
    /// the second declaration after the first.
    pub fn insert(&mut self, module: Module) {
        match self.modules.get_mut(&module.path) {
            Some(existing) => existing.functions.extend(module.functions),
            None => {
                self.modules.insert(module.path.clone(), module);
            }
        }
    }

    pub fn with(mut self, module: Module) -> Self {
        self.insert(module);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules at `root` or nested below it. An empty root walks everything.
    pub fn walk<'a>(&'a self, root: &'a str) -> impl Iterator<Item = &'a Module> + 'a {
        self.modules
            .iter()
            .filter(move |(path, _)| is_within(path, root))
            .map(|(_, module)| module)
    }
}

fn is_within(path: &str, root: &str) -> bool {
    if root.is_empty() || path == root {
        return true;
    }
    path.strip_prefix(root)
        .map(|rest| rest.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_includes_nested_modules_only() {
        let tree = ModuleTree::new()
            .with(Module::new("camtest.contingency"))
            .with(Module::new("camtest.contingency.power"))
            .with(Module::new("camtest.contingency_old"))
            .with(Module::new("camtest.other"));

        let paths: Vec<&str> = tree.walk("camtest.contingency").map(|m| m.path()).collect();
        assert_eq!(paths, vec!["camtest.contingency", "camtest.contingency.power"]);
        assert_eq!(tree.walk("").count(), 4);
    }
}
