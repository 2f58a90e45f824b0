//! Command metadata: parameter specs, execution modes and the descriptor record.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod module;

pub use module::{
    Body, CallContext, Callable, DeclaredKind, DeclaredParam, ExecUi, FunctionDef, Module,
    ModuleTree,
};

/// Type tag derived from a parameter's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Boolean,
    Integer,
    Float,
    String,
    Untyped,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Boolean => "boolean",
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::String => "string",
            TypeTag::Untyped => "untyped",
        }
    }

    /// Whether a JSON value already has the shape this tag expects.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            TypeTag::Boolean => value.is_boolean(),
            TypeTag::Integer => value.is_i64() || value.is_u64(),
            TypeTag::Float => value.is_number(),
            TypeTag::String => value.is_string(),
            TypeTag::Untyped => true,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    PositionalOrKeyword,
    KeywordOnly,
}

/// One inspected parameter of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub type_tag: TypeTag,
    /// `None` means the parameter is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub kind: ParamKind,
}

impl ParameterSpec {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Which backend runs a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    InProcess,
    GraphicalSubapp,
    InterpreterSession,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecMode::InProcess => "in-process",
            ExecMode::GraphicalSubapp => "graphical-subapp",
            ExecMode::InterpreterSession => "interpreter-session",
        };
        f.write_str(s)
    }
}

/// Immutable metadata for one registered command.
///
/// Built by the registry at scan time and shared behind an `Arc`; a re-scan
/// replaces descriptors wholesale instead of mutating them.
#[derive(Clone)]
pub struct CommandDescriptor {
    qualified_name: String,
    module_path: String,
    name: String,
    description: String,
    doc: String,
    params: Vec<ParameterSpec>,
    mode: ExecMode,
    input_request: Vec<String>,
    body: Body,
}

impl CommandDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        module_path: &str,
        name: &str,
        description: String,
        doc: String,
        params: Vec<ParameterSpec>,
        mode: ExecMode,
        input_request: Vec<String>,
        body: Body,
    ) -> Self {
        Self {
            qualified_name: qualify(module_path, name),
            module_path: module_path.to_string(),
            name: name.to_string(),
            description,
            doc,
            params,
            mode,
            input_request,
            body,
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn params(&self) -> &[ParameterSpec] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Prompt captions declared up front. A sizing hint for reply dialogs;
    /// the command may ask more or fewer times at run time.
    pub fn input_request(&self) -> &[String] {
        &self.input_request
    }

    pub fn body(&self) -> &Body {
        &self.body
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("qualified_name", &self.qualified_name)
            .field("mode", &self.mode)
            .field("params", &self.params)
            .field("input_request", &self.input_request)
            .finish_non_exhaustive()
    }
}

pub type SharedDescriptor = Arc<CommandDescriptor>;

pub fn qualify(module_path: &str, name: &str) -> String {
    if module_path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", module_path, name)
    }
}
