//! Form synthesis: parameter specs to input-widget specs.
//!
//! The presentation layer renders the widgets; this module only defines the
//! mapping, the default population and the text-to-value binding.

use serde::Serialize;
use serde_json::Value;

use crate::{
    command::{ExecMode, ParamKind, ParameterSpec, SharedDescriptor, TypeTag},
    execution::{coerce, ExecutionRequest, ValidationError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Widget {
    Toggle,
    IntegerField,
    FloatField,
    TextField,
    /// Untyped parameter: free text handed over unconverted.
    FreeForm,
}

impl Widget {
    pub fn for_type(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Boolean => Widget::Toggle,
            TypeTag::Integer => Widget::IntegerField,
            TypeTag::Float => Widget::FloatField,
            TypeTag::String => Widget::TextField,
            TypeTag::Untyped => Widget::FreeForm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub widget: Widget,
    pub type_tag: TypeTag,
    pub required: bool,
    pub keyword_only: bool,
    /// Pre-filled text, from the parameter default.
    pub default_text: Option<String>,
    pub placeholder: String,
    #[serde(skip)]
    spec: ParameterSpec,
}

impl FieldSpec {
    pub fn from_param(spec: &ParameterSpec) -> Self {
        let widget = Widget::for_type(spec.type_tag);
        let default_text = match (&spec.default, widget) {
            (Some(value), _) => Some(render_default(value)),
            (None, Widget::Toggle) => Some("false".to_string()),
            (None, _) => None,
        };
        Self {
            name: spec.name.clone(),
            widget,
            type_tag: spec.type_tag,
            required: spec.is_required(),
            keyword_only: spec.kind == ParamKind::KeywordOnly,
            default_text,
            placeholder: spec.type_tag.to_string(),
            spec: spec.clone(),
        }
    }

    /// Parses the operator's text for this field.
    ///
    /// `Ok(None)` means "leave it to the parameter default". Blank text counts
    /// as untouched. A toggle always has a state, so an untouched required
    /// toggle binds to `false`.
    pub fn parse(&self, text: &str) -> Result<Option<Value>, ValidationError> {
        if text.trim().is_empty() {
            return match (self.required, self.widget) {
                (false, _) => Ok(None),
                (true, Widget::Toggle) => Ok(Some(Value::Bool(false))),
                (true, _) => Err(ValidationError::Missing(self.name.clone())),
            };
        }
        coerce(&self.spec, &Value::String(text.to_string())).map(Some)
    }
}

fn render_default(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Everything needed to render the input form of one command.
#[derive(Debug, Clone, Serialize)]
pub struct FormSpec {
    pub command: String,
    pub title: String,
    pub description: String,
    pub mode: ExecMode,
    pub fields: Vec<FieldSpec>,
    /// Declared prompt captions, to pre-provision reply dialogs.
    pub prompts: Vec<String>,
    #[serde(skip)]
    descriptor: SharedDescriptor,
}

impl FormSpec {
    pub fn new(descriptor: &SharedDescriptor) -> Self {
        Self {
            command: descriptor.qualified_name().to_string(),
            title: descriptor.name().replace('_', " "),
            description: descriptor.description().to_string(),
            mode: descriptor.mode(),
            fields: descriptor.params().iter().map(FieldSpec::from_param).collect(),
            prompts: descriptor.input_request().to_vec(),
            descriptor: descriptor.clone(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Binds raw field text into a request. Fields without an entry behave
    /// like untouched widgets.
    pub fn bind<'a, I>(&self, inputs: I) -> Result<ExecutionRequest, ValidationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut texts: Vec<(&str, &str)> = Vec::new();
        for (name, text) in inputs {
            if self.field(name).is_none() {
                return Err(ValidationError::Unknown(name.to_string()));
            }
            texts.push((name, text));
        }

        let mut request = ExecutionRequest::new(self.descriptor.clone());
        for field in &self.fields {
            let text = texts
                .iter()
                .rev()
                .find(|(name, _)| *name == field.name)
                .map(|(_, text)| *text)
                .unwrap_or("");
            if let Some(value) = field.parse(text)? {
                request.set(field.name.clone(), value);
            }
        }
        Ok(request)
    }
}
