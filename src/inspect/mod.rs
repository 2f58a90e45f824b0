//! Signature inspection: declared parameters to parameter specs.

use std::collections::HashSet;

use crate::{
    command::{DeclaredKind, FunctionDef, ParamKind, ParameterSpec, TypeTag},
    registry::RegistrationError,
};

/// Inspector output for one function.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub params: Vec<ParameterSpec>,
    pub description: String,
}

/// Derives the ordered parameter specs and the description of `def`.
///
/// The description is the first paragraph of the documentation text.
/// Variadic collectors cannot be turned into a finite form and are rejected.
pub fn inspect(module_path: &str, def: &FunctionDef) -> Result<Inspection, RegistrationError> {
    let qualified = crate::command::qualify(module_path, def.name());
    let mut seen = HashSet::new();
    let mut params = Vec::with_capacity(def.params().len());

    for declared in def.params() {
        let kind = match declared.kind {
            DeclaredKind::PositionalOrKeyword => ParamKind::PositionalOrKeyword,
            DeclaredKind::KeywordOnly => ParamKind::KeywordOnly,
            DeclaredKind::VarPositional | DeclaredKind::VarKeyword => {
                return Err(RegistrationError::UnsupportedSignature {
                    name: qualified,
                    reason: format!("variadic parameter `{}` has no finite form", declared.name),
                });
            }
        };
        if !seen.insert(declared.name.as_str()) {
            return Err(RegistrationError::UnsupportedSignature {
                name: qualified,
                reason: format!("parameter `{}` is declared twice", declared.name),
            });
        }

        let type_tag = declared
            .type_name
            .as_deref()
            .map(type_tag_for)
            .unwrap_or(TypeTag::Untyped);

        if let Some(default) = &declared.default {
            if !default.is_null() && !type_tag.accepts(default) {
                return Err(RegistrationError::UnsupportedSignature {
                    name: qualified,
                    reason: format!(
                        "default {} of `{}` is not a {}",
                        default, declared.name, type_tag
                    ),
                });
            }
        }

        params.push(ParameterSpec {
            name: declared.name.clone(),
            type_tag,
            default: declared.default.clone(),
            kind,
        });
    }

    Ok(Inspection {
        params,
        description: first_paragraph(def.doc_text()),
    })
}

/// Maps a declared type name to a tag; unknown names are untyped.
pub fn type_tag_for(type_name: &str) -> TypeTag {
    match type_name.trim() {
        "bool" => TypeTag::Boolean,
        "int" | "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64"
        | "usize" => TypeTag::Integer,
        "float" | "f32" | "f64" => TypeTag::Float,
        "str" | "&str" | "String" => TypeTag::String,
        _ => TypeTag::Untyped,
    }
}

fn first_paragraph(doc: &str) -> String {
    doc.lines()
        .map(str::trim)
        .skip_while(|line| line.is_empty())
        .take_while(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DeclaredParam;
    use crate::execution::Response;

    fn noop(name: &str) -> FunctionDef {
        FunctionDef::native(name, |_| Ok(Response::none()))
    }

    #[test]
    fn keyword_only_without_default_is_required() {
        let def = noop("func_with_only_kwargs")
            .param(DeclaredParam::typed("a", "str").keyword_only())
            .param(DeclaredParam::typed("b", "int").with_default(42).keyword_only())
            .param(DeclaredParam::new("c").keyword_only());
        let got = inspect("tests", &def).unwrap();
        let tags: Vec<_> = got.params.iter().map(|p| p.type_tag).collect();
        assert_eq!(tags, vec![TypeTag::String, TypeTag::Integer, TypeTag::Untyped]);
        assert!(got.params[0].is_required());
        assert!(!got.params[1].is_required());
        assert!(got.params[2].is_required());
        assert!(got.params.iter().all(|p| p.kind == ParamKind::KeywordOnly));
    }

    #[test]
    fn variadics_are_rejected() {
        let def = noop("splat").param(DeclaredParam::var_positional("args"));
        assert!(matches!(
            inspect("tests", &def),
            Err(RegistrationError::UnsupportedSignature { .. })
        ));
    }

    #[test]
    fn description_is_first_paragraph() {
        let def = noop("f").doc("\n    Create a simple plot\n    and return fig.\n\n    More text.\n");
        assert_eq!(inspect("m", &def).unwrap().description, "Create a simple plot and return fig.");
    }
}
