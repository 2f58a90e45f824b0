use anyhow::Result;
use serde_json::json;

use gui_executor::{
    builtin,
    command::{ExecMode, SharedDescriptor},
    execution::ValidationError,
    form::{FormSpec, Widget},
    registry::Registry,
};

fn demo(name: &str) -> SharedDescriptor {
    Registry::new()
        .scan(&builtin::tree(), builtin::ROOT)
        .catalog
        .find(name)
        .cloned()
        .expect("demo command")
}

#[test]
fn widgets_follow_parameter_types() {
    let form = FormSpec::new(&demo("simple_plot"));

    assert_eq!(form.title, "simple plot");
    assert_eq!(form.mode, ExecMode::GraphicalSubapp);
    let widgets: Vec<Widget> = form.fields.iter().map(|f| f.widget).collect();
    assert_eq!(widgets, vec![Widget::Toggle, Widget::TextField, Widget::TextField]);
    assert_eq!(form.fields[0].default_text.as_deref(), Some("false"));
    assert_eq!(form.fields[2].default_text.as_deref(), Some("plot.png"));
    assert!(form.fields.iter().all(|f| !f.required));
}

#[test]
fn untyped_and_keyword_only_fields() {
    let form = FormSpec::new(&demo("func_with_only_kwargs"));

    let c = form.field("c").expect("field c");
    assert_eq!(c.widget, Widget::FreeForm);
    assert!(c.required);
    assert!(c.keyword_only);
    assert_eq!(form.field("b").and_then(|f| f.default_text.as_deref()), Some("42"));
}

#[test]
fn bind_parses_text_into_a_valid_request() -> Result<()> {
    let form = FormSpec::new(&demo("func_with_args"));
    let request = form.bind([("x", "3"), ("y", " 2.5 ")])?;
    let args = request.validate()?;

    assert_eq!(args.get("x"), Some(&json!(3)));
    assert_eq!(args.get("y"), Some(&json!(2.5)));
    Ok(())
}

#[test]
fn blank_fields_fall_back_to_defaults() -> Result<()> {
    let form = FormSpec::new(&demo("output_in_several_steps"));
    assert_eq!(form.prompts, vec!["Continue? > ", "Abort? > "]);

    let args = form.bind([("n_steps", ""), ("sleep", "0.5")])?.validate()?;
    assert_eq!(args.i64("n_steps")?, 10);
    assert_eq!(args.f64("sleep")?, 0.5);
    Ok(())
}

#[test]
fn bad_text_is_rejected_at_bind_time() {
    let form = FormSpec::new(&demo("func_with_args"));

    assert!(matches!(
        form.bind([("x", "3.5"), ("y", "1")]),
        Err(ValidationError::Invalid { ref name, .. }) if name == "x"
    ));
    assert!(matches!(
        form.bind([("x", "1"), ("y", "1,5")]),
        Err(ValidationError::Invalid { ref name, .. }) if name == "y"
    ));
    assert_eq!(
        form.bind([("x", "1")]).err(),
        Some(ValidationError::Missing("y".into()))
    );
    assert_eq!(
        form.bind([("z", "1")]).err(),
        Some(ValidationError::Unknown("z".into()))
    );
}

#[test]
fn toggles_accept_common_spellings() -> Result<()> {
    let form = FormSpec::new(&demo("bool_arg"));
    for (text, expected) in [("yes", true), ("No", false), ("1", true), ("FALSE", false), ("", true)] {
        let args = form.bind([("x", text)])?.validate()?;
        assert_eq!(args.bool("x")?, expected, "text {:?}", text);
    }
    assert!(form.bind([("x", "maybe")]).is_err());
    Ok(())
}
