// src/exec/template.rs

//! `{placeholder}` expansion for stage command lines and output globs.

use std::collections::BTreeMap;

/// Placeholders understood in `cmd` and `output` templates.
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "workspace",
    "scene_file",
    "scene",
    "scenes",
    "output_name",
    "format",
    "ext",
    "concat_list",
    "job_id",
];

/// Values for one expansion.
///
/// `scenes` is kept separately because an argv element that is exactly
/// `"{scenes}"` expands into one argument per scene.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
    scenes: Vec<String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<String>) -> &mut Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn set_scenes(&mut self, scenes: &[String]) -> &mut Self {
        self.scenes = scenes.to_vec();
        self.values.insert("scenes", scenes.join(" "));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Return the names of all `{...}` placeholders in `template`, in order.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                out.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out
}

/// Expand a single template string.
pub fn render(template: &str, vars: &TemplateVars) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder in '{template}'"))?;
        let key = &after[..end];
        let value = vars
            .get(key)
            .ok_or_else(|| format!("no value for placeholder '{{{key}}}' in '{template}'"))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Expand a whole argv template.
pub fn render_argv(argv: &[String], vars: &TemplateVars) -> Result<Vec<String>, String> {
    let mut out = Vec::with_capacity(argv.len());
    for arg in argv {
        if arg == "{scenes}" {
            out.extend(vars.scenes.iter().cloned());
        } else {
            out.push(render(arg, vars)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        let mut v = TemplateVars::new();
        v.set("scene_file", "scene.py")
            .set("ext", "mp4")
            .set_scenes(&["Intro".to_string(), "Outro".to_string()]);
        v
    }

    #[test]
    fn replaces_known_placeholders() {
        let out = render("out/{scene_file}.{ext}", &vars()).unwrap();
        assert_eq!(out, "out/scene.py.mp4");
    }

    #[test]
    fn scenes_splices_into_separate_args() {
        let argv = vec![
            "manim".to_string(),
            "{scene_file}".to_string(),
            "{scenes}".to_string(),
        ];
        let out = render_argv(&argv, &vars()).unwrap();
        assert_eq!(out, vec!["manim", "scene.py", "Intro", "Outro"]);
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = render("{concat_list}", &vars()).unwrap_err();
        assert!(err.contains("concat_list"));
    }

    #[test]
    fn lists_placeholders() {
        assert_eq!(
            placeholders("media/**/{scene}.{ext}"),
            vec!["scene", "ext"]
        );
    }
}
