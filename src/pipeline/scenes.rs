// src/pipeline/scenes.rs

use regex::Regex;

/// Names of the scenes defined in `source`, in order of appearance and
/// without duplicates.
///
/// The first capture group of `pattern` is the scene name.
pub fn discover_scenes(source: &str, pattern: &Regex) -> Vec<String> {
    let mut scenes: Vec<String> = Vec::new();
    for caps in pattern.captures_iter(source) {
        if let Some(name) = caps.get(1) {
            let name = name.as_str();
            if !scenes.iter().any(|s| s == name) {
                scenes.push(name.to_string());
            }
        }
    }
    scenes
}
