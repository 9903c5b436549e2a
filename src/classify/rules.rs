// src/classify/rules.rs

//! Ordered failure signatures for the three toolchain programs.
//!
//! Rules are evaluated top to bottom; the first one with a matching pattern
//! decides the error kind. Keep the more specific signatures first.

use std::sync::LazyLock;

use regex::Regex;

use crate::classify::ErrorKind;
use crate::types::ToolchainStage;

/// One signature rule.
#[derive(Debug)]
pub struct Rule {
    pub name: &'static str,
    pub kind: ErrorKind,
    /// Stage blamed when this rule matches; `None` means "the stage kind of
    /// the step that ran".
    pub stage: Option<ToolchainStage>,
    pub patterns: Vec<Regex>,
    /// How many lines before the match to quote in the detail.
    pub context_before: usize,
}

impl Rule {
    fn new(
        name: &'static str,
        kind: ErrorKind,
        stage: Option<ToolchainStage>,
        context_before: usize,
        patterns: &[&str],
    ) -> Self {
        Self {
            name,
            kind,
            stage,
            context_before,
            patterns: patterns
                .iter()
                .map(|p| Regex::new(p).expect("built-in classifier pattern must compile"))
                .collect(),
        }
    }

    /// Index of the first output line matching any pattern.
    pub fn first_match(&self, lines: &[&str]) -> Option<usize> {
        lines
            .iter()
            .position(|line| self.patterns.iter().any(|re| re.is_match(line)))
    }
}

/// The built-in rule table, in priority order.
pub static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new(
            "memory_exhausted",
            ErrorKind::Resource,
            None,
            0,
            &[
                r"\bMemoryError\b",
                r"Cannot allocate memory",
                r"std::bad_alloc",
                r"[Oo]ut of memory",
                r"No space left on device",
            ],
        ),
        Rule::new(
            "latex",
            ErrorKind::Input,
            Some(ToolchainStage::Typesetting),
            0,
            &[
                r"LaTeX Error",
                r"^! ",
                r"[Ll]a[Tt]e[Xx] error converting to dvi",
                r"Missing \$ inserted",
                r"Undefined control sequence",
                r"xelatex error",
            ],
        ),
        Rule::new(
            "markup",
            ErrorKind::Input,
            Some(ToolchainStage::Typesetting),
            0,
            &[
                r"Pango-WARNING \*\*: .*markup",
                r"Error on line \d+ char \d+",
                r"MarkupText.*(invalid|error)",
            ],
        ),
        Rule::new(
            "scene_syntax",
            ErrorKind::Input,
            Some(ToolchainStage::Rendering),
            4,
            &[
                r"\bSyntaxError\b",
                r"\bIndentationError\b",
                r"\bTabError\b",
                r"is not in the script",
                r"No scenes? (inside that module|found)",
            ],
        ),
        Rule::new(
            "missing_dependency",
            ErrorKind::Environment,
            None,
            0,
            &[
                r"command not found",
                r"error while loading shared libraries",
                r"\bModuleNotFoundError\b",
                r"No module named",
                r"FileNotFoundError: .*(latex|dvisvgm|ffmpeg|ffprobe)",
                r"(latex|dvisvgm|ffmpeg)\S*: not found",
                r"Unknown encoder",
                r"Could not find .*(latex|ffmpeg|dvisvgm)",
            ],
        ),
        Rule::new(
            "encoder",
            ErrorKind::Encoding,
            Some(ToolchainStage::Encoding),
            0,
            &[
                r"Conversion failed!",
                r"Invalid data found when processing input",
                r"Error (opening|while opening) (output|input) file",
                r"av_interleaved_write_frame",
                r"Error while (encoding|decoding|filtering)",
                r"moov atom not found",
                r"Could not write header",
                r"[Ii]mpossible to open '.*'",
                r"\[(libx264|libvpx|mp4|mov|matroska|webm|concat|gif)[^\]]*\] .*(error|Error|failed)",
                r"BrokenPipeError",
            ],
        ),
    ]
});
