//! Kernel Source Assembly
//!
//! A program is built from one source blob. [`KernelSource`] assembles it
//! from three kinds of parts, emitted in insertion order:
//!
//! - a header, kept verbatim with its line breaks
//! - constant definitions, emitted as `const NAME = value;`
//! - kernel fragments, normalized by [`format_fragment`]
//!
//! ```rust,ignore
//! let source = KernelSource::new()
//!     .define("MAGIC_NUMBER", "10.0f")
//!     .fragment(include_str!("add.wgsl"))
//!     .build();
//! ```

use std::fmt::{Display, Write as _};

enum Part {
    Verbatim(String),
    Define { name: String, value: String },
    Fragment(String),
}

/// Builder for a program source blob.
#[derive(Default)]
pub struct KernelSource {
    parts: Vec<Part>,
}

impl KernelSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `text` unchanged.
    #[must_use]
    pub fn header(mut self, text: impl Into<String>) -> Self {
        self.parts.push(Part::Verbatim(text.into()));
        self
    }

    /// Appends a module-scope constant.
    #[must_use]
    pub fn define(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.parts.push(Part::Define {
            name: name.into(),
            value: value.to_string(),
        });
        self
    }

    /// Appends kernel code, normalized.
    #[must_use]
    pub fn fragment(mut self, text: &str) -> Self {
        self.parts.push(Part::Fragment(format_fragment(text)));
        self
    }

    /// The assembled blob, one part per line.
    #[must_use]
    pub fn build(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Verbatim(text) => {
                    out.push_str(text);
                    if !text.ends_with('\n') {
                        out.push('\n');
                    }
                }
                Part::Define { name, value } => {
                    // Writing into a String cannot fail.
                    let _ = writeln!(out, "const {name} = {value};");
                }
                Part::Fragment(code) => {
                    out.push_str(code);
                    out.push('\n');
                }
            }
        }
        out
    }
}

/// Strips `//` comments and collapses every whitespace run, newlines
/// included, into a single space.
#[must_use]
pub fn format_fragment(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let code = line.find("//").map_or(line, |at| &line[..at]);
        for word in code.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out
}
