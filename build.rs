use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Which policy a collector enforces. Each kind filters matches differently
// and explains itself differently when it fails the build.
#[derive(Clone, Copy)]
enum Policy {
    UnderscorePrefix,
    ForbiddenWords,
    StarsOutsideDocs,
    AllCapsComment,
    AllowDeadCode,
}

impl Policy {
    fn pattern(self) -> &'static str {
        match self {
            Policy::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b",
            Policy::ForbiddenWords => {
                r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)"
            }
            Policy::StarsOutsideDocs => r"(//|/\*).*\*\*",
            Policy::AllCapsComment => r"(//|/\*|///).*",
            Policy::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    fn headline(self) -> &'static str {
        match self {
            Policy::UnderscorePrefix => "underscore-prefixed variables",
            Policy::ForbiddenWords => "comments with forbidden words",
            Policy::StarsOutsideDocs => "non-doc comments containing '**'",
            Policy::AllCapsComment => "comments written entirely in capitals",
            Policy::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Policy::UnderscorePrefix => {
                "Underscore-prefixed variable names are not allowed in mlmnet. Use the value or remove it."
            }
            Policy::ForbiddenWords | Policy::StarsOutsideDocs | Policy::AllCapsComment => {
                "Comments should describe the code as it is, in plain sentence case."
            }
            Policy::AllowDeadCode => {
                "#[allow(dead_code)] attributes are STRICTLY FORBIDDEN. Use the code or remove it."
            }
        }
    }

    // The build script itself talks about the forbidden words, so it is only
    // held to the underscore rule.
    fn checks_build_script(self) -> bool {
        matches!(self, Policy::UnderscorePrefix)
    }
}

// Collects every matching line of one file that violates `policy`.
struct ViolationCollector {
    policy: Policy,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(policy: Policy, file_path: &Path) -> Self {
        Self {
            policy,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn is_violation(&self, line_text: &str) -> bool {
        match self.policy {
            Policy::UnderscorePrefix => {
                !is_comment(line_text) && !underscore_only_in_strings(line_text)
            }
            Policy::StarsOutsideDocs => !is_doc_comment(line_text),
            Policy::AllCapsComment => comment_body(line_text).is_some_and(|body| {
                let letters: Vec<char> = body.chars().filter(|c| c.is_alphabetic()).collect();
                !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
            }),
            Policy::ForbiddenWords | Policy::AllowDeadCode => true,
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.policy.headline(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.policy.advice()));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || (line.contains("/*") && !line.contains("*/match") && !line.contains("*/let"))
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// A match inside a string literal is not an identifier.
fn underscore_only_in_strings(line: &str) -> bool {
    line.contains('"')
        && line
            .split('"')
            .enumerate()
            .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_body(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///").or_else(|| trimmed.strip_prefix("//!")) {
        return Some(rest.trim());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim());
    }
    let start = line.find("/*")? + 2;
    let body = &line[start..];
    Some(match body.find("*/") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    })
}

// Every Rust source of the crate, skipping build output and the reference
// material under ./examples.
fn rust_sources() -> impl Iterator<Item = PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.path().starts_with("./target") && !e.path().starts_with("./examples"))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn enforce(policy: Policy) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(policy.pattern())?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        if !policy.checks_build_script() && path.file_name().is_some_and(|name| name == "build.rs") {
            continue;
        }
        if std::fs::read_to_string(&path).is_err() {
            continue;
        }

        let mut collector = ViolationCollector::new(policy, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=net");
    println!("cargo:rerun-if-changed=cli");
    println!("cargo:rerun-if-changed=tests");
    println!("cargo:rerun-if-changed=benches");

    let policies = [
        Policy::UnderscorePrefix,
        Policy::ForbiddenWords,
        Policy::StarsOutsideDocs,
        Policy::AllCapsComment,
        Policy::AllowDeadCode,
    ];
    for policy in policies {
        if let Err(e) = enforce(policy) {
            // The eprintln! is what shows the violations in cargo's output.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
