//! Catalog file parser
//!
//! Reads the section-based `crontab.ini` format and produces a catalog of
//! fully-resolved jobs. Sections are named `[id]` with dotted-name
//! inheritance: `a.b.c` overlays `a.b`, which overlays `a`, all over the
//! synthetic `[default]` section — most specific value wins. Comment lines
//! begin with `#` or `;`, separators are `:` or `=`, and lines beginning
//! with whitespace continue the previous value.
//!
//! The parser also renders a catalog back to text; `parse(render(c)) == c`
//! for any legally authored catalog.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::entities::{Catalog, Job};
use crate::domain::value_objects::{Interval, TimeSpec};

/// Everything that can be wrong with a catalog file. Each variant names the
/// offending section and line where one exists, so the log points straight
/// at the problem.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: duplicate section [{section}]")]
    DuplicateSection { section: String, line: usize },
    #[error("section [{section}], line {line}: unknown key '{key}'")]
    UnknownKey {
        section: String,
        key: String,
        line: usize,
    },
    #[error("section [{section}], line {line}: invalid value for '{key}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        line: usize,
        reason: String,
    },
    #[error("section [{section}]: no command defined")]
    MissingCommand { section: String },
    #[error("section [{section}]: post target '{target}' is not defined")]
    UnresolvedPost { section: String, target: String },
    #[error("section [{section}]: job cannot chain after itself")]
    SelfPost { section: String },
    /// Distinct non-fatal outcome: the file parsed but defines no jobs.
    #[error("catalog defines no jobs")]
    Empty,
}

const KNOWN_KEYS: [&str; 14] = [
    "command",
    "active",
    "time",
    "interval",
    "post",
    "condition",
    "queue",
    "conflict",
    "warn",
    "mail",
    "mailto",
    "username",
    "hostname",
    "sendmail",
];

#[derive(Debug)]
struct RawValue {
    value: String,
    line: usize,
}

#[derive(Debug)]
struct RawSection {
    name: String,
    entries: Vec<(String, RawValue)>,
}

/// One effective key after inheritance, remembering which section and line
/// defined it so errors blame the right place.
#[derive(Debug, Clone)]
struct Resolved {
    value: String,
    section: String,
    line: usize,
}

/// Overlays a section's entries onto an effective map; later entries within
/// a section and more specific sections both win. This operation is
/// associative, which is what makes dotted-name inheritance composable.
fn overlay(effective: &mut BTreeMap<String, Resolved>, section: &RawSection) {
    for (key, raw) in &section.entries {
        effective.insert(
            key.clone(),
            Resolved {
                value: raw.value.clone(),
                section: section.name.clone(),
                line: raw.line,
            },
        );
    }
}

/// All proper dotted prefixes of a job id, most general first.
fn prefixes(name: &str) -> Vec<String> {
    let segments: Vec<&str> = name.split('.').collect();
    let mut out = Vec::new();
    let mut acc = String::new();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if !acc.is_empty() {
            acc.push('.');
        }
        acc.push_str(segment);
        out.push(acc.clone());
    }
    out
}

fn validate_section_name(name: &str, line: usize) -> Result<(), CatalogError> {
    let valid = !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(CatalogError::Syntax {
            line,
            message: format!("invalid section name '{}'", name),
        })
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}

/// Parser for the `crontab.ini` job catalog.
pub struct CatalogParser;

impl CatalogParser {
    pub fn new() -> Self {
        Self
    }

    /// Reads and parses a catalog file.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Catalog, CatalogError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.parse_str(&text)
    }

    /// Parses catalog text into fully-resolved jobs.
    pub fn parse_str(&self, text: &str) -> Result<Catalog, CatalogError> {
        let sections = scan_sections(text)?;

        // Unknown keys are errors wherever they appear, templates included.
        for section in &sections {
            for (key, raw) in &section.entries {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    return Err(CatalogError::UnknownKey {
                        section: section.name.clone(),
                        key: key.clone(),
                        line: raw.line,
                    });
                }
            }
        }

        let by_name: BTreeMap<&str, &RawSection> =
            sections.iter().map(|s| (s.name.as_str(), s)).collect();
        let job_names: Vec<&str> = sections
            .iter()
            .map(|s| s.name.as_str())
            .filter(|n| *n != "default")
            .collect();

        let mut jobs: BTreeMap<String, Arc<Job>> = BTreeMap::new();
        for name in &job_names {
            let mut effective: BTreeMap<String, Resolved> = BTreeMap::new();
            if let Some(default) = by_name.get("default") {
                overlay(&mut effective, default);
            }
            for prefix in prefixes(name) {
                if let Some(section) = by_name.get(prefix.as_str()) {
                    overlay(&mut effective, section);
                }
            }
            overlay(&mut effective, by_name[name]);

            let has_command = effective
                .get("command")
                .map(|r| !r.value.trim().is_empty())
                .unwrap_or(false);
            if !has_command {
                // A command-less section that only exists to hold defaults
                // for its children is a template, not a job.
                let dotted = format!("{}.", name);
                let is_template = job_names.iter().any(|other| other.starts_with(&dotted));
                if is_template {
                    continue;
                }
                return Err(CatalogError::MissingCommand {
                    section: name.to_string(),
                });
            }

            let job = build_job(name, &effective)?;
            jobs.insert(name.to_string(), Arc::new(job));
        }

        for job in jobs.values() {
            for target in &job.post {
                if target == &job.id {
                    return Err(CatalogError::SelfPost {
                        section: job.id.clone(),
                    });
                }
                if !jobs.contains_key(target) {
                    return Err(CatalogError::UnresolvedPost {
                        section: job.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        if jobs.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Catalog::new(jobs))
    }

    /// Renders a catalog back to the section format.
    ///
    /// Every key is written for every job — unset optionals as empty values,
    /// which the parser reads as explicit unsets. Full explicitness keeps
    /// the render faithful even when a rendered section sits below a dotted
    /// ancestor that would otherwise leak values into it on reparse.
    pub fn render(&self, catalog: &Catalog) -> String {
        let mut out = String::new();
        for job in catalog.jobs() {
            out.push_str(&format!("[{}]\n", job.id));
            push_entry(&mut out, "command", &job.command);
            push_entry(&mut out, "active", if job.active { "true" } else { "false" });
            push_entry(&mut out, "time", job.time.as_ref().map(TimeSpec::source).unwrap_or(""));
            push_entry(
                &mut out,
                "interval",
                job.interval.as_ref().map(Interval::source).unwrap_or(""),
            );
            push_entry(&mut out, "post", &job.post.join(" "));
            push_entry(&mut out, "condition", job.condition.as_deref().unwrap_or(""));
            push_entry(&mut out, "queue", &job.queue);
            push_entry(&mut out, "conflict", job.conflict.as_str());
            push_entry(&mut out, "warn", if job.warn { "true" } else { "false" });
            push_entry(&mut out, "mail", job.mail.as_str());
            push_entry(&mut out, "mailto", job.mailto.as_deref().unwrap_or(""));
            push_entry(&mut out, "username", job.username.as_deref().unwrap_or(""));
            push_entry(&mut out, "hostname", job.hostname.as_deref().unwrap_or(""));
            push_entry(&mut out, "sendmail", job.sendmail.as_deref().unwrap_or(""));
            out.push('\n');
        }
        out
    }
}

impl Default for CatalogParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes one key with multi-line values as indented continuations.
fn push_entry(out: &mut String, key: &str, value: &str) {
    let mut lines = value.lines();
    let first = lines.next().unwrap_or("");
    if first.is_empty() {
        out.push_str(&format!("{} =\n", key));
    } else {
        out.push_str(&format!("{} = {}\n", key, first));
    }
    for line in lines {
        out.push_str(&format!("    {}\n", line));
    }
}

/// First pass: split the text into raw sections with line numbers attached.
fn scan_sections(text: &str) -> Result<Vec<RawSection>, CatalogError> {
    let mut sections: Vec<RawSection> = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line = idx + 1;
        let continuation = raw_line
            .chars()
            .next()
            .map(|c| c == ' ' || c == '\t')
            .unwrap_or(false);
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if continuation {
            // Checked before the comment rule so an indented `#` stays part
            // of a multi-line command.
            let entry = sections
                .last_mut()
                .and_then(|section| section.entries.last_mut());
            match entry {
                Some((_, value)) => {
                    value.value.push('\n');
                    value.value.push_str(trimmed);
                }
                None => {
                    return Err(CatalogError::Syntax {
                        line,
                        message: "continuation line without a preceding entry".to_string(),
                    });
                }
            }
            continue;
        }

        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if let Some(inner) = trimmed.strip_prefix('[') {
            let Some(name) = inner.strip_suffix(']') else {
                return Err(CatalogError::Syntax {
                    line,
                    message: "unterminated section header".to_string(),
                });
            };
            let name = name.trim();
            validate_section_name(name, line)?;
            if sections.iter().any(|s| s.name == name) {
                return Err(CatalogError::DuplicateSection {
                    section: name.to_string(),
                    line,
                });
            }
            sections.push(RawSection {
                name: name.to_string(),
                entries: Vec::new(),
            });
            continue;
        }

        let Some(separator) = trimmed.find([':', '=']) else {
            return Err(CatalogError::Syntax {
                line,
                message: "expected 'key: value' or a section header".to_string(),
            });
        };
        let key = trimmed[..separator].trim().to_ascii_lowercase();
        let value = trimmed[separator + 1..].trim().to_string();
        if key.is_empty() {
            return Err(CatalogError::Syntax {
                line,
                message: "empty key".to_string(),
            });
        }
        let Some(section) = sections.last_mut() else {
            return Err(CatalogError::Syntax {
                line,
                message: "entry outside of any section".to_string(),
            });
        };
        section.entries.push((key, RawValue { value, line }));
    }

    Ok(sections)
}

/// Second pass: turn one section's effective entries into a typed job.
/// An empty value unsets an inherited optional key.
fn build_job(name: &str, effective: &BTreeMap<String, Resolved>) -> Result<Job, CatalogError> {
    let mut job = Job::new(name);

    for (key, resolved) in effective {
        let invalid = |reason: String| CatalogError::InvalidValue {
            section: resolved.section.clone(),
            key: key.clone(),
            line: resolved.line,
            reason,
        };
        let value = resolved.value.as_str();
        match key.as_str() {
            "command" => job.command = value.to_string(),
            "active" => job.active = parse_bool(value).map_err(invalid)?,
            "time" => {
                job.time = if value.is_empty() {
                    None
                } else {
                    Some(value.parse::<TimeSpec>().map_err(invalid)?)
                };
            }
            "interval" => {
                job.interval = if value.is_empty() {
                    None
                } else {
                    Some(value.parse::<Interval>().map_err(invalid)?)
                };
            }
            "post" => {
                job.post = value.split_whitespace().map(str::to_string).collect();
            }
            "condition" => {
                job.condition = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "queue" => {
                if !value.is_empty() {
                    job.queue = value.to_string();
                }
            }
            "conflict" => job.conflict = value.parse().map_err(invalid)?,
            "warn" => job.warn = parse_bool(value).map_err(invalid)?,
            "mail" => job.mail = value.parse().map_err(invalid)?,
            "mailto" => job.mailto = non_empty(value),
            "username" => job.username = non_empty(value),
            "hostname" => job.hostname = non_empty(value),
            "sendmail" => job.sendmail = non_empty(value),
            _ => unreachable!("unknown keys rejected before resolution"),
        }
    }

    Ok(job)
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
