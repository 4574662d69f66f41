//! Module map normalization
//!
//! Clang module maps in source packages usually reference headers by paths
//! relative to wherever the map lives. Inside a framework, headers live in
//! `Headers/` and the map in `Modules/`, so every reference must be rewritten
//! to the framework-relative form. The rewrite changes path spelling only:
//! umbrella headers stay umbrella headers, explicit header lists stay lists,
//! submodules and `export`/`link` declarations pass through untouched.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// What a quoted path in a module map refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// A header file
    Header,
    /// An umbrella directory
    Directory,
}

/// Layout of the source headers a module map refers to
#[derive(Debug, Clone)]
pub struct HeaderLayout {
    /// Directory holding the module map
    pub modulemap_dir: PathBuf,
    /// Public headers root, copied to `Headers/`
    pub headers_root: PathBuf,
}

/// Result of rewriting one reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    /// Path as it must appear in the framework module map
    pub path: String,
    /// Header outside the public headers root that must be copied to `Headers/`
    pub external: Option<PathBuf>,
}

impl HeaderLayout {
    /// Rewrite a path from the source map into framework-relative form
    pub fn rewrite(&self, reference: Reference, path: &str) -> Result<Rewritten, String> {
        let absolute = lexical_normalize(&self.modulemap_dir.join(path));
        let relative = absolute.strip_prefix(&self.headers_root).ok().map(portable);

        match (reference, relative) {
            (Reference::Header, Some(rel)) => Ok(Rewritten {
                path: rel,
                external: None,
            }),
            (Reference::Header, None) => {
                let name = absolute
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| format!("header path '{path}' has no file name"))?;
                Ok(Rewritten {
                    path: name,
                    external: Some(absolute),
                })
            }
            (Reference::Directory, Some(rel)) if rel.is_empty() => Ok(Rewritten {
                path: "Headers".to_string(),
                external: None,
            }),
            (Reference::Directory, Some(rel)) => Ok(Rewritten {
                path: format!("Headers/{rel}"),
                external: None,
            }),
            (Reference::Directory, None) => Err(format!(
                "umbrella directory '{path}' is outside the public headers"
            )),
        }
    }
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(\s*(?:(?:private|textual|exclude|umbrella)\s+)*header\s+)"([^"]+)"(.*)$"#)
            .expect("valid header regex")
    })
}

fn umbrella_dir_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(\s*umbrella\s+)"([^"]+)"(.*)$"#).expect("valid umbrella regex")
    })
}

fn module_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)(?:explicit\s+)?(?:framework\s+)?module\s+([A-Za-z_][A-Za-z0-9_]*)(.*)$")
            .expect("valid module regex")
    })
}

/// Rewrite a source module map into a framework module map
///
/// `resolve` maps each quoted path to its framework-relative spelling.
pub fn normalize<F>(source: &str, mut resolve: F) -> Result<String, String>
where
    F: FnMut(Reference, &str) -> Result<String, String>,
{
    let mut out = Vec::new();
    let mut depth: i32 = 0;
    let mut saw_module = false;

    for line in source.lines() {
        let code = line.split("//").next().unwrap_or("");
        let rewritten = if depth == 0 {
            if let Some(caps) = module_regex().captures(line) {
                saw_module = true;
                format!("{}framework module {}{}", &caps[1], &caps[2], &caps[3])
            } else {
                line.to_string()
            }
        } else if let Some(caps) = header_regex().captures(line) {
            let path = resolve(Reference::Header, &caps[2])?;
            format!("{}\"{path}\"{}", &caps[1], &caps[3])
        } else if let Some(caps) = umbrella_dir_regex().captures(line) {
            let path = resolve(Reference::Directory, &caps[2])?;
            format!("{}\"{path}\"{}", &caps[1], &caps[3])
        } else {
            line.to_string()
        };

        depth += brace_delta(code);
        if depth < 0 {
            return Err("unbalanced '}'".to_string());
        }
        out.push(rewritten);
    }

    if depth != 0 {
        return Err("unbalanced '{'".to_string());
    }
    if !saw_module {
        return Err("no module declaration".to_string());
    }

    let mut text = out.join("\n");
    text.push('\n');
    Ok(text)
}

fn brace_delta(code: &str) -> i32 {
    let mut delta = 0;
    let mut in_string = false;
    for c in code.chars() {
        match c {
            '"' => in_string = !in_string,
            '{' if !in_string => delta += 1,
            '}' if !in_string => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Generate a framework module map for a module without one
///
/// An umbrella header named after the module wins; otherwise the whole
/// `Headers` directory is the umbrella.
pub fn generate(module: &str, has_umbrella_header: bool) -> String {
    let umbrella = if has_umbrella_header {
        format!("umbrella header \"{module}.h\"")
    } else {
        "umbrella \"Headers\"".to_string()
    };
    format!("framework module {module} {{\n    {umbrella}\n    export *\n}}\n")
}

/// Resolve `.` and `..` without touching the filesystem
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn portable(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
