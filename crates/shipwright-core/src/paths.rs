use crate::cycle::CycleId;
use crate::error::{Result, ShipwrightError};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SHIPWRIGHT_DIR: &str = ".shipwright";
pub const CYCLES_DIR: &str = ".shipwright/cycles";

pub const CONFIG_FILE: &str = ".shipwright/config.yaml";
pub const SERVICES_FILE: &str = ".shipwright/services.yaml";

pub const FILES_DIR: &str = "files";
pub const DIAGRAM_FILE: &str = "architecture.mmd";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn shipwright_dir(root: &Path) -> PathBuf {
    root.join(SHIPWRIGHT_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn services_path(root: &Path) -> PathBuf {
    root.join(SERVICES_FILE)
}

pub fn cycles_dir(root: &Path) -> PathBuf {
    root.join(CYCLES_DIR)
}

pub fn cycle_path(root: &Path, id: CycleId) -> PathBuf {
    cycles_dir(root).join(format!("{id}.yaml"))
}

pub fn cycle_files_dir(root: &Path, id: CycleId) -> PathBuf {
    cycles_dir(root).join(id.to_string()).join(FILES_DIR)
}

pub fn cycle_diagram_path(root: &Path, id: CycleId) -> PathBuf {
    cycles_dir(root).join(id.to_string()).join(DIAGRAM_FILE)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9\-]*[a-z0-9])?$").expect("name pattern compiles")
    })
}

/// Kubernetes object names and namespaces: DNS-1123 labels.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 || !name_re().is_match(name) {
        return Err(ShipwrightError::Configuration(format!(
            "'{name}' is not a valid DNS-1123 label"
        )));
    }
    Ok(())
}

/// Generated file paths must stay inside the files directory.
pub fn validate_relative_path(path: &str) -> Result<()> {
    let p = Path::new(path);
    let escapes = p
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(ShipwrightError::Validation(format!(
            "generated file path '{path}' must be relative and stay inside the project"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
