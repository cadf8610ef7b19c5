//! Font discovery for text rasterization.
//!
//! The bundled Roboto faces are looked up in `RESUME_EXPORT_FONTS_DIR`, next to the
//! running executable and in the crate's `assets/fonts` directory. When none of these
//! contain the faces, the Windows Arial family is tried as a fallback.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use rusttype::Font;
use thiserror::Error;

use crate::style::FontWeight;

/// Name of the bundled font family.
pub const DEFAULT_FONT_FAMILY_NAME: &str = "Roboto";

const FONTS_DIR_ENV: &str = "RESUME_EXPORT_FONTS_DIR";
const WINDOWS_FONTS_DIR_ENV: &str = "RESUME_EXPORT_WINDOWS_FONTS_DIR";

const REGULAR_FILE: &str = "Roboto-Regular.ttf";
const BOLD_FILE: &str = "Roboto-Bold.ttf";
const FONT_FILES: &[&str] = &[REGULAR_FILE, BOLD_FILE];

const WINDOWS_FALLBACK_FAMILY_NAME: &str = "Arial";
const WINDOWS_REGULAR_FILE: &str = "arial.ttf";
const WINDOWS_BOLD_FILE: &str = "arialbd.ttf";

/// Errors raised while locating or parsing font files.
#[derive(Debug, Error)]
pub enum FontError {
    #[error("unable to locate the {family} fonts; checked: {attempts}", family = DEFAULT_FONT_FAMILY_NAME)]
    NotFound { attempts: String },
    #[error("failed to read font file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("font file {0} is not a valid TrueType/OpenType font")]
    Invalid(PathBuf),
}

impl FontError {
    fn is_missing(&self) -> bool {
        match self {
            FontError::NotFound { .. } => true,
            FontError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            FontError::Invalid(_) => false,
        }
    }
}

/// Regular and bold faces used by the rasterizer.
pub struct FontSet {
    family: String,
    regular: Font<'static>,
    bold: Font<'static>,
}

impl FontSet {
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Returns the face for the given weight.
    pub fn face(&self, weight: FontWeight) -> &Font<'static> {
        match weight {
            FontWeight::Normal => &self.regular,
            FontWeight::Bold => &self.bold,
        }
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    env::var_os(var).and_then(|value| {
        let path = PathBuf::from(value);
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    })
}

fn font_directory_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(path) = env_path(FONTS_DIR_ENV) {
        candidates.push(path);
    }

    if let Ok(current_exe) = env::current_exe() {
        if let Some(bin_dir) = current_exe.parent() {
            let candidate = bin_dir.join("assets/fonts");
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }

    let manifest_candidate = bundled_fonts_source_dir();
    if !candidates.contains(&manifest_candidate) {
        candidates.push(manifest_candidate);
    }

    candidates
}

/// Directory inside the crate that holds the bundled font files.
pub fn bundled_fonts_source_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/fonts")
}

fn missing_font_files(path: &Path) -> Vec<&'static str> {
    FONT_FILES
        .iter()
        .copied()
        .filter(|name| !path.join(name).is_file())
        .collect()
}

fn resolve_font_directory() -> Result<PathBuf, FontError> {
    let mut attempts = Vec::new();

    for candidate in font_directory_candidates() {
        if !candidate.is_dir() {
            attempts.push(format!("{} (directory missing)", candidate.display()));
            continue;
        }
        let missing = missing_font_files(&candidate);
        if missing.is_empty() {
            return Ok(candidate);
        }
        attempts.push(format!(
            "{} (missing files [{}])",
            candidate.display(),
            missing.join(", ")
        ));
    }

    let attempts = if attempts.is_empty() {
        "no search paths were available".to_owned()
    } else {
        attempts.join(", ")
    };
    Err(FontError::NotFound { attempts })
}

fn load_font(path: &Path) -> Result<Font<'static>, FontError> {
    let bytes = fs::read(path).map_err(|source| FontError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Font::try_from_vec(bytes).ok_or_else(|| FontError::Invalid(path.to_path_buf()))
}

fn load_bundled_font_set() -> Result<FontSet, FontError> {
    let directory = resolve_font_directory()?;
    Ok(FontSet {
        family: DEFAULT_FONT_FAMILY_NAME.to_owned(),
        regular: load_font(&directory.join(REGULAR_FILE))?,
        bold: load_font(&directory.join(BOLD_FILE))?,
    })
}

fn windows_font_directory() -> Option<PathBuf> {
    if let Some(path) = env_path(WINDOWS_FONTS_DIR_ENV) {
        return Some(path);
    }

    #[cfg(windows)]
    {
        for var in ["WINDIR", "SystemRoot"] {
            if let Some(root) = env_path(var) {
                let candidate = root.join("Fonts");
                if candidate.is_dir() {
                    return Some(candidate);
                }
            }
        }
    }

    None
}

fn windows_fallback_font_set() -> Result<FontSet, FontError> {
    let directory = windows_font_directory().ok_or_else(|| FontError::NotFound {
        attempts: "Windows font directory".to_owned(),
    })?;
    Ok(FontSet {
        family: WINDOWS_FALLBACK_FAMILY_NAME.to_owned(),
        regular: load_font(&directory.join(WINDOWS_REGULAR_FILE))?,
        bold: load_font(&directory.join(WINDOWS_BOLD_FILE))?,
    })
}

/// Loads the bundled Roboto faces, falling back to Windows Arial when they are missing.
pub fn default_font_set() -> Result<FontSet, FontError> {
    match load_bundled_font_set() {
        Ok(fonts) => Ok(fonts),
        Err(err) if err.is_missing() => match windows_fallback_font_set() {
            Ok(fallback) => {
                warn!(
                    "Bundled fonts unavailable ({}); falling back to Windows '{}' family.",
                    err, WINDOWS_FALLBACK_FAMILY_NAME
                );
                Ok(fallback)
            }
            Err(fallback_err) => {
                warn!(
                    "Bundled fonts unavailable ({}); Windows fallback failed: {}",
                    err, fallback_err
                );
                Err(err)
            }
        },
        Err(err) => Err(err),
    }
}

/// Indicates whether the bundled faces can be found on disk.
pub fn default_fonts_available() -> bool {
    resolve_font_directory().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_reported_per_directory() {
        let directory = env::temp_dir().join("resume_export_fonts_empty");
        fs::create_dir_all(&directory).expect("create font directory");
        assert_eq!(missing_font_files(&directory), FONT_FILES.to_vec());
        let _ = fs::remove_dir_all(&directory);
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let directory = env::temp_dir().join("resume_export_fonts_invalid");
        fs::create_dir_all(&directory).expect("create font directory");
        let path = directory.join(REGULAR_FILE);
        fs::write(&path, b"not a font").expect("write font file");

        let error = load_font(&path).err().expect("invalid font must fail");
        assert!(matches!(error, FontError::Invalid(_)));
        assert!(!error.is_missing());
        let _ = fs::remove_dir_all(&directory);
    }

    #[test]
    fn missing_font_file_counts_as_missing() {
        let error = load_font(Path::new("/__resume_export_missing__/font.ttf"))
            .err()
            .expect("missing font must fail");
        assert!(error.is_missing());
    }
}
