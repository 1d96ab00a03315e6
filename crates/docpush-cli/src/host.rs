//! File-backed session host and the `.sha` sidecar stored next to each file.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use docpush_core::{Notice, SessionHost, VersionToken};
use tracing::{debug, info};

/// Host for one command: the local document plus whatever a fetch delivered.
#[derive(Debug, Default)]
pub struct FileHost {
    document: String,
    fetched: Mutex<Option<String>>,
}

impl FileHost {
    pub fn new(document: String) -> Self {
        Self {
            document,
            fetched: Mutex::new(None),
        }
    }

    /// Host whose document is the current content of `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let document = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::new(document))
    }

    /// Content delivered by the last fetch.
    pub fn take_fetched(&self) -> Option<String> {
        self.fetched.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl SessionHost<String> for FileHost {
    fn current_document(&self) -> String {
        self.document.clone()
    }

    fn on_saved(&self) {
        debug!("Remote copy updated");
    }

    fn on_content_fetched(&self, display: String, _plain: &str) {
        *self.fetched.lock().unwrap_or_else(|e| e.into_inner()) = Some(display);
    }

    fn on_notice(&self, notice: Notice) {
        match notice {
            Notice::Saved => info!("Saved"),
            Notice::Fetched => info!("Fetched latest"),
        }
    }
}

/// `notes.md` -> `notes.md.sha`
pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(".sha");
    PathBuf::from(name)
}

/// Token recorded for `file`, if a sidecar exists.
pub fn read_token(file: &Path) -> Result<Option<VersionToken>> {
    let sidecar = sidecar_path(file);
    match fs::read_to_string(&sidecar) {
        Ok(text) => {
            let sha = text.trim();
            Ok((!sha.is_empty()).then(|| VersionToken::new(sha)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", sidecar.display())),
    }
}

pub fn write_token(file: &Path, token: &VersionToken) -> Result<()> {
    let sidecar = sidecar_path(file);
    fs::write(&sidecar, format!("{}\n", token))
        .with_context(|| format!("Failed to write {}", sidecar.display()))
}

/// Drop the sidecar of `file`, if any.
pub fn remove_token(file: &Path) -> Result<()> {
    let sidecar = sidecar_path(file);
    match fs::remove_file(&sidecar) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", sidecar.display())),
    }
}

/// Write fetched content and its token.
///
/// Without a token any older sidecar is removed, so it never pairs with
/// content it was not read with.
pub fn write_document(file: &Path, content: &str, token: Option<&VersionToken>) -> Result<()> {
    fs::write(file, content).with_context(|| format!("Failed to write {}", file.display()))?;
    match token {
        Some(token) => write_token(file, token),
        None => remove_token(file),
    }
}
