// ── Bridge Engine: State Directory ─────────────────────────────────────────
// One directory of small JSON files, each atomically rewritten:
//
//   fingerprint.json   — latest device identity record
//   rate-limits.json   — send timestamp log + last-send
//   contacts.json      — jid → warmup record
//   risk-events.json   — 24h event ring
//   activity.json      — sent/received counters
//
// Every file carries a top-level `v` format version. An unknown version or a
// parse failure resets that file only (logged), never the whole directory.
//
// Write failures are absorbed: the first failure is retried on the next
// flush; a second consecutive failure degrades the store to in-memory-only
// with a warning. A later successful write re-arms persistence.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{info, warn};

use crate::atoms::constants::STATE_FORMAT_VERSION;
use crate::atoms::error::BridgeResult;

// ── Versioned envelope ─────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    v: u32,
    #[serde(flatten)]
    data: T,
}

// ── Store ──────────────────────────────────────────────────────────────────

pub struct StateDir {
    root: PathBuf,
    consecutive_failures: AtomicU32,
    memory_only: AtomicBool,
}

impl StateDir {
    pub fn open(root: impl Into<PathBuf>) -> BridgeResult<StateDir> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(StateDir {
            root,
            consecutive_failures: AtomicU32::new(0),
            memory_only: AtomicBool::new(false),
        })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Load a file's payload, or None when the file is absent, unparsable,
    /// or from an unknown format version. The caller falls back to defaults;
    /// the bad file is overwritten on the next save.
    pub fn load<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let path = self.path(file);
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("[persist] read {} failed: {}", file, e);
                return None;
            }
        };
        match serde_json::from_str::<Envelope<T>>(&raw) {
            Ok(env) if env.v == STATE_FORMAT_VERSION => Some(env.data),
            Ok(env) => {
                warn!(
                    "[persist] {} has unknown format v{} (expected v{}) — resetting that file",
                    file, env.v, STATE_FORMAT_VERSION
                );
                None
            }
            Err(e) => {
                warn!("[persist] {} is corrupt ({}) — resetting that file", file, e);
                None
            }
        }
    }

    /// Atomically rewrite a file (write-then-rename). Failures never reach
    /// the caller; see the degrade policy in the module header.
    pub fn save<T: Serialize>(&self, file: &str, data: &T) {
        if self.memory_only.load(Ordering::Relaxed) {
            return;
        }
        match self.try_save(file, data) {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= 2 {
                    warn!(
                        "[persist] write {} failed twice in a row ({}) — degrading to in-memory only",
                        file, e
                    );
                    self.memory_only.store(true, Ordering::Relaxed);
                } else {
                    warn!("[persist] write {} failed ({}) — will retry on next flush", file, e);
                }
            }
        }
    }

    fn try_save<T: Serialize>(&self, file: &str, data: &T) -> std::io::Result<()> {
        let envelope = Envelope { v: STATE_FORMAT_VERSION, data };
        let json = serde_json::to_string_pretty(&envelope)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let path = self.path(file);
        let tmp = self.path(&format!("{}.tmp", file));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// A store that never touches disk, for tests and ephemeral runs.
    pub fn ephemeral() -> StateDir {
        StateDir {
            root: std::env::temp_dir(),
            consecutive_failures: AtomicU32::new(0),
            memory_only: AtomicBool::new(true),
        }
    }

    pub fn is_memory_only(&self) -> bool {
        self.memory_only.load(Ordering::Relaxed)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Default state directory: `<platform data dir>/wabridge`, falling back to
/// `./wabridge-state` when the platform offers no data dir.
pub fn default_state_dir() -> PathBuf {
    match dirs::data_dir() {
        Some(base) => base.join("wabridge"),
        None => {
            info!("[persist] no platform data dir — using ./wabridge-state");
            PathBuf::from("wabridge-state")
        }
    }
}
