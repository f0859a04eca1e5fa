//! Durable state behind the registry.
//!
//! Each canvas owns a namespace holding its record, settings, chat log and
//! topic/module structure.
//! Nothing written for one canvas is ever read or removed through another
//! canvas's namespace.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::canvas::CanvasMeta;
use crate::chat::ChatSession;
use crate::error::PersistenceError;
use crate::graph::GraphStore;
use crate::model::{CanvasId, Edge, Node};
use crate::settings::CanvasSettings;
use crate::structure::Structure;

type StorageResult<T> = std::result::Result<T, PersistenceError>;

/// The durable form of one canvas graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasRecord {
    pub meta: CanvasMeta,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl CanvasRecord {
    pub fn new(meta: &CanvasMeta, graph: &GraphStore) -> Self {
        let snapshot = graph.snapshot();
        Self {
            meta: meta.clone(),
            nodes: snapshot.nodes,
            edges: snapshot.edges,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryPointer {
    pub active_id: CanvasId,
}

pub trait Storage: Send + Sync {
    fn load_pointer(&self) -> StorageResult<Option<RegistryPointer>>;
    fn save_pointer(&self, pointer: &RegistryPointer) -> StorageResult<()>;

    /// Ids of every canvas with a stored record.
    fn list_canvases(&self) -> StorageResult<Vec<CanvasId>>;
    fn load_record(&self, id: &CanvasId) -> StorageResult<Option<CanvasRecord>>;
    fn save_record(&self, record: &CanvasRecord) -> StorageResult<()>;

    fn load_settings(&self, id: &CanvasId) -> StorageResult<Option<CanvasSettings>>;
    fn save_settings(&self, id: &CanvasId, settings: &CanvasSettings) -> StorageResult<()>;

    fn load_chat(&self, id: &CanvasId) -> StorageResult<Vec<ChatSession>>;
    fn save_chat(&self, id: &CanvasId, sessions: &[ChatSession]) -> StorageResult<()>;

    fn load_structure(&self, id: &CanvasId) -> StorageResult<Option<Structure>>;
    fn save_structure(&self, id: &CanvasId, structure: &Structure) -> StorageResult<()>;

    /// Removes everything stored under the canvas namespace.
    fn delete_canvas(&self, id: &CanvasId) -> StorageResult<()>;
}

const REGISTRY_FILE: &str = "registry.json";
const CANVASES_DIR: &str = "canvases";
const RECORD_FILE: &str = "canvas.json";
const SETTINGS_FILE: &str = "settings.json";
const CHAT_FILE: &str = "chat.json";
const STRUCTURE_FILE: &str = "structure.json";

/// JSON files under a root directory.
///
/// ```text
/// <root>/registry.json
/// <root>/canvases/<canvas-id>/canvas.json
/// <root>/canvases/<canvas-id>/settings.json
/// <root>/canvases/<canvas-id>/chat.json
/// <root>/canvases/<canvas-id>/structure.json
/// ```
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn canvas_dir(&self, op: &'static str, id: &CanvasId) -> StorageResult<PathBuf> {
        let raw = id.as_str();
        if raw.is_empty() || raw == "." || raw == ".." || raw.contains(['/', '\\']) {
            return Err(PersistenceError::new(op, Some(id), "canvas id is not a valid namespace"));
        }
        Ok(self.root.join(CANVASES_DIR).join(raw))
    }

    fn read_json<T: DeserializeOwned>(
        &self,
        op: &'static str,
        canvas: Option<&CanvasId>,
        path: &Path,
    ) -> StorageResult<Option<T>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "{op} failed");
                return Err(PersistenceError::io(op, canvas, &e));
            }
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "{op} failed");
            PersistenceError::codec(op, canvas, &e)
        })
    }

    /// Writes through a temp file and a rename so readers never observe a
    /// half-written file.
    fn write_json<T: Serialize + ?Sized>(
        &self,
        op: &'static str,
        canvas: Option<&CanvasId>,
        path: &Path,
        value: &T,
    ) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| PersistenceError::codec(op, canvas, &e))?;
        let io_err = |e: io::Error| {
            tracing::error!(path = %path.display(), error = %e, "{op} failed");
            PersistenceError::io(op, canvas, &e)
        };
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(io_err)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{file_name}.tmp"));
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}

impl Storage for FsStorage {
    fn load_pointer(&self) -> StorageResult<Option<RegistryPointer>> {
        self.read_json("read registry", None, &self.root.join(REGISTRY_FILE))
    }

    fn save_pointer(&self, pointer: &RegistryPointer) -> StorageResult<()> {
        self.write_json("write registry", None, &self.root.join(REGISTRY_FILE), pointer)
    }

    fn list_canvases(&self) -> StorageResult<Vec<CanvasId>> {
        let dir = self.root.join(CANVASES_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                tracing::error!(path = %dir.display(), error = %e, "list canvases failed");
                return Err(PersistenceError::io("list canvases", None, &e));
            }
        };
        let mut ids: Vec<CanvasId> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                if !entry.path().join(RECORD_FILE).is_file() {
                    return None;
                }
                Some(CanvasId::from(entry.file_name().to_string_lossy().into_owned()))
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_record(&self, id: &CanvasId) -> StorageResult<Option<CanvasRecord>> {
        let op = "read canvas record";
        let path = self.canvas_dir(op, id)?.join(RECORD_FILE);
        self.read_json(op, Some(id), &path)
    }

    fn save_record(&self, record: &CanvasRecord) -> StorageResult<()> {
        let op = "write canvas record";
        let id = &record.meta.id;
        let path = self.canvas_dir(op, id)?.join(RECORD_FILE);
        self.write_json(op, Some(id), &path, record)
    }

    fn load_settings(&self, id: &CanvasId) -> StorageResult<Option<CanvasSettings>> {
        let op = "read settings";
        let path = self.canvas_dir(op, id)?.join(SETTINGS_FILE);
        self.read_json(op, Some(id), &path)
    }

    fn save_settings(&self, id: &CanvasId, settings: &CanvasSettings) -> StorageResult<()> {
        let op = "write settings";
        let path = self.canvas_dir(op, id)?.join(SETTINGS_FILE);
        self.write_json(op, Some(id), &path, settings)
    }

    fn load_chat(&self, id: &CanvasId) -> StorageResult<Vec<ChatSession>> {
        let op = "read chat log";
        let path = self.canvas_dir(op, id)?.join(CHAT_FILE);
        Ok(self.read_json(op, Some(id), &path)?.unwrap_or_default())
    }

    fn save_chat(&self, id: &CanvasId, sessions: &[ChatSession]) -> StorageResult<()> {
        let op = "write chat log";
        let path = self.canvas_dir(op, id)?.join(CHAT_FILE);
        self.write_json(op, Some(id), &path, sessions)
    }

    fn load_structure(&self, id: &CanvasId) -> StorageResult<Option<Structure>> {
        let op = "read structure";
        let path = self.canvas_dir(op, id)?.join(STRUCTURE_FILE);
        self.read_json(op, Some(id), &path)
    }

    fn save_structure(&self, id: &CanvasId, structure: &Structure) -> StorageResult<()> {
        let op = "write structure";
        let path = self.canvas_dir(op, id)?.join(STRUCTURE_FILE);
        self.write_json(op, Some(id), &path, structure)
    }

    fn delete_canvas(&self, id: &CanvasId) -> StorageResult<()> {
        let op = "delete canvas";
        let dir = self.canvas_dir(op, id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                tracing::error!(path = %dir.display(), error = %e, "{op} failed");
                Err(PersistenceError::io(op, Some(id), &e))
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    pointer: Option<RegistryPointer>,
    records: BTreeMap<CanvasId, CanvasRecord>,
    settings: BTreeMap<CanvasId, CanvasSettings>,
    chat: BTreeMap<CanvasId, Vec<ChatSession>>,
    structures: BTreeMap<CanvasId, Structure>,
}

/// Process-local storage for ephemeral deployments and tests. Contents are
/// lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load_pointer(&self) -> StorageResult<Option<RegistryPointer>> {
        Ok(self.state.lock().pointer.clone())
    }

    fn save_pointer(&self, pointer: &RegistryPointer) -> StorageResult<()> {
        self.state.lock().pointer = Some(pointer.clone());
        Ok(())
    }

    fn list_canvases(&self) -> StorageResult<Vec<CanvasId>> {
        Ok(self.state.lock().records.keys().cloned().collect())
    }

    fn load_record(&self, id: &CanvasId) -> StorageResult<Option<CanvasRecord>> {
        Ok(self.state.lock().records.get(id).cloned())
    }

    fn save_record(&self, record: &CanvasRecord) -> StorageResult<()> {
        self.state
            .lock()
            .records
            .insert(record.meta.id.clone(), record.clone());
        Ok(())
    }

    fn load_settings(&self, id: &CanvasId) -> StorageResult<Option<CanvasSettings>> {
        Ok(self.state.lock().settings.get(id).cloned())
    }

    fn save_settings(&self, id: &CanvasId, settings: &CanvasSettings) -> StorageResult<()> {
        self.state
            .lock()
            .settings
            .insert(id.clone(), settings.clone());
        Ok(())
    }

    fn load_chat(&self, id: &CanvasId) -> StorageResult<Vec<ChatSession>> {
        Ok(self.state.lock().chat.get(id).cloned().unwrap_or_default())
    }

    fn save_chat(&self, id: &CanvasId, sessions: &[ChatSession]) -> StorageResult<()> {
        self.state.lock().chat.insert(id.clone(), sessions.to_vec());
        Ok(())
    }

    fn load_structure(&self, id: &CanvasId) -> StorageResult<Option<Structure>> {
        Ok(self.state.lock().structures.get(id).cloned())
    }

    fn save_structure(&self, id: &CanvasId, structure: &Structure) -> StorageResult<()> {
        self.state
            .lock()
            .structures
            .insert(id.clone(), structure.clone());
        Ok(())
    }

    fn delete_canvas(&self, id: &CanvasId) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.records.remove(id);
        state.settings.remove(id);
        state.chat.remove(id);
        state.structures.remove(id);
        Ok(())
    }
}
