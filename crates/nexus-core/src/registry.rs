//! The set of canvases and the pointer to the active one.
//!
//! Lock order is registry, then canvas. Canvas mutations never touch the
//! registry lock, so holding a canvas lock while waiting on the registry
//! cannot happen.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::canvas::{Canvas, CanvasEntry, CanvasMeta};
use crate::error::{Entity, Error, Result};
use crate::model::CanvasId;
use crate::storage::{RegistryPointer, Storage};

pub const DEFAULT_CANVAS_ID: &str = "default";
pub const DEFAULT_CANVAS_NAME: &str = "Main Canvas";

const SLUG_MAX: usize = 32;

struct RegistryState {
    canvases: BTreeMap<CanvasId, Arc<Canvas>>,
    active: CanvasId,
}

pub struct CanvasRegistry {
    storage: Arc<dyn Storage>,
    state: RwLock<RegistryState>,
}

impl CanvasRegistry {
    /// Loads every stored canvas and restores the active pointer.
    ///
    /// The default canvas is created on first run. A canvas whose record
    /// cannot be read or fails validation is skipped and logged, except the
    /// default canvas, whose failure is fatal.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let default_id = CanvasId::from(DEFAULT_CANVAS_ID);
        let mut canvases = BTreeMap::new();
        for id in storage.list_canvases()? {
            match Canvas::load(storage.clone(), &id) {
                Ok(Some(canvas)) => {
                    canvases.insert(id, Arc::new(canvas));
                }
                Ok(None) => {}
                Err(e) if id == default_id => return Err(e),
                Err(e) => {
                    tracing::error!(canvas = %id, error = %e, "skipping unreadable canvas");
                }
            }
        }

        if !canvases.contains_key(&default_id) {
            let meta = CanvasMeta::new(default_id.clone(), DEFAULT_CANVAS_NAME);
            let canvas = Canvas::create(storage.clone(), meta)?;
            tracing::info!(canvas = %default_id, "created default canvas");
            canvases.insert(default_id.clone(), Arc::new(canvas));
        }

        let stored = match storage.load_pointer() {
            Ok(pointer) => pointer.map(|p| p.active_id),
            Err(e) => {
                tracing::warn!(error = %e, "active canvas pointer unreadable, using default");
                None
            }
        };
        let active = match &stored {
            Some(id) if canvases.contains_key(id) => id.clone(),
            _ => default_id,
        };
        if stored.as_ref() != Some(&active) {
            storage.save_pointer(&RegistryPointer {
                active_id: active.clone(),
            })?;
        }

        tracing::info!(canvases = canvases.len(), active = %active, "canvas registry opened");
        Ok(Self {
            storage,
            state: RwLock::new(RegistryState { canvases, active }),
        })
    }

    pub fn active_id(&self) -> CanvasId {
        self.state.read().active.clone()
    }

    /// The canvas every unqualified graph, context and chat call targets.
    pub fn active(&self) -> Result<Arc<Canvas>> {
        let state = self.state.read();
        state
            .canvases
            .get(&state.active)
            .cloned()
            .ok_or_else(|| Error::NotFound(Entity::Canvas(state.active.clone())))
    }

    pub fn get(&self, id: &str) -> Result<Arc<Canvas>> {
        self.state
            .read()
            .canvases
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(Entity::Canvas(CanvasId::from(id))))
    }

    /// Creates and persists an empty canvas. The active canvas is unchanged.
    pub fn create(&self, name: &str) -> Result<CanvasMeta> {
        let name = require_name(name)?;
        let mut state = self.state.write();
        let id = loop {
            let candidate = CanvasId::from(format!("{}-{}", slug(name), short_suffix()));
            if !state.canvases.contains_key(&candidate) {
                break candidate;
            }
        };

        let meta = CanvasMeta::new(id.clone(), name);
        let canvas = match Canvas::create(self.storage.clone(), meta.clone()) {
            Ok(canvas) => canvas,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete_canvas(&id) {
                    tracing::warn!(canvas = %id, error = %cleanup, "cleanup after failed create");
                }
                return Err(e);
            }
        };
        state.canvases.insert(id.clone(), Arc::new(canvas));
        tracing::info!(canvas = %id, name, "canvas created");
        Ok(meta)
    }

    /// Every canvas, most recently modified first.
    pub fn list(&self) -> Vec<CanvasEntry> {
        let state = self.state.read();
        let mut entries: Vec<CanvasEntry> = state
            .canvases
            .values()
            .map(|canvas| CanvasEntry {
                meta: canvas.meta(),
                is_active: canvas.id() == &state.active,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.meta
                .last_modified
                .cmp(&a.meta.last_modified)
                .then_with(|| a.meta.id.cmp(&b.meta.id))
        });
        entries
    }

    /// Switches the active pointer. Waits for in-flight mutations on the
    /// canvas being deactivated before swapping.
    pub fn activate(&self, id: &str) -> Result<CanvasMeta> {
        let mut state = self.state.write();
        let target = state
            .canvases
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(Entity::Canvas(CanvasId::from(id))))?;
        if &state.active == target.id() {
            return Ok(target.meta());
        }

        let current = state.canvases.get(&state.active).cloned();
        let quiesced = current.as_ref().map(|c| c.quiesce());
        self.storage.save_pointer(&RegistryPointer {
            active_id: target.id().clone(),
        })?;
        let previous = std::mem::replace(&mut state.active, target.id().clone());
        drop(quiesced);

        tracing::info!(from = %previous, to = %target.id(), "canvas activated");
        Ok(target.meta())
    }

    pub fn rename(&self, id: &str, name: &str) -> Result<CanvasMeta> {
        let name = require_name(name)?;
        let meta = self.get(id)?.rename(name)?;
        tracing::info!(canvas = %meta.id, name, "canvas renamed");
        Ok(meta)
    }

    /// Deletes a canvas and everything stored for it. The default canvas is
    /// protected. Deleting the active canvas moves the pointer to the
    /// default canvas first.
    pub fn delete(&self, id: &str) -> Result<()> {
        if id == DEFAULT_CANVAS_ID {
            return Err(Error::ProtectedCanvas(CanvasId::from(id)));
        }
        let mut state = self.state.write();
        let canvas = state
            .canvases
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(Entity::Canvas(CanvasId::from(id))))?;
        let mut guard = canvas.quiesce();

        let default_id = CanvasId::from(DEFAULT_CANVAS_ID);
        let was_active = &state.active == canvas.id();
        if was_active {
            self.storage.save_pointer(&RegistryPointer {
                active_id: default_id.clone(),
            })?;
        }
        if let Err(e) = self.storage.delete_canvas(canvas.id()) {
            if was_active {
                let restore = RegistryPointer {
                    active_id: canvas.id().clone(),
                };
                if let Err(re) = self.storage.save_pointer(&restore) {
                    tracing::error!(canvas = %id, error = %re, "could not restore active pointer");
                }
            }
            return Err(e.into());
        }

        guard.retire();
        drop(guard);
        state.canvases.remove(id);
        if was_active {
            state.active = default_id;
        }
        tracing::info!(canvas = %id, was_active, "canvas deleted");
        Ok(())
    }
}

fn require_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid("canvas name must not be empty"));
    }
    Ok(name)
}

/// Lowercase `[a-z0-9_]` form of a canvas name, for readable ids.
fn slug(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let trimmed: String = mapped.trim_matches('_').chars().take(SLUG_MAX).collect();
    if trimmed.is_empty() {
        "canvas".to_string()
    } else {
        trimmed
    }
}

fn short_suffix() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}
