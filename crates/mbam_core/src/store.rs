//! Document storage for models, geodesics, templates and iterations.
//!
//! [`Store`] is the narrow query surface the engine needs. [`MemoryStore`]
//! keeps everything in memory behind a mutex and can be snapshotted to a
//! JSON file between runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::geodesic::{GeodesicRecord, GeodesicSample, GeodesicStatus};
use crate::iteration::IterationRecord;
use crate::model::ModelDocument;
use crate::template::{stock_templates, KeyLegend, LimitKey, Template, TemplateSet};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("geodesic '{0}' is already finished")]
    GeodesicFinished(String),
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store document is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait Store: Send + Sync {
    fn legend(&self) -> Result<KeyLegend, StoreError>;

    fn set_legend(&self, legend: KeyLegend) -> Result<(), StoreError>;

    /// Saves a template unless one with the same key, expression and class
    /// exists. Returns whether it was inserted.
    fn save_template(&self, template: Template) -> Result<bool, StoreError>;

    fn save_templates(&self, templates: Vec<Template>) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for template in templates {
            if self.save_template(template)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Templates of `class` (all templates when none has that class),
    /// restricted to those `key` admits.
    fn load_templates(
        &self,
        key: Option<&LimitKey>,
        class: Option<&str>,
    ) -> Result<TemplateSet, StoreError>;

    fn init_geodesic(&self) -> Result<String, StoreError>;

    fn push_geodesic(&self, id: &str, sample: &GeodesicSample) -> Result<(), StoreError>;

    fn finish_geodesic(&self, id: &str, status: GeodesicStatus) -> Result<(), StoreError>;

    fn query_geodesic(&self, id: &str) -> Result<GeodesicRecord, StoreError>;

    fn save_model(&self, model: &ModelDocument) -> Result<String, StoreError>;

    fn load_model(&self, id: &str) -> Result<ModelDocument, StoreError>;

    /// Number of successful iterations leaving the model.
    fn hasse_children(&self, model_id: &str) -> Result<usize, StoreError>;

    /// Records `iteration_id` as leaving `model_id`.
    fn link_child(&self, model_id: &str, iteration_id: &str) -> Result<(), StoreError>;

    /// Records `iteration_id` as producing `model_id`.
    fn link_parent(&self, model_id: &str, iteration_id: &str) -> Result<(), StoreError>;

    fn save_iteration(&self, iteration: &IterationRecord) -> Result<String, StoreError>;

    fn load_iteration(&self, id: &str) -> Result<IterationRecord, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredModel {
    #[serde(flatten)]
    document: ModelDocument,
    #[serde(default)]
    to_iter: Vec<String>,
    #[serde(default)]
    from_iter: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Documents {
    next_id: u64,
    legend: KeyLegend,
    templates: Vec<Template>,
    geodesics: BTreeMap<String, GeodesicRecord>,
    models: BTreeMap<String, StoredModel>,
    iterations: BTreeMap<String, IterationRecord>,
}

impl Documents {
    fn mint_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:016x}", self.next_id)
    }

    fn model_mut(&mut self, id: &str) -> Result<&mut StoredModel, StoreError> {
        self.models.get_mut(id).ok_or_else(|| not_found("model", id))
    }

    fn geodesic_mut(&mut self, id: &str) -> Result<&mut GeodesicRecord, StoreError> {
        self.geodesics
            .get_mut(id)
            .ok_or_else(|| not_found("geodesic", id))
    }
}

fn not_found(kind: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<Documents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default legend and the seed template library.
    pub fn with_stock_templates() -> Self {
        let store = Self::new();
        store.docs.lock().templates = stock_templates();
        store
    }

    /// Restores a snapshot; a missing file gives an empty store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "no store snapshot, starting empty");
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)?;
        let docs: Documents = serde_json::from_str(&text)?;
        Ok(Self {
            docs: Mutex::new(docs),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&*self.docs.lock())?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn template_count(&self) -> usize {
        self.docs.lock().templates.len()
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.docs.lock().models.keys().cloned().collect()
    }

    pub fn geodesic_ids(&self) -> Vec<String> {
        self.docs.lock().geodesics.keys().cloned().collect()
    }
}

impl Store for MemoryStore {
    fn legend(&self) -> Result<KeyLegend, StoreError> {
        Ok(self.docs.lock().legend.clone())
    }

    fn set_legend(&self, legend: KeyLegend) -> Result<(), StoreError> {
        self.docs.lock().legend = legend;
        Ok(())
    }

    fn save_template(&self, template: Template) -> Result<bool, StoreError> {
        let mut docs = self.docs.lock();
        let exists = docs.templates.iter().any(|t| {
            t.key == template.key && t.template == template.template && t.class == template.class
        });
        if exists {
            return Ok(false);
        }
        debug!(template = %template.template, label = %template.label, class = %template.class, "template saved");
        docs.templates.push(template);
        Ok(true)
    }

    fn load_templates(
        &self,
        key: Option<&LimitKey>,
        class: Option<&str>,
    ) -> Result<TemplateSet, StoreError> {
        let docs = self.docs.lock();
        let mut selected: Vec<Template> = match class {
            Some(class) => docs
                .templates
                .iter()
                .filter(|t| t.class == class)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        if selected.is_empty() {
            if let Some(class) = class {
                warn!(class = %class, "no templates for class, using the whole library");
            }
            selected = docs.templates.clone();
        }
        let set = TemplateSet::partition(selected);
        Ok(match key {
            Some(key) => set.filter_by_key(key),
            None => set,
        })
    }

    fn init_geodesic(&self) -> Result<String, StoreError> {
        let mut docs = self.docs.lock();
        let id = docs.mint_id();
        docs.geodesics.insert(id.clone(), GeodesicRecord::default());
        Ok(id)
    }

    fn push_geodesic(&self, id: &str, sample: &GeodesicSample) -> Result<(), StoreError> {
        let mut docs = self.docs.lock();
        let record = docs.geodesic_mut(id)?;
        if record.is_done() {
            return Err(StoreError::GeodesicFinished(id.to_string()));
        }
        record.push(sample);
        Ok(())
    }

    fn finish_geodesic(&self, id: &str, status: GeodesicStatus) -> Result<(), StoreError> {
        self.docs.lock().geodesic_mut(id)?.done = Some(status);
        Ok(())
    }

    fn query_geodesic(&self, id: &str) -> Result<GeodesicRecord, StoreError> {
        self.docs
            .lock()
            .geodesics
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("geodesic", id))
    }

    fn save_model(&self, model: &ModelDocument) -> Result<String, StoreError> {
        let mut docs = self.docs.lock();
        let id = docs.mint_id();
        docs.models.insert(
            id.clone(),
            StoredModel {
                document: model.clone(),
                to_iter: Vec::new(),
                from_iter: Vec::new(),
            },
        );
        Ok(id)
    }

    fn load_model(&self, id: &str) -> Result<ModelDocument, StoreError> {
        self.docs
            .lock()
            .models
            .get(id)
            .map(|stored| stored.document.clone())
            .ok_or_else(|| not_found("model", id))
    }

    fn hasse_children(&self, model_id: &str) -> Result<usize, StoreError> {
        Ok(self.docs.lock().model_mut(model_id)?.to_iter.len())
    }

    fn link_child(&self, model_id: &str, iteration_id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.lock();
        let links = &mut docs.model_mut(model_id)?.to_iter;
        if !links.iter().any(|id| id == iteration_id) {
            links.push(iteration_id.to_string());
        }
        Ok(())
    }

    fn link_parent(&self, model_id: &str, iteration_id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.lock();
        let links = &mut docs.model_mut(model_id)?.from_iter;
        if !links.iter().any(|id| id == iteration_id) {
            links.push(iteration_id.to_string());
        }
        Ok(())
    }

    fn save_iteration(&self, iteration: &IterationRecord) -> Result<String, StoreError> {
        let mut docs = self.docs.lock();
        let id = docs.mint_id();
        docs.iterations.insert(id.clone(), iteration.clone());
        Ok(id)
    }

    fn load_iteration(&self, id: &str) -> Result<IterationRecord, StoreError> {
        self.docs
            .lock()
            .iterations
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("iteration", id))
    }
}
