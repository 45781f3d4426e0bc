//! Lookup of templates by identifier
//!
//! The registry always holds the built-in `default` sheet. Additional
//! templates can be dropped into a directory as `<id>.json`; they are parsed and
//! validated once at startup.

use super::{default_template_config, Template, TemplateConfig};
use crate::error::ScanError;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_TEMPLATE_ID: &str = "default";

/// Summary of a registered template
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub id: String,
    pub question_count: usize,
    pub page_width: u32,
    pub page_height: u32,
    pub blocks: Vec<String>,
}

/// Registry of available templates
pub struct TemplateRegistry {
    templates: Vec<Arc<Template>>,
}

impl TemplateRegistry {
    /// Registry holding only the built-in default template
    pub fn builtin() -> Result<Self, ScanError> {
        let default = Template::from_config(DEFAULT_TEMPLATE_ID, &default_template_config())?;
        Ok(Self {
            templates: vec![Arc::new(default)],
        })
    }

    /// Built-in templates plus every `*.json` config found in `dir`
    pub fn load(dir: Option<&Path>) -> Result<Self, ScanError> {
        let mut registry = Self::builtin()?;
        let Some(dir) = dir else {
            return Ok(registry);
        };

        let entries = std::fs::read_dir(dir).map_err(|e| {
            ScanError::Internal(format!(
                "Failed to read templates directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                ScanError::Internal(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let config: TemplateConfig = serde_json::from_str(&raw).map_err(|e| {
                ScanError::InvalidTemplate(format!("{}: {}", path.display(), e))
            })?;
            let template = Template::from_config(id, &config)?;
            tracing::info!(
                "Loaded template {} ({} questions) from {}",
                id,
                template.question_count(),
                path.display()
            );
            registry.insert(template);
        }

        Ok(registry)
    }

    /// Register a template, replacing any with the same id
    pub fn insert(&mut self, template: Template) {
        self.templates.retain(|t| t.id != template.id);
        self.templates.push(Arc::new(template));
    }

    /// Get a template by id
    pub fn get(&self, id: &str) -> Option<Arc<Template>> {
        self.templates.iter().find(|t| t.id == id).cloned()
    }

    /// Get a template by id or fail with `TemplateNotFound`
    pub fn require(&self, id: &str) -> Result<Arc<Template>, ScanError> {
        self.get(id)
            .ok_or_else(|| ScanError::TemplateNotFound(id.to_string()))
    }

    /// Get the default template
    pub fn default(&self) -> Option<Arc<Template>> {
        self.get(DEFAULT_TEMPLATE_ID)
    }

    /// List all registered template ids
    pub fn list(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.id.as_str()).collect()
    }

    /// Get info about all registered templates
    pub fn info(&self) -> Vec<TemplateInfo> {
        self.templates
            .iter()
            .map(|t| TemplateInfo {
                id: t.id.clone(),
                question_count: t.question_count(),
                page_width: t.page.width,
                page_height: t.page.height,
                blocks: t.blocks.iter().map(|b| b.name.clone()).collect(),
            })
            .collect()
    }
}
