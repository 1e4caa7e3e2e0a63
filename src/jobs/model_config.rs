//! Model catalog: named workflow templates with request mappings.
//!
//! Loaded once at startup. Each model binds a workflow file plus mappings
//! from request `input`/`options` fields onto specific node input ports,
//! and from node outputs onto the job's output fields.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::jobs::state::InputItem;
use crate::workflow::{GraphDefinition, JsonMap};

const DEFAULT_TIMEOUT_MINUTES: u64 = 20;

/// One `(node_id, input_key)` seeding target.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MappingTarget {
    pub node_id: String,
    pub input_key: String,
}

/// Where a job output field is read from in the workflow results.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputTarget {
    pub node_id: String,
    pub output_key: String,
}

/// A parameter or input may fan out to several targets; single-target
/// entries are accepted in both object and one-element-list form.
fn mapping_table<'de, D>(deserializer: D) -> Result<HashMap<String, Vec<MappingTarget>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(MappingTarget),
        Many(Vec<MappingTarget>),
    }

    let raw: HashMap<String, OneOrMany> = HashMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, entry)| {
            let targets = match entry {
                OneOrMany::One(target) => vec![target],
                OneOrMany::Many(targets) => targets,
            };
            (key, targets)
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    workflow_path: PathBuf,
    #[serde(default, deserialize_with = "mapping_table")]
    parameter_mapping: HashMap<String, Vec<MappingTarget>>,
    #[serde(default, deserialize_with = "mapping_table")]
    input_mapping: HashMap<String, Vec<MappingTarget>>,
    #[serde(default)]
    output_mapping: HashMap<String, OutputTarget>,
    #[serde(default)]
    required_inputs: Vec<String>,
    #[serde(default = "default_timeout")]
    timeout_minutes: u64,
    #[serde(default)]
    default_params: JsonMap,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MINUTES
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    default_model: Option<String>,
    #[serde(default)]
    models: HashMap<String, ModelConfigFile>,
}

/// A fully loaded model template.
#[derive(Debug)]
pub struct ModelConfig {
    pub name: String,
    pub workflow: GraphDefinition,
    pub parameter_mapping: HashMap<String, Vec<MappingTarget>>,
    pub input_mapping: HashMap<String, Vec<MappingTarget>>,
    pub output_mapping: HashMap<String, OutputTarget>,
    pub required_inputs: Vec<String>,
    pub timeout_minutes: u64,
    pub default_params: JsonMap,
}

impl ModelConfig {
    /// Whether the request inputs cover every required input type.
    pub fn validate_inputs(&self, inputs: &[InputItem]) -> bool {
        self.required_inputs
            .iter()
            .all(|required| inputs.iter().any(|item| &item.input_type == required))
    }
}

/// All models from the catalog file, plus the default model name.
#[derive(Debug)]
pub struct ModelCatalog {
    models: HashMap<String, Arc<ModelConfig>>,
    default_model: String,
}

impl ModelCatalog {
    /// Load the catalog and every referenced workflow file.
    ///
    /// `default_override` (from the environment) wins over the file's
    /// `default_model`. Relative workflow paths resolve against the catalog
    /// file's directory.
    pub fn load(path: &Path, default_override: Option<&str>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })?;
        let file: CatalogFile = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let default_model = match default_override {
            Some(name) => {
                info!("Using default model from environment: {}", name);
                name.to_string()
            }
            None => {
                let name = file.default_model.unwrap_or_default();
                info!("Using default model from config file: {}", name);
                name
            }
        };

        let mut models = HashMap::new();
        for (name, config) in file.models {
            let workflow_path = if config.workflow_path.is_relative() {
                base_dir.join(&config.workflow_path)
            } else {
                config.workflow_path.clone()
            };
            let workflow_raw =
                std::fs::read_to_string(&workflow_path).map_err(|source| ConfigError::Io {
                    path: workflow_path.display().to_string(),
                    source,
                })?;
            let workflow: GraphDefinition =
                serde_json::from_str(&workflow_raw).map_err(|source| ConfigError::Parse {
                    path: workflow_path.display().to_string(),
                    source,
                })?;

            models.insert(
                name.clone(),
                Arc::new(ModelConfig {
                    name,
                    workflow,
                    parameter_mapping: config.parameter_mapping,
                    input_mapping: config.input_mapping,
                    output_mapping: config.output_mapping,
                    required_inputs: config.required_inputs,
                    timeout_minutes: config.timeout_minutes,
                    default_params: config.default_params,
                }),
            );
        }

        if !models.contains_key(&default_model) {
            return Err(ConfigError::MissingDefaultModel(default_model));
        }

        let mut names: Vec<&String> = models.keys().collect();
        names.sort();
        info!("Loaded {} model configurations: {:?}", models.len(), names);

        Ok(Self {
            models,
            default_model,
        })
    }

    /// Look a model up by name; unknown names fall back to the default
    /// model with a warning.
    pub fn resolve(&self, name: &str) -> Arc<ModelConfig> {
        if let Some(config) = self.models.get(name) {
            return Arc::clone(config);
        }
        warn!(
            "Model '{}' not found, using default model '{}'",
            name, self.default_model
        );
        Arc::clone(&self.models[&self.default_model])
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn write_catalog(dir: &Path) -> PathBuf {
        let workflow = json!({
            "nodes": [
                {"id": "gen", "type": "AsyncServiceNode", "input_values": {}}
            ],
            "connections": []
        });
        std::fs::write(
            dir.join("workflow.json"),
            serde_json::to_string_pretty(&workflow).unwrap(),
        )
        .unwrap();

        let catalog = json!({
            "default_model": "image-to-video",
            "models": {
                "image-to-video": {
                    "workflow_path": "workflow.json",
                    "parameter_mapping": {
                        "prompt": [
                            {"node_id": "gen", "input_key": "prompt"},
                            {"node_id": "gen", "input_key": "caption"}
                        ],
                        "seed": {"node_id": "gen", "input_key": "seed"}
                    },
                    "input_mapping": {
                        "image": {"node_id": "gen", "input_key": "image_url"}
                    },
                    "output_mapping": {
                        "output_url": {"node_id": "gen", "output_key": "output_url"}
                    },
                    "required_inputs": ["image"],
                    "default_params": {"duration": 5}
                }
            }
        });
        let path = dir.join("model_config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&catalog).unwrap()).unwrap();
        path
    }

    #[test]
    fn loads_catalog_and_normalizes_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(dir.path());

        let catalog = ModelCatalog::load(&path, None).unwrap();
        assert_eq!(catalog.default_model(), "image-to-video");

        let model = catalog.resolve("image-to-video");
        assert_eq!(model.parameter_mapping["prompt"].len(), 2);
        assert_eq!(model.parameter_mapping["seed"].len(), 1);
        assert_eq!(model.timeout_minutes, DEFAULT_TIMEOUT_MINUTES);
        assert_eq!(model.workflow.nodes.len(), 1);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(dir.path());
        let catalog = ModelCatalog::load(&path, None).unwrap();

        let model = catalog.resolve("does-not-exist");
        assert_eq!(model.name, "image-to-video");
    }

    #[test]
    fn missing_default_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(dir.path());
        let err = ModelCatalog::load(&path, Some("ghost-model")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDefaultModel(name) if name == "ghost-model"));
    }

    #[test]
    fn required_inputs_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_catalog(dir.path());
        let catalog = ModelCatalog::load(&path, None).unwrap();
        let model = catalog.resolve("image-to-video");

        let with_image = vec![InputItem {
            input_type: "image".to_string(),
            url: "u".to_string(),
        }];
        let without = vec![InputItem {
            input_type: "audio".to_string(),
            url: "u".to_string(),
        }];
        assert!(model.validate_inputs(&with_image));
        assert!(!model.validate_inputs(&without));
    }
}
