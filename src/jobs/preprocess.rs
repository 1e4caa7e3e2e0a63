//! Request preprocessing: defaults, seed, input grouping, and template
//! seeding.

use rand::Rng;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::jobs::model_config::ModelConfig;
use crate::jobs::state::InputItem;
use crate::workflow::{GraphDefinition, JsonMap};

/// A model workflow with all request data seeded into its nodes.
pub struct PreparedJob {
    pub workflow: GraphDefinition,
    pub options: JsonMap,
}

/// Preprocess a job request into a ready-to-run workflow definition.
///
/// Options are merged over the model's defaults, `seed` is filled with a
/// random u32 when absent, inputs are grouped by type, and the model's
/// input and parameter mappings seed the template's node input values.
pub fn preprocess_job(
    config: &ModelConfig,
    input: &[InputItem],
    options: &JsonMap,
    job_id: &str,
) -> PreparedJob {
    let options = preprocess_options(config, options, job_id);
    let grouped = group_inputs(input);

    let mut workflow = config.workflow.clone();

    for (input_key, url) in &grouped {
        for target in config.input_mapping.get(input_key).into_iter().flatten() {
            if !workflow.seed_input(&target.node_id, &target.input_key, json!(url)) {
                warn!(
                    job_id = %job_id,
                    node_id = %target.node_id,
                    "Input mapping targets a node missing from the workflow"
                );
            }
        }
    }

    for (param, value) in &options {
        if value.is_null() {
            continue;
        }
        for target in config.parameter_mapping.get(param).into_iter().flatten() {
            if !workflow.seed_input(&target.node_id, &target.input_key, value.clone()) {
                warn!(
                    job_id = %job_id,
                    node_id = %target.node_id,
                    "Parameter mapping targets a node missing from the workflow"
                );
            }
        }
    }

    PreparedJob { workflow, options }
}

/// Merge model defaults into the provided options and fill the seed.
fn preprocess_options(config: &ModelConfig, options: &JsonMap, job_id: &str) -> JsonMap {
    let mut processed = options.clone();

    for (param, default) in &config.default_params {
        let absent = processed.get(param).is_none_or(Value::is_null);
        if absent {
            processed.insert(param.clone(), default.clone());
        }
    }

    let seed_absent = processed.get("seed").is_none_or(Value::is_null);
    if seed_absent {
        let seed: u32 = rand::thread_rng().r#gen();
        processed.insert("seed".to_string(), json!(seed));
    }
    if let Some(seed) = processed.get("seed") {
        info!(job_id = %job_id, "Using seed: {}", seed);
    }

    processed
}

/// Group inputs by type: a singleton keeps its type as key, duplicates get
/// numbered keys (`image1`, `image2`, ...).
fn group_inputs(input: &[InputItem]) -> Vec<(String, String)> {
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for item in input {
        *counts.entry(item.input_type.as_str()).or_default() += 1;
    }

    let mut indices: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    input
        .iter()
        .map(|item| {
            let ty = item.input_type.as_str();
            let key = if counts[ty] > 1 {
                let index = indices.entry(ty).or_default();
                *index += 1;
                format!("{ty}{index}")
            } else {
                ty.to_string()
            };
            (key, item.url.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::jobs::model_config::MappingTarget;

    fn model_config() -> ModelConfig {
        let workflow: GraphDefinition = serde_json::from_value(json!({
            "nodes": [
                {"id": "gen", "type": "AsyncServiceNode"},
                {"id": "caption", "type": "TextInputNode"}
            ],
            "connections": []
        }))
        .unwrap();

        let mut parameter_mapping = HashMap::new();
        parameter_mapping.insert(
            "prompt".to_string(),
            vec![
                MappingTarget {
                    node_id: "gen".to_string(),
                    input_key: "prompt".to_string(),
                },
                MappingTarget {
                    node_id: "caption".to_string(),
                    input_key: "text".to_string(),
                },
            ],
        );

        let mut input_mapping = HashMap::new();
        input_mapping.insert(
            "image".to_string(),
            vec![MappingTarget {
                node_id: "gen".to_string(),
                input_key: "image_url".to_string(),
            }],
        );
        input_mapping.insert(
            "image1".to_string(),
            vec![MappingTarget {
                node_id: "gen".to_string(),
                input_key: "first_image".to_string(),
            }],
        );

        let mut default_params = JsonMap::new();
        default_params.insert("duration".to_string(), json!(5));

        ModelConfig {
            name: "test".to_string(),
            workflow,
            parameter_mapping,
            input_mapping,
            output_mapping: HashMap::new(),
            required_inputs: vec![],
            timeout_minutes: 20,
            default_params,
        }
    }

    fn image(url: &str) -> InputItem {
        InputItem {
            input_type: "image".to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn seed_filled_when_absent() {
        let config = model_config();
        let prepared = preprocess_job(&config, &[], &JsonMap::new(), "j1");
        let seed = prepared.options["seed"].as_u64().unwrap();
        assert!(seed <= u64::from(u32::MAX));
    }

    #[test]
    fn provided_seed_is_kept() {
        let config = model_config();
        let mut options = JsonMap::new();
        options.insert("seed".to_string(), json!(1234));
        let prepared = preprocess_job(&config, &[], &options, "j1");
        assert_eq!(prepared.options["seed"], json!(1234));
    }

    #[test]
    fn defaults_merge_without_clobbering() {
        let config = model_config();
        let mut options = JsonMap::new();
        options.insert("duration".to_string(), json!(9));
        let prepared = preprocess_job(&config, &[], &options, "j1");
        assert_eq!(prepared.options["duration"], json!(9));

        let prepared = preprocess_job(&config, &[], &JsonMap::new(), "j1");
        assert_eq!(prepared.options["duration"], json!(5));
    }

    #[test]
    fn singleton_input_keeps_bare_type_key() {
        let config = model_config();
        let prepared = preprocess_job(&config, &[image("http://a")], &JsonMap::new(), "j1");
        let r#gen = prepared
            .workflow
            .nodes
            .iter()
            .find(|n| n.id.as_deref() == Some("gen"))
            .unwrap();
        assert_eq!(r#gen.input_values["image_url"], json!("http://a"));
    }

    #[test]
    fn duplicate_inputs_get_numbered_keys() {
        let config = model_config();
        let prepared = preprocess_job(
            &config,
            &[image("http://a"), image("http://b")],
            &JsonMap::new(),
            "j1",
        );
        let r#gen = prepared
            .workflow
            .nodes
            .iter()
            .find(|n| n.id.as_deref() == Some("gen"))
            .unwrap();
        // "image1" maps to first_image; bare "image" maps to nothing now.
        assert_eq!(r#gen.input_values["first_image"], json!("http://a"));
        assert!(!r#gen.input_values.contains_key("image_url"));
    }

    #[test]
    fn parameter_fans_out_to_every_target() {
        let config = model_config();
        let mut options = JsonMap::new();
        options.insert("prompt".to_string(), json!("a cat"));
        let prepared = preprocess_job(&config, &[], &options, "j1");

        let r#gen = prepared
            .workflow
            .nodes
            .iter()
            .find(|n| n.id.as_deref() == Some("gen"))
            .unwrap();
        let caption = prepared
            .workflow
            .nodes
            .iter()
            .find(|n| n.id.as_deref() == Some("caption"))
            .unwrap();
        assert_eq!(r#gen.input_values["prompt"], json!("a cat"));
        assert_eq!(caption.input_values["text"], json!("a cat"));
    }
}
