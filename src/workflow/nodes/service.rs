//! Remote service nodes.
//!
//! Two shapes. A synchronous call POSTs and transforms the immediate
//! response. An asynchronous call POSTs, reads the remote job `id` and
//! `pod_url` from the immediate response, registers the id with the
//! callback coordinator, and suspends until the remote service delivers its
//! webhook. Cancellation (and timeout) best-effort POSTs the remote cancel
//! endpoint `{pod_url}/cancel/{id}` before propagating.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::callback::CallbackHandler;
use crate::error::{CallbackError, NodeError};
use crate::registry::NodeRegistration;
use crate::workflow::node::{
    JsonMap, NodeBehavior, NodeContext, NodeSchema, opt_f64, req_str,
};
use crate::workflow::port::Port;

/// Default seconds an async service node waits for its callback.
const DEFAULT_CALLBACK_TIMEOUT_SECS: f64 = 60.0;

pub(super) fn registrations() -> Vec<NodeRegistration> {
    vec![
        NodeRegistration {
            type_name: "HttpServiceNode",
            category: "services",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("api_url", "string"))
                .input(Port::required("payload", "object"))
                .output(Port::out("response", "object"))
                .output(Port::out("status", "string")),
            construct: || Arc::new(HttpService),
        },
        NodeRegistration {
            type_name: "AsyncServiceNode",
            category: "services",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("api_url", "string"))
                .input(
                    Port::required("request", "object")
                        .with_tooltip("Request body; the webhook URL is injected automatically"),
                )
                .input(
                    Port::optional("timeout", "number")
                        .with_default(DEFAULT_CALLBACK_TIMEOUT_SECS)
                        .with_tooltip("Seconds to wait for the service callback"),
                )
                .output(Port::out("output_url", "string"))
                .output(Port::out("output_urls", "array"))
                .output(Port::out("status", "string"))
                .output(Port::out("options", "object")),
            construct: || Arc::new(AsyncService),
        },
        NodeRegistration {
            type_name: "ModelServiceNode",
            category: "services",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("api_url", "string"))
                .input(Port::required("model", "string"))
                .input(Port::required("input", "array"))
                .input(Port::optional("prompt", "string").with_default(""))
                .input(Port::optional("audio_prompt", "string").with_default(""))
                .input(Port::optional("negative_prompt", "string").with_default(""))
                .input(Port::optional("width", "number").with_default(768))
                .input(Port::optional("height", "number").with_default(768))
                .input(Port::optional("batch_size", "number").with_default(1))
                .input(Port::optional("output_format", "string"))
                .input(Port::optional("seed", "number"))
                .input(Port::optional("extra_options", "object").with_default(json!({})))
                .input(Port::optional("timeout", "number").with_default(DEFAULT_CALLBACK_TIMEOUT_SECS))
                .output(Port::out("local_urls", "array"))
                .output(Port::out("wasabi_urls", "array"))
                .output(Port::out("aws_urls", "array"))
                .output(Port::out("options", "object"))
                .output(Port::out("status", "string"))
                .output(Port::out("metadata", "object")),
            construct: || Arc::new(ModelService),
        },
    ]
}

/// Best-effort remote cancellation. Failure is logged and swallowed; the
/// local cancellation proceeds regardless.
async fn cancel_remote(ctx: &NodeContext, cancel_url: Option<&str>, remote_id: &str) {
    let Some(base) = cancel_url else {
        info!(remote_id = %remote_id, "No cancel URL available, remote job left running");
        return;
    };
    let url = format!("{base}/{remote_id}");
    match ctx.env.client.post_json(&url, &json!({"job_id": remote_id})).await {
        Ok(_) => info!(remote_id = %remote_id, "Remote job cancelled"),
        Err(e) => warn!(remote_id = %remote_id, "Failed to cancel remote job: {}", e),
    }
}

/// Run the asynchronous remote-call protocol.
///
/// The request body is posted as-is; callers inject the webhook URL first.
pub(crate) async fn call_async_service(
    ctx: &NodeContext,
    url: &str,
    request: &Value,
    timeout: Option<Duration>,
    handler: CallbackHandler,
) -> Result<JsonMap, NodeError> {
    // The POST itself is cancellable: dropping the future aborts the
    // in-flight request, and no remote job exists yet to clean up.
    let response = tokio::select! {
        response = ctx.env.client.post_json(url, request) => response?,
        _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
    };

    let remote_id = response
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            NodeError::ExecutionFailed("no job id returned from service".to_string())
        })?;

    let cancel_url = response
        .get("pod_url")
        .and_then(Value::as_str)
        .map(|p| format!("{}/cancel", p.trim_end_matches('/')));
    if cancel_url.is_none() {
        info!(remote_id = %remote_id, "No pod_url in response, remote cancellation unavailable");
    }

    let coordinator = Arc::clone(&ctx.env.coordinator);
    coordinator
        .register(remote_id.clone(), handler)
        .await
        .map_err(|e| NodeError::ExecutionFailed(e.to_string()))?;

    info!(remote_id = %remote_id, "Waiting for service callback");

    tokio::select! {
        outcome = coordinator.wait(&remote_id, timeout) => match outcome {
            Ok(Value::Object(outputs)) => Ok(outputs),
            Ok(_) => Err(NodeError::CallbackFailed(
                "callback handler returned a non-object result".to_string(),
            )),
            Err(CallbackError::Timeout(_)) => {
                warn!(remote_id = %remote_id, "Callback timed out, cancelling remote job");
                cancel_remote(ctx, cancel_url.as_deref(), &remote_id).await;
                Err(NodeError::CallbackTimeout(remote_id))
            }
            Err(CallbackError::Cancelled) => Err(NodeError::Cancelled),
            Err(CallbackError::HandlerFailed(message)) => Err(NodeError::CallbackFailed(message)),
            Err(e) => Err(NodeError::ExecutionFailed(e.to_string())),
        },
        _ = ctx.cancel.cancelled() => {
            coordinator.unregister(&remote_id).await;
            cancel_remote(ctx, cancel_url.as_deref(), &remote_id).await;
            Err(NodeError::Cancelled)
        }
    }
}

fn timeout_from(inputs: &JsonMap) -> Option<Duration> {
    let seconds = opt_f64(inputs, "timeout").unwrap_or(DEFAULT_CALLBACK_TIMEOUT_SECS);
    (seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}

struct HttpService;

#[async_trait]
impl NodeBehavior for HttpService {
    async fn process(&self, inputs: &JsonMap, ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let url = req_str(inputs, "api_url")?;
        let payload = inputs
            .get("payload")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("payload".to_string()))?;

        let response = tokio::select! {
            response = ctx.env.client.post_json(url, &payload) => response?,
            _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
        };

        let mut out = JsonMap::new();
        out.insert("response".to_string(), response);
        out.insert("status".to_string(), json!("completed"));
        Ok(out)
    }
}

struct AsyncService;

impl AsyncService {
    /// Map the service callback to node outputs: `output_url` is the first
    /// local URL, failures carry the remote error through.
    fn handler() -> CallbackHandler {
        Arc::new(|callback: Value| {
            Box::pin(async move {
                let status = callback.get("status").and_then(Value::as_str).unwrap_or("");
                match status {
                    "completed" => {
                        let urls = callback
                            .get("localUrls")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        Ok(json!({
                            "output_url": urls.first().cloned().unwrap_or(Value::Null),
                            "output_urls": urls,
                            "status": "completed",
                            "options": callback.get("options").cloned().unwrap_or(json!({})),
                        }))
                    }
                    "failed" => {
                        let message = callback
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("Unknown error");
                        Err(NodeError::ExecutionFailed(message.to_string()))
                    }
                    other => Err(NodeError::ExecutionFailed(format!(
                        "unexpected callback status '{other}'"
                    ))),
                }
            })
        })
    }
}

#[async_trait]
impl NodeBehavior for AsyncService {
    async fn process(&self, inputs: &JsonMap, ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let url = req_str(inputs, "api_url")?;
        let mut request = inputs
            .get("request")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("request".to_string()))?;
        if let Value::Object(map) = &mut request {
            map.insert("webhookUrl".to_string(), json!(ctx.env.client.webhook_url()));
        }

        call_async_service(ctx, url, &request, timeout_from(inputs), Self::handler()).await
    }
}

struct ModelService;

impl ModelService {
    fn handler() -> CallbackHandler {
        Arc::new(|callback: Value| {
            Box::pin(async move {
                let status = callback.get("status").and_then(Value::as_str).unwrap_or("");
                match status {
                    "completed" => Ok(json!({
                        "status": "completed",
                        "local_urls": callback.get("local_outputs").cloned().unwrap_or(json!([])),
                        "wasabi_urls": callback.get("wasabi_outputs").cloned().unwrap_or(json!([])),
                        "aws_urls": callback.get("outputs").cloned().unwrap_or(json!([])),
                        "options": callback.get("options").cloned().unwrap_or(json!({})),
                        "metadata": callback.get("metadata").cloned().unwrap_or(json!({})),
                    })),
                    "failed" => {
                        let message = callback
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("Unknown error");
                        Err(NodeError::ExecutionFailed(message.to_string()))
                    }
                    other => Err(NodeError::ExecutionFailed(format!(
                        "unexpected callback status '{other}'"
                    ))),
                }
            })
        })
    }
}

#[async_trait]
impl NodeBehavior for ModelService {
    async fn process(&self, inputs: &JsonMap, ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let url = req_str(inputs, "api_url")?;
        let model = req_str(inputs, "model")?;
        let input = inputs
            .get("input")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("input".to_string()))?;

        let mut options = JsonMap::new();
        for (key, default) in [
            ("prompt", json!("")),
            ("audio_prompt", json!("")),
            ("negative_prompt", json!("")),
            ("width", json!(768)),
            ("height", json!(768)),
            ("batch_size", json!(1)),
        ] {
            options.insert(key.to_string(), inputs.get(key).cloned().unwrap_or(default));
        }
        if let Some(seed) = inputs.get("seed").filter(|v| !v.is_null()) {
            options.insert("seed".to_string(), seed.clone());
        }
        if let Some(format) = inputs.get("output_format").filter(|v| !v.is_null()) {
            options.insert("output_format".to_string(), format.clone());
        }
        if let Some(Value::Object(extra)) = inputs.get("extra_options") {
            for (key, value) in extra {
                options.insert(key.clone(), value.clone());
            }
        }

        let request = json!({
            "model": model,
            "input": input,
            "options": options,
            "webhookUrl": ctx.env.client.webhook_url(),
        });

        call_async_service(ctx, url, &request, timeout_from(inputs), Self::handler()).await
    }
}
