use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::config::ApiConfig;
use crate::job::{JobRecord, JobStatus};

/// Vendor content type the asset-management service requires
const CONTENT_TYPE: &str = "application/vnd.nativ.mio.v1+json";

/// Delay between workflow completion polls
const WORKFLOW_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Client for the remote asset-management service.
///
/// Asset ids are cached per title; the cache must be evicted (`forget`)
/// whenever the remote asset may have been replaced.
pub struct AssetClient {
    http: Client,
    config: ApiConfig,
    asset_ids: HashMap<String, u64>,
}

impl AssetClient {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            asset_ids: HashMap::new(),
        }
    }

    /// Drop the cached asset id for a title
    pub fn forget(&mut self, title: &str) {
        self.asset_ids.remove(title);
    }

    /// Metadata instance of the asset behind a title
    pub async fn get_metadata(&mut self, title: &str) -> Result<Value> {
        let id = self.asset_id(title).await?;
        let uri = format!("{}/assets/{}/metadata", self.config.base_uri, id);
        let response = self
            .request(Method::GET, &uri, None)
            .await?
            .ok_or_else(|| anyhow!("No metadata for asset ({})", title))?;
        response
            .get("instance")
            .cloned()
            .ok_or_else(|| anyhow!("Metadata response without instance for ({})", title))
    }

    /// Read-merge-write metadata update
    pub async fn update_metadata(&mut self, title: &str, updates: &Value) -> Result<()> {
        let mut metadata = self.get_metadata(title).await?;
        merge_metadata(&mut metadata, updates);
        let id = self.asset_id(title).await?;
        let uri = format!("{}/assets/{}/metadata", self.config.base_uri, id);
        self.request(Method::PUT, &uri, Some(&metadata)).await?;
        Ok(())
    }

    /// Report transcoding progress for a live job
    pub async fn report_progress(&mut self, title: &str, progress: u32) -> Result<()> {
        self.update_metadata(
            title,
            &json!({
                "state": "transcoding",
                "transcoding-progress": progress,
            }),
        )
        .await
    }

    /// Launch the import workflow for a job that reached a terminal state.
    ///
    /// A failed transcode also evicts the cached asset id: the asset will
    /// be resubmitted and looked up fresh.
    pub async fn launch_import_workflow(&mut self, title: &str, job: &JobRecord) -> Result<()> {
        let variables = import_variables(job);
        let failed = job.status == JobStatus::Failed;
        self.launch_workflow(self.config.import_workflow_id, title, variables)
            .await?;
        if failed {
            self.forget(title);
        }
        Ok(())
    }

    /// Launch a workflow on the asset behind a title and wait until the
    /// instance reports Completed or Failed.
    pub async fn launch_workflow(
        &mut self,
        definition_id: u64,
        title: &str,
        variables: Value,
    ) -> Result<()> {
        let asset_id = self.asset_id(title).await?;
        let uri = format!("{}/workflows", self.config.base_uri);
        let body = json!({
            "definitionId": definition_id,
            "workspaceId": self.config.workspace_id,
            "assetId": asset_id,
            "stringVariables": variables,
        });
        let response = self
            .request(Method::POST, &uri, Some(&body))
            .await?
            .ok_or_else(|| anyhow!("Workflow launch refused for ({})", title))?;
        let instance_id = response
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("Workflow launch response without id for ({})", title))?;

        while !self.workflow_finished(instance_id).await? {
            tokio::time::sleep(WORKFLOW_POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn workflow_finished(&self, instance_id: u64) -> Result<bool> {
        let uri = format!("{}/workflows/{}", self.config.base_uri, instance_id);
        let response = self
            .request(Method::GET, &uri, None)
            .await?
            .ok_or_else(|| anyhow!("Workflow instance {} not readable", instance_id))?;
        let status = response.get("status").and_then(Value::as_str).unwrap_or("");
        debug!("Workflow (id={}): {}", instance_id, status);
        Ok(status == "Completed" || status == "Failed")
    }

    async fn asset_id(&mut self, title: &str) -> Result<u64> {
        if let Some(id) = self.asset_ids.get(title) {
            return Ok(*id);
        }
        let uri = search_uri(&self.config, title);
        let response = self
            .request(Method::GET, &uri, None)
            .await?
            .ok_or_else(|| anyhow!("No asset ({}) found", title))?;
        let assets = response
            .get("assets")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("No asset ({}) found", title))?;
        let id = assets
            .iter()
            .find(|asset| asset.get("name").and_then(Value::as_str) == Some(title))
            .and_then(|asset| asset.get("id").and_then(Value::as_u64))
            .ok_or_else(|| anyhow!("No asset ({}) found", title))?;
        self.asset_ids.insert(title.to_string(), id);
        Ok(id)
    }

    /// One authenticated request; HTTP error statuses are logged and
    /// reported as absent data rather than failures.
    async fn request(&self, method: Method, uri: &str, body: Option<&Value>) -> Result<Option<Value>> {
        debug!("request: [{}] {}", method, uri);
        let mut builder = self
            .http
            .request(method.clone(), uri)
            .basic_auth(&self.config.user, Some(&self.config.pass));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .send()
            .await
            .with_context(|| format!("Request failed: [{}] {}", method, uri))?;

        let status = response.status();
        if !status.is_success() {
            warn!("{} [{}] {}", status, method, uri);
            return Ok(None);
        }
        let value = response
            .json::<Value>()
            .await
            .with_context(|| format!("Invalid JSON from [{}] {}", method, uri))?;
        Ok(Some(value))
    }
}

/// Asset search endpoint with matrix-style parameters
fn search_uri(config: &ApiConfig, title: &str) -> String {
    format!(
        "{}/assets;workspaceId={};metadataDefinitionId={};searchText=\"{}\"",
        config.base_uri, config.workspace_id, config.metadata_definition_id, title
    )
}

/// Workflow string variables for a terminal job
fn import_variables(job: &JobRecord) -> Value {
    if job.status == JobStatus::Completed {
        let review_path = job
            .destination
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        json!({
            "state": "transcoded",
            "reviewFilePath": review_path,
        })
    } else {
        json!({ "state": "transcoding-failed" })
    }
}

/// Overwrite the base metadata's keys with the update's keys
fn merge_metadata(base: &mut Value, updates: &Value) {
    if let (Some(base), Some(updates)) = (base.as_object_mut(), updates.as_object()) {
        for (key, value) in updates {
            base.insert(key.clone(), value.clone());
        }
    }
}
