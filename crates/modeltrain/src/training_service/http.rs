//! HTTP client for the training service REST API

use async_trait::async_trait;
use modeltrain_core::{JobId, ResultsReference, TrainingStatus};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use tracing::{debug, info};

use super::{
    DefinitionMetadata, RunMetadata, TrainingService, TrainingServiceError, TrainingServiceResult,
};
use crate::context::TrainingCredentials;

const API_KEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Training service reached over its v3 REST API
#[derive(Debug, Clone)]
pub struct HttpTrainingService {
    http_client: Client,
    base_url: String,
    instance_id: String,
    token: String,
}

impl HttpTrainingService {
    /// Exchange the API key for a bearer token and verify the service
    /// instance is reachable
    pub async fn connect(credentials: &TrainingCredentials) -> TrainingServiceResult<Self> {
        let http_client = Client::new();
        let token = Self::fetch_token(&http_client, credentials)
            .await
            .map_err(|e| TrainingServiceError::Connection(connection_message(e)))?;

        let service = Self {
            http_client,
            base_url: credentials.url.clone(),
            instance_id: credentials.instance_id.clone(),
            token,
        };

        let probe = service
            .http_client
            .get(service.url(&format!("/v3/wml_instances/{}", service.instance_id)));
        service
            .execute(probe)
            .await
            .map_err(|e| TrainingServiceError::Connection(connection_message(e)))?;

        info!("Connected to training service instance {}", service.instance_id);
        Ok(service)
    }

    async fn fetch_token(
        http_client: &Client,
        credentials: &TrainingCredentials,
    ) -> TrainingServiceResult<String> {
        let response = http_client
            .post(format!("{}/identity/token", credentials.iam_url))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", API_KEY_GRANT_TYPE),
                ("apikey", credentials.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TrainingServiceError::from_response(status.as_u16(), &body));
        }
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| TrainingServiceError::InvalidResponse(format!("token response: {}", e)))?;
        Ok(token.access_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send an authorized request; an empty success body becomes `Null`
    async fn execute(&self, request: RequestBuilder) -> TrainingServiceResult<Value> {
        let response = request
            .bearer_auth(&self.token)
            .header("ML-Instance-ID", &self.instance_id)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            debug!("training service responded {}: {}", status, body);
            return Err(TrainingServiceError::from_response(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| TrainingServiceError::InvalidResponse(e.to_string()))
    }

    async fn model_details(&self, id: &JobId) -> TrainingServiceResult<Value> {
        let request = self
            .http_client
            .get(self.url(&format!("/v3/models/{}", id)));
        self.execute(request).await
    }

    async fn submit(
        &self,
        code_archive: &Path,
        definition: &DefinitionMetadata,
        run: &RunMetadata,
    ) -> TrainingServiceResult<JobId> {
        let request = self
            .http_client
            .post(self.url("/v3/ml_assets/training_definitions"))
            .json(definition);
        let stored = self.execute(request).await?;
        let definition_guid = guid_of(&stored)?;
        debug!("stored training definition {}", definition_guid);

        let archive = tokio::fs::read(code_archive).await?;
        let definition_url = self.url(&format!(
            "/v3/ml_assets/training_definitions/{}",
            definition_guid
        ));
        let request = self
            .http_client
            .put(format!("{}/model_definition", definition_url))
            .header("Content-Type", "application/octet-stream")
            .body(archive);
        self.execute(request).await?;

        let body = json!({
            "name": run.name,
            "description": run.description,
            "author": run.author,
            "model_definition": {
                "definition_href": definition_url,
                "name": definition.name,
                "author": definition.author,
                "framework": definition.framework,
                "execution": {
                    "command": definition.command,
                    "compute_configuration": run.compute_configuration,
                },
            },
            "training_data_reference": run.training_data_reference,
            "training_results_reference": run.training_results_reference,
        });
        let request = self.http_client.post(self.url("/v3/models")).json(&body);
        let started = self.execute(request).await?;
        let run_guid = guid_of(&started)?;

        JobId::parse(run_guid)
            .map_err(|e| TrainingServiceError::InvalidResponse(e.to_string()))
    }
}

/// A connection failure reports the service's parsed message
fn connection_message(err: TrainingServiceError) -> String {
    match err {
        TrainingServiceError::Api { message, .. } => message,
        other => other.to_string(),
    }
}

fn guid_of(response: &Value) -> TrainingServiceResult<String> {
    response
        .pointer("/metadata/guid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TrainingServiceError::InvalidResponse("missing metadata.guid".to_string()))
}

/// Extract `entity.training_results_reference.location`
fn results_reference_of(details: &Value) -> TrainingServiceResult<Option<ResultsReference>> {
    let Some(location) = details
        .pointer("/entity/training_results_reference/location")
        .filter(|location| !location.is_null())
    else {
        return Ok(None);
    };

    let bucket = location.get("bucket").and_then(Value::as_str);
    let model_location = location.get("model_location").and_then(Value::as_str);
    match (bucket, model_location) {
        (Some(bucket), Some(model_location)) => Ok(Some(ResultsReference {
            bucket: bucket.to_string(),
            model_location: model_location.to_string(),
        })),
        (None, None) => Ok(None),
        _ => Err(TrainingServiceError::InvalidResponse(format!(
            "incomplete training results location: {}",
            location
        ))),
    }
}

#[async_trait]
impl TrainingService for HttpTrainingService {
    async fn start_training(
        &self,
        code_archive: &Path,
        definition: &DefinitionMetadata,
        run: &RunMetadata,
    ) -> TrainingServiceResult<JobId> {
        self.submit(code_archive, definition, run)
            .await
            .map_err(|e| TrainingServiceError::StartFailed(Box::new(e)))
    }

    async fn is_known_job(&self, id: &JobId) -> TrainingServiceResult<bool> {
        match self.model_details(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_status(
        &self,
        id: &JobId,
        ignore_server_error: bool,
    ) -> TrainingServiceResult<Option<TrainingStatus>> {
        let details = match self.model_details(id).await {
            Ok(details) => details,
            Err(e) if ignore_server_error && e.is_server_error() => {
                debug!("ignoring server error while polling {}: {}", id, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match details.pointer("/entity/status") {
            Some(status) if !status.is_null() => serde_json::from_value(status.clone())
                .map(Some)
                .map_err(|e| TrainingServiceError::InvalidResponse(e.to_string())),
            _ => Ok(None),
        }
    }

    async fn get_results_reference(
        &self,
        id: &JobId,
        ignore_server_error: bool,
    ) -> TrainingServiceResult<Option<ResultsReference>> {
        match self.model_details(id).await {
            Ok(details) => results_reference_of(&details),
            Err(e) if ignore_server_error && e.is_server_error() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn cancel(&self, id: &JobId, not_found_ok: bool) -> TrainingServiceResult<()> {
        let request = self
            .http_client
            .delete(self.url(&format!("/v3/models/{}", id)));
        match self.execute(request).await {
            Ok(_) => Ok(()),
            Err(e) if not_found_ok && e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
