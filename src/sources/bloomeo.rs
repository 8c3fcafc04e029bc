use std::borrow::Cow;

use async_trait::async_trait;
use http::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, ORIGIN, REFERER};
use serde_json::Value;
use tracing::debug;

use crate::config::BloomeoConfig;
use crate::error::BloomeoError;
use crate::sources::path_segment;

const BLOOMEO_ORIGIN: &str = "https://app.bloomeo-app.com";
const BLOOMEO_REFERER: &str = "https://app.bloomeo-app.com/";
const BLOOMEO_ACCEPT: &str = "application/json, text/plain, */*";

/// Fixed upstream endpoint paths. Identifiers are validated before substitution.
pub mod endpoints {
    use super::*;

    pub const TRIAL_LIST: &str = "experiment/v2/trial";
    pub const NOTEBOOK: &str = "experiment/notebook";
    pub const GENOTYPE_BATCH: &str = "germplasm/genotype/get/many";
    pub const CUSTOM_VARIABLES: &str = "core/variables/custom/paginated";

    pub fn experiment_task(experiment_id: &str) -> Result<String, BloomeoError> {
        let id = path_segment("experiment_id", experiment_id)?;
        Ok(format!("experiment/op-task/experiment/{id}"))
    }

    pub fn treatment_by_trial(trial_id: &str) -> Result<String, BloomeoError> {
        let id = path_segment("trial_id", trial_id)?;
        Ok(format!("experiment/treatment/trial/{id}"))
    }

    pub fn notation_by_trial(trial_id: &str) -> Result<String, BloomeoError> {
        let id = path_segment("trial_id", trial_id)?;
        Ok(format!("experiment/notation/trial/{id}"))
    }

    pub fn variable_groups_by_trial(trial_id: &str) -> Result<String, BloomeoError> {
        let id = path_segment("trial_id", trial_id)?;
        Ok(format!(
            "experiment/op-task/observation-round/variable-group/trial/{id}"
        ))
    }

    pub fn experiment_structure(experiment_id: &str) -> Result<String, BloomeoError> {
        let id = path_segment("experiment_id", experiment_id)?;
        Ok(format!("experiment/structure/{id}"))
    }

    pub fn variable(variable_id: &str) -> Result<String, BloomeoError> {
        let id = path_segment("variable_id", variable_id)?;
        Ok(format!("core/variable/{id}"))
    }

    pub fn variable_group(variable_group_id: &str) -> Result<String, BloomeoError> {
        let id = path_segment("variable_group_id", variable_group_id)?;
        Ok(format!("core/variable-group/{id}"))
    }

    pub fn genotype(genotype_id: &str) -> Result<String, BloomeoError> {
        let id = path_segment("genotype_id", genotype_id)?;
        Ok(format!("germplasm/genotype/{id}"))
    }
}

/// One outbound upstream call: method, pre-formatted path, query or JSON body.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl GatewayRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }
}

/// Injected fetch capability. A single bounded attempt per call, no retries.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn call(&self, request: &GatewayRequest, bearer_token: &str)
    -> Result<Value, BloomeoError>;
}

#[derive(Clone)]
pub struct BloomeoClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl BloomeoClient {
    pub fn new(config: &BloomeoConfig) -> Result<Self, BloomeoError> {
        Ok(Self {
            client: crate::sources::shared_client(config.timeout)?,
            base: config.base_url.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Gateway for BloomeoClient {
    async fn call(
        &self,
        request: &GatewayRequest,
        bearer_token: &str,
    ) -> Result<Value, BloomeoError> {
        let bearer_token = bearer_token.trim();
        if bearer_token.is_empty() {
            return Err(BloomeoError::MissingCredential);
        }

        let url = self.endpoint(&request.path);
        let mut req = self
            .client
            .request(request.method.clone(), &url)
            .header(ACCEPT, BLOOMEO_ACCEPT)
            .header(ORIGIN, BLOOMEO_ORIGIN)
            .header(REFERER, BLOOMEO_REFERER)
            .header(AUTHORIZATION, format!("Bearer {bearer_token}"));
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        if let Some(body) = request.body.as_ref() {
            req = req.json(body);
        }

        debug!(method = %request.method, path = %request.path, "bloomeo request");
        let resp = req.send().await?;
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp).await?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(BloomeoError::Unauthorized {
                status: status.as_u16(),
                message: crate::sources::body_excerpt(&bytes),
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BloomeoError::NotFound {
                resource: request.path.clone(),
            });
        }
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(BloomeoError::Api {
                message: format!("HTTP {status}: {excerpt}"),
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|source| BloomeoError::ApiJson { source })
    }
}
