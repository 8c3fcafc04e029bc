use std::collections::{BTreeMap, BTreeSet};

use futures::{StreamExt, stream};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::BloomeoConfig;
use crate::error::{BloomeoError, ErrorKind};
use crate::sources::bloomeo::{Gateway, GatewayRequest, endpoints};
use crate::transform::identifiers::{self, IdentifierKind};
use crate::transform::shape::{self, ResponseMode};

pub const OBSERVATION_ROUND_TASK: &str = "observation round";

/// Best-effort fetches issued after the anchor task document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubFetch {
    Notebook,
    Treatment,
    TrialNotation,
    VariableGroups,
    Genotypes,
}

impl SubFetch {
    pub const ALL: [SubFetch; 5] = [
        Self::Notebook,
        Self::Treatment,
        Self::TrialNotation,
        Self::VariableGroups,
        Self::Genotypes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notebook => "notebook",
            Self::Treatment => "treatment",
            Self::TrialNotation => "trial_notation",
            Self::VariableGroups => "variable_groups",
            Self::Genotypes => "genotypes",
        }
    }

    fn required_identifier(self) -> IdentifierKind {
        match self {
            Self::Genotypes => IdentifierKind::GenotypeId,
            _ => IdentifierKind::TrialId,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialFailure {
    pub sub_fetch: SubFetch,
    pub kind: ErrorKind,
    pub message: String,
}

/// A nested part of an [`ExperimentRecord`]. `Absent` means upstream had no
/// data; `Failed` means the fetch itself did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Section<T> {
    Loaded { data: T },
    Absent,
    Failed { kind: ErrorKind, message: String },
}

impl<T> Section<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Loaded { data } => Some(data),
            _ => None,
        }
    }

    fn summarize(&self, count: impl Fn(&T) -> usize) -> SectionSummary {
        match self {
            Self::Loaded { data } => SectionSummary {
                status: "loaded",
                count: Some(count(data)),
                kind: None,
            },
            Self::Absent => SectionSummary {
                status: "absent",
                count: None,
                kind: None,
            },
            Self::Failed { kind, .. } => SectionSummary {
                status: "failed",
                count: None,
                kind: Some(*kind),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionSummary {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_id: Option<String>,
    pub genotype_ids: Vec<String>,
    pub raw_task_data: Value,
    pub notebook_entries: Section<Vec<Value>>,
    pub treatment: Section<Value>,
    pub trial_notation: Section<Value>,
    pub variable_groups: Section<Vec<Value>>,
    pub genotypes: Section<BTreeMap<String, Value>>,
}

impl ExperimentRecord {
    fn anchored(id: &str, raw_task_data: Value) -> Self {
        Self {
            id: id.to_string(),
            name: experiment_name(&raw_task_data),
            trial_id: None,
            genotype_ids: Vec::new(),
            raw_task_data,
            notebook_entries: Section::Absent,
            treatment: Section::Absent,
            trial_notation: Section::Absent,
            variable_groups: Section::Absent,
            genotypes: Section::Absent,
        }
    }

    fn mark_failed(&mut self, which: SubFetch, kind: ErrorKind, message: String) {
        match which {
            SubFetch::Notebook => self.notebook_entries = Section::Failed { kind, message },
            SubFetch::Treatment => self.treatment = Section::Failed { kind, message },
            SubFetch::TrialNotation => self.trial_notation = Section::Failed { kind, message },
            SubFetch::VariableGroups => self.variable_groups = Section::Failed { kind, message },
            SubFetch::Genotypes => self.genotypes = Section::Failed { kind, message },
        }
    }

    fn merge(&mut self, which: SubFetch, payload: Value, requested_genotypes: &[String]) {
        if payload.is_null() {
            return;
        }
        match which {
            SubFetch::Notebook => {
                self.notebook_entries = Section::Loaded {
                    data: as_sequence(payload),
                }
            }
            SubFetch::Treatment => self.treatment = present_object(payload),
            SubFetch::TrialNotation => self.trial_notation = present_object(payload),
            SubFetch::VariableGroups => {
                self.variable_groups = Section::Loaded {
                    data: as_sequence(payload),
                }
            }
            SubFetch::Genotypes => {
                self.genotypes = Section::Loaded {
                    data: key_genotypes(payload, requested_genotypes),
                }
            }
        }
    }

    pub fn task_count(&self) -> usize {
        match &self.raw_task_data {
            Value::Array(items) => items.len(),
            Value::Null => 0,
            _ => 1,
        }
    }
}

/// Aggregated experiment plus the sub-fetches that did not succeed.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentData {
    #[serde(flatten)]
    pub record: ExperimentRecord,
    pub partial_failures: Vec<PartialFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_id: Option<String>,
    pub mode: &'static str,
    pub task_count: usize,
    pub genotype_id_count: usize,
    pub sections: BTreeMap<&'static str, SectionSummary>,
    pub partial_failures: Vec<PartialFailure>,
}

impl ExperimentData {
    pub fn summary(&self) -> ExperimentSummary {
        let record = &self.record;
        let sections = BTreeMap::from([
            (
                SubFetch::Notebook.as_str(),
                record.notebook_entries.summarize(Vec::len),
            ),
            (SubFetch::Treatment.as_str(), record.treatment.summarize(|_| 1)),
            (
                SubFetch::TrialNotation.as_str(),
                record.trial_notation.summarize(element_count),
            ),
            (
                SubFetch::VariableGroups.as_str(),
                record.variable_groups.summarize(Vec::len),
            ),
            (SubFetch::Genotypes.as_str(), record.genotypes.summarize(BTreeMap::len)),
        ]);
        ExperimentSummary {
            id: record.id.clone(),
            name: record.name.clone(),
            trial_id: record.trial_id.clone(),
            mode: ResponseMode::Summary.as_str(),
            task_count: record.task_count(),
            genotype_id_count: record.genotype_ids.len(),
            sections,
            partial_failures: self.partial_failures.clone(),
        }
    }

    /// Renders the requested mode inside `max_bytes`.
    pub fn shape(&self, mode: ResponseMode, max_bytes: usize) -> Result<Value, BloomeoError> {
        let value = match mode {
            ResponseMode::Summary => serde_json::to_value(self.summary()),
            ResponseMode::Full => serde_json::to_value(self),
        }
        .map_err(|source| BloomeoError::ResultEncoding { source })?;
        Ok(shape::fit_to_budget(value, max_bytes))
    }
}

fn element_count(value: &Value) -> usize {
    value.as_array().map_or(1, Vec::len)
}

/// Normalizes list-like upstream payloads: bare arrays, or objects wrapping one
/// under `data`/`items`/`results`.
pub(crate) fn as_sequence(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        Value::Object(mut map) => {
            for key in ["data", "items", "results"] {
                if matches!(map.get(key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = map.remove(key) {
                        return items;
                    }
                }
            }
            vec![Value::Object(map)]
        }
        other => vec![other],
    }
}

fn present_object(value: Value) -> Section<Value> {
    match &value {
        Value::Null => Section::Absent,
        Value::Array(items) if items.is_empty() => Section::Absent,
        Value::Object(map) if map.is_empty() => Section::Absent,
        _ => Section::Loaded { data: value },
    }
}

fn record_id(item: &Value) -> Option<String> {
    match item.get("_id").or_else(|| item.get("id"))? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Keys genotype payloads by their own id, falling back to the requested id at
/// the same position.
fn key_genotypes(payload: Value, requested: &[String]) -> BTreeMap<String, Value> {
    as_sequence(payload)
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let key = record_id(&item).or_else(|| requested.get(idx).cloned())?;
            Some((key, item))
        })
        .collect()
}

fn experiment_name(task_data: &Value) -> Option<String> {
    let tasks: Vec<&Value> = match task_data {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    tasks.iter().find_map(|task| {
        ["experimentName", "trialName"]
            .iter()
            .find_map(|key| task.get(*key))
            .or_else(|| task.get("experiment").and_then(|e| e.get("name")))
            .or_else(|| task.get("trial").and_then(|t| t.get("name")))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn choose_trial_id(experiment_id: &str, candidates: &BTreeSet<String>) -> Option<String> {
    if candidates.contains(experiment_id) {
        return Some(experiment_id.to_string());
    }
    candidates.iter().next().cloned()
}

pub fn task_request(experiment_id: &str, task_type: &str) -> Result<GatewayRequest, BloomeoError> {
    let task_type = task_type.trim();
    let task_type = if task_type.is_empty() {
        OBSERVATION_ROUND_TASK
    } else {
        task_type
    };
    Ok(GatewayRequest::get(endpoints::experiment_task(experiment_id)?).query("type", task_type))
}

pub fn notebook_request(trial_id: &str) -> Result<GatewayRequest, BloomeoError> {
    let trial_id = crate::sources::path_segment("trial_id", trial_id)?;
    Ok(GatewayRequest::get(endpoints::NOTEBOOK)
        .query("filter", json!({ "trialId": trial_id }).to_string()))
}

pub fn genotypes_request(genotype_ids: &[String]) -> GatewayRequest {
    GatewayRequest::post(endpoints::GENOTYPE_BATCH, json!(genotype_ids))
}

fn sub_fetch_request(
    which: SubFetch,
    trial_id: &str,
    genotype_ids: &[String],
) -> Result<GatewayRequest, BloomeoError> {
    match which {
        SubFetch::Notebook => notebook_request(trial_id),
        SubFetch::Treatment => Ok(GatewayRequest::get(endpoints::treatment_by_trial(trial_id)?)),
        SubFetch::TrialNotation => Ok(GatewayRequest::get(endpoints::notation_by_trial(trial_id)?)),
        SubFetch::VariableGroups => Ok(GatewayRequest::get(endpoints::variable_groups_by_trial(
            trial_id,
        )?)),
        SubFetch::Genotypes => Ok(genotypes_request(genotype_ids)),
    }
}

/// Fetches the anchor task document and every related sub-resource.
///
/// The anchor is all-or-nothing. Sub-fetches run concurrently up to
/// `config.subfetch_concurrency`; each failure becomes a [`PartialFailure`]
/// and a `Failed` section without affecting its siblings.
///
/// # Errors
///
/// Returns an error when the anchor fetch fails or yields no tasks.
pub async fn aggregate(
    gateway: &dyn Gateway,
    bearer_token: &str,
    experiment_id: &str,
    config: &BloomeoConfig,
) -> Result<(ExperimentRecord, Vec<PartialFailure>), BloomeoError> {
    let experiment_id = crate::sources::path_segment("experiment_id", experiment_id)?;
    let anchor = task_request(experiment_id, OBSERVATION_ROUND_TASK)?;
    let task_data = gateway
        .call(&anchor, bearer_token)
        .await
        .map_err(|err| match err {
            BloomeoError::NotFound { .. } => BloomeoError::NotFound {
                resource: format!("experiment {experiment_id}"),
            },
            other => other,
        })?;
    let empty = match &task_data {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return Err(BloomeoError::NotFound {
            resource: format!("experiment {experiment_id}"),
        });
    }

    let ids = identifiers::extract_all(&task_data, &config.identifier_keys);
    let trial_id = ids
        .get(&IdentifierKind::TrialId)
        .and_then(|set| choose_trial_id(experiment_id, set));
    let genotype_ids: Vec<String> = ids
        .get(&IdentifierKind::GenotypeId)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default();

    let mut record = ExperimentRecord::anchored(experiment_id, task_data);
    record.trial_id = trial_id.clone();
    record.genotype_ids = genotype_ids.clone();

    let mut failures = Vec::new();
    let mut planned = Vec::new();
    for which in SubFetch::ALL {
        let identifier_found = match which.required_identifier() {
            IdentifierKind::TrialId => trial_id.is_some(),
            IdentifierKind::GenotypeId => !genotype_ids.is_empty(),
        };
        if !identifier_found {
            let err = BloomeoError::MissingIdentifier {
                identifier: which.required_identifier().as_str().to_string(),
            };
            debug!(experiment_id, sub_fetch = which.as_str(), "sub-fetch skipped: {err}");
            failures.push(PartialFailure {
                sub_fetch: which,
                kind: err.kind(),
                message: err.to_string(),
            });
            continue;
        }
        match sub_fetch_request(which, trial_id.as_deref().unwrap_or_default(), &genotype_ids) {
            Ok(request) => planned.push((which, request)),
            Err(err) => failures.push(PartialFailure {
                sub_fetch: which,
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    let results: Vec<(SubFetch, Result<Value, BloomeoError>)> =
        stream::iter(planned.into_iter().map(|(which, request)| async move {
            (which, gateway.call(&request, bearer_token).await)
        }))
        .buffer_unordered(config.subfetch_concurrency.max(1))
        .collect()
        .await;

    for (which, result) in results {
        match result {
            Ok(payload) => record.merge(which, payload, &genotype_ids),
            Err(err) => {
                warn!(experiment_id, sub_fetch = which.as_str(), error = %err, "sub-fetch failed");
                failures.push(PartialFailure {
                    sub_fetch: which,
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }
        }
    }

    failures.sort_by_key(|f| f.sub_fetch);
    for failure in &failures {
        record.mark_failed(failure.sub_fetch, failure.kind, failure.message.clone());
    }
    Ok((record, failures))
}

pub async fn get(
    gateway: &dyn Gateway,
    bearer_token: &str,
    experiment_id: &str,
    config: &BloomeoConfig,
) -> Result<ExperimentData, BloomeoError> {
    let (record, partial_failures) = aggregate(gateway, bearer_token, experiment_id, config).await?;
    Ok(ExperimentData {
        record,
        partial_failures,
    })
}

pub async fn task(
    gateway: &dyn Gateway,
    bearer_token: &str,
    experiment_id: &str,
    task_type: Option<&str>,
) -> Result<Value, BloomeoError> {
    let request = task_request(experiment_id, task_type.unwrap_or(OBSERVATION_ROUND_TASK))?;
    gateway.call(&request, bearer_token).await
}

pub async fn notebook(
    gateway: &dyn Gateway,
    bearer_token: &str,
    trial_id: &str,
) -> Result<Vec<Value>, BloomeoError> {
    let request = notebook_request(trial_id)?;
    Ok(as_sequence(gateway.call(&request, bearer_token).await?))
}

pub async fn treatment(
    gateway: &dyn Gateway,
    bearer_token: &str,
    trial_id: &str,
) -> Result<Value, BloomeoError> {
    let request = GatewayRequest::get(endpoints::treatment_by_trial(trial_id)?);
    gateway.call(&request, bearer_token).await
}

pub async fn trial_notation(
    gateway: &dyn Gateway,
    bearer_token: &str,
    trial_id: &str,
) -> Result<Value, BloomeoError> {
    let request = GatewayRequest::get(endpoints::notation_by_trial(trial_id)?);
    gateway.call(&request, bearer_token).await
}

pub async fn variable_groups(
    gateway: &dyn Gateway,
    bearer_token: &str,
    trial_id: &str,
) -> Result<Vec<Value>, BloomeoError> {
    let request = GatewayRequest::get(endpoints::variable_groups_by_trial(trial_id)?);
    Ok(as_sequence(gateway.call(&request, bearer_token).await?))
}

/// Batch genotype lookup. Ids are trimmed, deduplicated and sent sorted so
/// repeated calls issue the same request.
pub async fn genotypes(
    gateway: &dyn Gateway,
    bearer_token: &str,
    genotype_ids: &[String],
) -> Result<BTreeMap<String, Value>, BloomeoError> {
    let ids: Vec<String> = genotype_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Err(BloomeoError::InvalidArgument(
            "genotype_ids must contain at least one id".into(),
        ));
    }
    let payload = gateway.call(&genotypes_request(&ids), bearer_token).await?;
    Ok(key_genotypes(payload, &ids))
}

pub async fn structure(
    gateway: &dyn Gateway,
    bearer_token: &str,
    experiment_id: &str,
) -> Result<Value, BloomeoError> {
    let request = GatewayRequest::get(endpoints::experiment_structure(experiment_id)?);
    gateway.call(&request, bearer_token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::bloomeo::BloomeoClient;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> BloomeoConfig {
        BloomeoConfig::default().with_base_url(server.uri())
    }

    fn tasks() -> Value {
        json!([
            {"_id": "task-1", "trialId": "trial-7", "experimentName": "Wheat Trial A",
             "plots": [{"genotypeId": "g-2"}, {"genotypeId": "g-1"}]},
            {"_id": "task-2", "trialId": "trial-7", "plots": [{"genotypeId": "g-1"}]}
        ])
    }

    async fn mount_anchor(server: &MockServer, body: Value) {
        Mock::given(method("GET"))
            .and(path("/experiment/op-task/experiment/exp-1"))
            .and(query_param("type", OBSERVATION_ROUND_TASK))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_siblings(server: &MockServer, notebook_status: u16) {
        Mock::given(method("GET"))
            .and(path("/experiment/notebook"))
            .and(query_param("filter", r#"{"trialId":"trial-7"}"#))
            .respond_with(
                ResponseTemplate::new(notebook_status).set_body_json(json!([{"_id": "nb-1"}])),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/experiment/treatment/trial/trial-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "tr-1"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/experiment/notation/trial/trial-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"_id": "no-1"}])))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(
                "/experiment/op-task/observation-round/variable-group/trial/trial-7",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"_id": "vg-1"}])))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/germplasm/genotype/get/many"))
            .and(body_json(json!(["g-1", "g-2"])))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"_id": "g-1", "name": "A"}, {"_id": "g-2", "name": "B"}])),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn aggregate_merges_every_sub_fetch() {
        let server = MockServer::start().await;
        mount_anchor(&server, tasks()).await;
        mount_siblings(&server, 200).await;
        let config = config_for(&server);
        let client = BloomeoClient::new(&config).unwrap();

        let (record, failures) = aggregate(&client, "tok", "exp-1", &config).await.unwrap();
        assert!(failures.is_empty());
        assert_eq!(record.name.as_deref(), Some("Wheat Trial A"));
        assert_eq!(record.trial_id.as_deref(), Some("trial-7"));
        assert_eq!(record.genotype_ids, vec!["g-1", "g-2"]);
        assert_eq!(record.notebook_entries.data().unwrap().len(), 1);
        assert_eq!(record.treatment.data().unwrap()["_id"], "tr-1");
        assert!(record.trial_notation.is_loaded());
        assert_eq!(record.variable_groups.data().unwrap().len(), 1);
        let genotypes = record.genotypes.data().unwrap();
        assert_eq!(genotypes["g-2"]["name"], "B");
    }

    #[tokio::test]
    async fn failing_sub_fetch_is_isolated() {
        let server = MockServer::start().await;
        mount_anchor(&server, tasks()).await;
        mount_siblings(&server, 500).await;
        let config = config_for(&server);
        let client = BloomeoClient::new(&config).unwrap();

        let (record, failures) = aggregate(&client, "tok", "exp-1", &config).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].sub_fetch, SubFetch::Notebook);
        assert_eq!(failures[0].kind, ErrorKind::UpstreamError);
        assert!(matches!(record.notebook_entries, Section::Failed { .. }));
        assert!(record.treatment.is_loaded());
        assert!(record.genotypes.is_loaded());
    }

    #[tokio::test]
    async fn anchor_not_found_fails_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/experiment/op-task/experiment/exp-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/experiment/notebook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let config = config_for(&server);
        let client = BloomeoClient::new(&config).unwrap();

        let err = aggregate(&client, "tok", "exp-1", &config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("exp-1"));
    }

    #[tokio::test]
    async fn empty_anchor_is_not_found() {
        let server = MockServer::start().await;
        mount_anchor(&server, json!([])).await;
        let config = config_for(&server);
        let client = BloomeoClient::new(&config).unwrap();

        let err = aggregate(&client, "tok", "exp-1", &config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn missing_identifiers_skip_sub_fetches() {
        let server = MockServer::start().await;
        mount_anchor(&server, json!([{"_id": "task-1", "plots": []}])).await;
        Mock::given(method("GET"))
            .and(path("/experiment/notebook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let config = config_for(&server);
        let client = BloomeoClient::new(&config).unwrap();

        let (record, failures) = aggregate(&client, "tok", "exp-1", &config).await.unwrap();
        assert_eq!(failures.len(), SubFetch::ALL.len());
        assert!(failures.iter().all(|f| f.kind == ErrorKind::MissingIdentifier));
        assert!(matches!(
            record.genotypes,
            Section::Failed {
                kind: ErrorKind::MissingIdentifier,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn summary_reports_counts_not_collections() {
        let server = MockServer::start().await;
        mount_anchor(&server, tasks()).await;
        mount_siblings(&server, 200).await;
        let config = config_for(&server);
        let client = BloomeoClient::new(&config).unwrap();

        let data = get(&client, "tok", "exp-1", &config).await.unwrap();
        let summary = data.shape(ResponseMode::Summary, 100_000).unwrap();
        assert_eq!(summary["mode"], "summary");
        assert_eq!(summary["task_count"], 2);
        assert_eq!(summary["sections"]["genotypes"]["count"], 2);
        assert_eq!(summary["sections"]["notebook"]["status"], "loaded");
        assert!(summary.get("raw_task_data").is_none());
    }

    #[test]
    fn trial_id_prefers_the_experiment_id() {
        let candidates: BTreeSet<String> = ["b".to_string(), "exp".to_string(), "a".to_string()].into();
        assert_eq!(choose_trial_id("exp", &candidates).as_deref(), Some("exp"));
        assert_eq!(choose_trial_id("zzz", &candidates).as_deref(), Some("a"));
    }

    #[test]
    fn as_sequence_unwraps_common_envelopes() {
        assert_eq!(as_sequence(json!({"data": [1, 2]})), vec![json!(1), json!(2)]);
        assert_eq!(as_sequence(json!({"_id": "x"})), vec![json!({"_id": "x"})]);
        assert!(as_sequence(Value::Null).is_empty());
    }
}
