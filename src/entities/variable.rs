use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Value, json};

use crate::entities::experiment::as_sequence;
use crate::error::BloomeoError;
use crate::sources::bloomeo::{Gateway, GatewayRequest, endpoints};

const CATALOGUE_PAGE_SIZE: u32 = 3000;
const DEFAULT_SCOPE: i64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelVariable {
    #[serde(rename = "variableId")]
    pub variable_id: String,
    pub scope: Value,
}

/// Variables requested by one observation round, grouped by level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRoundVariables {
    pub observation_round_id: Option<String>,
    pub variables_by_level: BTreeMap<String, Vec<LevelVariable>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableUsage {
    pub observation_round_id: Option<String>,
    pub level: String,
    pub scope: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableMetadata {
    pub total_observation_rounds: usize,
    pub unique_variable_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_from_catalogue: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentVariables {
    pub experiment_id: String,
    pub total_variables: usize,
    pub variables: Vec<Value>,
    pub experiment_context: Vec<ObservationRoundVariables>,
    pub metadata: VariableMetadata,
}

fn string_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn round_context(group: &Value) -> Option<ObservationRoundVariables> {
    let by_level = group.get("variableByLevel")?.as_object()?;
    let variables_by_level: BTreeMap<String, Vec<LevelVariable>> = by_level
        .iter()
        .filter_map(|(level, entries)| {
            let vars: Vec<LevelVariable> = entries
                .as_array()?
                .iter()
                .filter_map(|entry| {
                    Some(LevelVariable {
                        variable_id: string_id(entry.get("variableId"))?,
                        scope: entry.get("scope").cloned().unwrap_or(json!(DEFAULT_SCOPE)),
                    })
                })
                .collect();
            (!vars.is_empty()).then(|| (level.clone(), vars))
        })
        .collect();
    (!variables_by_level.is_empty()).then(|| ObservationRoundVariables {
        observation_round_id: string_id(group.get("_id")),
        variables_by_level,
    })
}

fn usage_for(variable_id: &str, context: &[ObservationRoundVariables]) -> Vec<VariableUsage> {
    context
        .iter()
        .flat_map(|round| {
            round.variables_by_level.iter().flat_map(move |(level, vars)| {
                vars.iter()
                    .filter(move |v| v.variable_id == variable_id)
                    .map(move |v| VariableUsage {
                        observation_round_id: round.observation_round_id.clone(),
                        level: level.clone(),
                        scope: v.scope.clone(),
                    })
            })
        })
        .collect()
}

/// Catalogue definitions of every variable an experiment's observation rounds use,
/// each annotated with `experiment_usage`.
///
/// # Errors
///
/// Returns `NotFound` when the experiment has no variable groups, its groups
/// reference no variables, or the catalogue is empty.
pub async fn by_experiment(
    gateway: &dyn Gateway,
    bearer_token: &str,
    experiment_id: &str,
) -> Result<ExperimentVariables, BloomeoError> {
    let groups_request = GatewayRequest::get(endpoints::variable_groups_by_trial(experiment_id)?);
    let groups = as_sequence(gateway.call(&groups_request, bearer_token).await?);
    if groups.is_empty() {
        return Err(BloomeoError::NotFound {
            resource: format!("variable groups for experiment {experiment_id}"),
        });
    }

    let experiment_context: Vec<ObservationRoundVariables> =
        groups.iter().filter_map(round_context).collect();
    let used: BTreeSet<String> = experiment_context
        .iter()
        .flat_map(|round| round.variables_by_level.values().flatten())
        .map(|v| v.variable_id.clone())
        .collect();
    if used.is_empty() {
        return Err(BloomeoError::NotFound {
            resource: format!("variables for experiment {experiment_id}"),
        });
    }

    let catalogue_request = GatewayRequest::get(endpoints::CUSTOM_VARIABLES)
        .query("page", "0")
        .query("pageSize", CATALOGUE_PAGE_SIZE.to_string());
    let catalogue = as_sequence(gateway.call(&catalogue_request, bearer_token).await?);
    if catalogue.is_empty() {
        return Err(BloomeoError::NotFound {
            resource: "custom variable catalogue".into(),
        });
    }
    let mut by_id: BTreeMap<String, Value> = catalogue
        .into_iter()
        .filter_map(|var| Some((string_id(var.get("_id"))?, var)))
        .collect();

    let mut variables = Vec::new();
    let mut missing_from_catalogue = Vec::new();
    for id in &used {
        let Some(mut definition) = by_id.remove(id) else {
            missing_from_catalogue.push(id.clone());
            continue;
        };
        if let Some(map) = definition.as_object_mut() {
            let usage = serde_json::to_value(usage_for(id, &experiment_context))
                .map_err(|source| BloomeoError::ResultEncoding { source })?;
            map.insert("experiment_usage".into(), usage);
        }
        variables.push(definition);
    }

    Ok(ExperimentVariables {
        experiment_id: experiment_id.trim().to_string(),
        total_variables: variables.len(),
        variables,
        metadata: VariableMetadata {
            total_observation_rounds: experiment_context.len(),
            unique_variable_ids: used.into_iter().collect(),
            missing_from_catalogue,
        },
        experiment_context,
    })
}

pub async fn details(
    gateway: &dyn Gateway,
    bearer_token: &str,
    variable_id: &str,
) -> Result<Value, BloomeoError> {
    let request = GatewayRequest::get(endpoints::variable(variable_id)?);
    gateway.call(&request, bearer_token).await
}

pub async fn group_details(
    gateway: &dyn Gateway,
    bearer_token: &str,
    variable_group_id: &str,
) -> Result<Value, BloomeoError> {
    let request = GatewayRequest::get(endpoints::variable_group(variable_group_id)?);
    gateway.call(&request, bearer_token).await
}

pub async fn genotype_details(
    gateway: &dyn Gateway,
    bearer_token: &str,
    genotype_id: &str,
) -> Result<Value, BloomeoError> {
    let request = GatewayRequest::get(endpoints::genotype(genotype_id)?);
    gateway.call(&request, bearer_token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BloomeoConfig;
    use crate::error::ErrorKind;
    use crate::sources::bloomeo::BloomeoClient;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> BloomeoClient {
        BloomeoClient::new(&BloomeoConfig::default().with_base_url(server.uri())).unwrap()
    }

    async fn mount_groups(server: &MockServer, body: Value) {
        Mock::given(method("GET"))
            .and(path(
                "/experiment/op-task/observation-round/variable-group/trial/exp-1",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn variables_are_joined_with_their_usage() {
        let server = MockServer::start().await;
        mount_groups(
            &server,
            json!([
                {"_id": "round-1", "variableByLevel": {
                    "plot": [{"variableId": "v-1", "scope": 1}, {"variableId": "v-2"}],
                    "plant": []
                }},
                {"_id": "round-2", "variableByLevel": {"plot": [{"variableId": "v-1"}]}}
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/core/variables/custom/paginated"))
            .and(query_param("pageSize", "3000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
                {"_id": "v-1", "name": "Height"},
                {"_id": "v-9", "name": "Unused"}
            ]})))
            .mount(&server)
            .await;

        let result = by_experiment(&client_for(&server), "tok", "exp-1")
            .await
            .unwrap();
        assert_eq!(result.total_variables, 1);
        assert_eq!(result.variables[0]["name"], "Height");
        let usage = result.variables[0]["experiment_usage"].as_array().unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0]["scope"], 1);
        assert_eq!(usage[1]["scope"], DEFAULT_SCOPE);
        assert_eq!(result.metadata.total_observation_rounds, 2);
        assert_eq!(result.metadata.unique_variable_ids, vec!["v-1", "v-2"]);
        assert_eq!(result.metadata.missing_from_catalogue, vec!["v-2"]);
        assert!(!result.experiment_context[0].variables_by_level.contains_key("plant"));
    }

    #[tokio::test]
    async fn no_variable_groups_is_not_found() {
        let server = MockServer::start().await;
        mount_groups(&server, json!([])).await;
        let err = by_experiment(&client_for(&server), "tok", "exp-1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn detail_lookups_hit_their_endpoints() {
        let server = MockServer::start().await;
        for (route, id) in [
            ("/core/variable/v-1", "v-1"),
            ("/core/variable-group/vg-1", "vg-1"),
            ("/germplasm/genotype/g-1", "g-1"),
        ] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": id})))
                .expect(1)
                .mount(&server)
                .await;
        }
        let client = client_for(&server);
        assert_eq!(details(&client, "tok", "v-1").await.unwrap()["_id"], "v-1");
        assert_eq!(group_details(&client, "tok", "vg-1").await.unwrap()["_id"], "vg-1");
        assert_eq!(genotype_details(&client, "tok", "g-1").await.unwrap()["_id"], "g-1");
    }

    #[tokio::test]
    async fn traversal_ids_are_rejected() {
        let server = MockServer::start().await;
        let err = details(&client_for(&server), "tok", "../admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
