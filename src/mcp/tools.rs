//! Tool catalogue: names, descriptions and argument types.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::listing::{DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, SearchCriteria};
use crate::transform::shape::ResponseMode;

pub(crate) fn schema_for<T: JsonSchema>() -> Arc<serde_json::Map<String, Value>> {
    let schema = schemars::schema_for!(T);
    match serde_json::to_value(&schema) {
        Ok(Value::Object(map)) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    }
}

fn default_page_size() -> i64 {
    i64::from(DEFAULT_PAGE_SIZE)
}

fn default_max_pages() -> i64 {
    i64::from(DEFAULT_MAX_PAGES)
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct CountParams {
    /// Upstream filter document (optional)
    #[serde(default)]
    pub filters: Option<Value>,
    /// Overrides the stored bearer token for this call
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListPageParams {
    /// Zero-based page number
    #[serde(default)]
    pub page: i64,
    /// Items per page, 1 to 100
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// Upstream filter document (optional)
    #[serde(default)]
    pub filters: Option<Value>,
    /// Sort document, e.g. {"name": "asc"}
    #[serde(default)]
    pub sort: Option<Value>,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PaginatedParams {
    /// Pages to walk, 1 to 50
    #[serde(default = "default_max_pages")]
    pub max_pages: i64,
    /// Return complete items instead of summary fields
    #[serde(default)]
    pub include_full_data: bool,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub sort: Option<Value>,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExperimentDataParams {
    /// Experiment id (`_id` from listings)
    pub experiment_id: String,
    /// `summary` (counts only) or `full` (default)
    #[serde(default)]
    pub mode: ResponseMode,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExperimentTaskParams {
    pub experiment_id: String,
    /// Task type, defaults to "observation round"
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExperimentParams {
    pub experiment_id: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TrialParams {
    /// Trial id
    pub trial_id: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GenotypesParams {
    pub genotype_ids: Vec<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchByNameParams {
    pub search_term: String,
    /// Match the whole name instead of a substring
    #[serde(default)]
    pub exact_match: bool,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchAdvancedParams {
    pub search_criteria: SearchCriteria,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SetTokenParams {
    pub bearer_token: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct VariableParams {
    pub variable_id: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct VariableGroupParams {
    pub variable_group_id: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GenotypeParams {
    pub genotype_id: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

pub struct ToolSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub schema: fn() -> Arc<serde_json::Map<String, Value>>,
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_experiments_count",
        title: "Count Experiments",
        description: "Total number of experiments matching optional filters, with total_pages for page size 50.",
        schema: schema_for::<CountParams>,
    },
    ToolSpec {
        name: "get_all_experiments",
        title: "List Experiments",
        description: "One page of experiments (page_size 1-100). `_id` of each item is the experiment id. Check has_more and next_page.",
        schema: schema_for::<ListPageParams>,
    },
    ToolSpec {
        name: "get_all_experiments_paginated",
        title: "List Experiments (auto-paginate)",
        description: "Walks up to max_pages pages and returns summary items, or full items with include_full_data. Reports pages_fetched and truncated.",
        schema: schema_for::<PaginatedParams>,
    },
    ToolSpec {
        name: "get_experiment_data",
        title: "Experiment Data",
        description: "Aggregates tasks, notebook, treatment, trial notation, variable groups and genotypes for one experiment. Failed parts are listed in partial_failures.",
        schema: schema_for::<ExperimentDataParams>,
    },
    ToolSpec {
        name: "get_experiment_task",
        title: "Experiment Tasks",
        description: "Raw task documents of an experiment for a task type (default \"observation round\").",
        schema: schema_for::<ExperimentTaskParams>,
    },
    ToolSpec {
        name: "get_experiment_structure",
        title: "Experiment Structure",
        description: "Layout and structural configuration of an experiment.",
        schema: schema_for::<ExperimentParams>,
    },
    ToolSpec {
        name: "get_experiment_notebook",
        title: "Experiment Notebook",
        description: "Notebook entries of a trial.",
        schema: schema_for::<TrialParams>,
    },
    ToolSpec {
        name: "get_experiment_treatment",
        title: "Experiment Treatment",
        description: "Treatment data of a trial.",
        schema: schema_for::<TrialParams>,
    },
    ToolSpec {
        name: "get_trial_notation",
        title: "Trial Notation",
        description: "Notation data of a trial.",
        schema: schema_for::<TrialParams>,
    },
    ToolSpec {
        name: "get_variable_groups",
        title: "Variable Groups",
        description: "Observation-round variable groups of a trial.",
        schema: schema_for::<TrialParams>,
    },
    ToolSpec {
        name: "get_genotypes",
        title: "Genotypes",
        description: "Batch genotype lookup, keyed by genotype id.",
        schema: schema_for::<GenotypesParams>,
    },
    ToolSpec {
        name: "get_genotype_details",
        title: "Genotype Details",
        description: "One genotype by id.",
        schema: schema_for::<GenotypeParams>,
    },
    ToolSpec {
        name: "get_variable_details",
        title: "Variable Details",
        description: "One variable definition by id.",
        schema: schema_for::<VariableParams>,
    },
    ToolSpec {
        name: "get_variable_group_details",
        title: "Variable Group Details",
        description: "One variable group by id.",
        schema: schema_for::<VariableGroupParams>,
    },
    ToolSpec {
        name: "get_variables_by_experiment",
        title: "Experiment Variables",
        description: "Variable definitions used by an experiment, each with experiment_usage (observation round, level, scope).",
        schema: schema_for::<ExperimentParams>,
    },
    ToolSpec {
        name: "search_experiments_by_name",
        title: "Search Experiments by Name",
        description: "Experiments whose name contains (or with exact_match equals) search_term, case-insensitive.",
        schema: schema_for::<SearchByNameParams>,
    },
    ToolSpec {
        name: "search_experiments_advanced",
        title: "Search Experiments",
        description: "Search by name, description, status, created_after, created_before and tags. At least one criterion is required.",
        schema: schema_for::<SearchAdvancedParams>,
    },
    ToolSpec {
        name: "set_bearer_token",
        title: "Set Bearer Token",
        description: "Stores the bearer token used by later calls that do not pass one.",
        schema: schema_for::<SetTokenParams>,
    },
];

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tool_names_are_unique() {
        let names: HashSet<_> = TOOLS.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), TOOLS.len());
    }

    #[test]
    fn schemas_are_objects_with_properties() {
        for tool in TOOLS {
            let schema = (tool.schema)();
            assert_eq!(
                schema.get("type").and_then(Value::as_str),
                Some("object"),
                "{}",
                tool.name
            );
        }
    }

    #[test]
    fn list_params_default_to_first_page_of_fifty() {
        let params: ListPageParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(params.page, 0);
        assert_eq!(params.page_size, i64::from(DEFAULT_PAGE_SIZE));
        let params: ExperimentDataParams =
            serde_json::from_value(serde_json::json!({"experiment_id": "x"})).unwrap();
        assert_eq!(params.mode, ResponseMode::Full);
    }
}
