//! Active project / environment selection over a [`GraphQlConfig`].

use crate::types::{ActiveSelection, ConfigError, EndpointConfig, Entries, Endpoints, GraphQlConfig};

/// Parse configuration text. YAML is a superset of JSON, so both
/// `.graphqlconfig` and `.graphqlconfig.yml` contents are accepted.
pub fn parse(text: &str) -> Result<GraphQlConfig, ConfigError> {
    serde_yaml_ng::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Whether `text` parses as the structured (YAML) format. Parse failures
/// are reported as `false`, never as an error.
pub fn is_structured_format(text: &str) -> bool {
    match serde_yaml_ng::from_str::<serde_yaml_ng::Value>(text) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("config text is not structured: {e}");
            false
        }
    }
}

/// Default selection: the first top-level environment; otherwise the first
/// project and its first environment; otherwise nothing. Declaration order
/// decides "first".
pub fn resolve_initial_selection(config: &GraphQlConfig) -> ActiveSelection {
    if let Some((env, _)) = top_level_endpoints(config).and_then(Entries::first) {
        return ActiveSelection {
            project_name: None,
            env_name: Some(env.to_string()),
        };
    }

    let first_project = config.projects.as_ref().and_then(Entries::first);
    if let Some((project_name, project)) = first_project {
        let first_env = project
            .extensions
            .as_ref()
            .and_then(|ext| ext.endpoints.as_ref())
            .and_then(Entries::first);
        if let Some((env, _)) = first_env {
            return ActiveSelection {
                project_name: Some(project_name.to_string()),
                env_name: Some(env.to_string()),
            };
        }
    }

    ActiveSelection::default()
}

/// Look up `env_name` (inside `project_name` when given) and return its
/// declared endpoint, subscription hint and headers.
pub fn resolve_endpoints(
    config: &GraphQlConfig,
    env_name: &str,
    project_name: Option<&str>,
) -> Result<Endpoints, ConfigError> {
    environments(config, project_name)
        .and_then(|envs| envs.get(env_name))
        .map(EndpointConfig::to_endpoints)
        .ok_or_else(|| ConfigError::EnvironmentNotFound {
            env: env_name.to_string(),
            project: project_name.map(str::to_string),
        })
}

/// The environments declared at the top level (`project_name == None`) or in
/// the named project.
pub fn environments<'a>(
    config: &'a GraphQlConfig,
    project_name: Option<&str>,
) -> Option<&'a Entries<EndpointConfig>> {
    match project_name {
        None => top_level_endpoints(config),
        Some(name) => config
            .projects
            .as_ref()?
            .get(name)?
            .extensions
            .as_ref()?
            .endpoints
            .as_ref(),
    }
}

fn top_level_endpoints(config: &GraphQlConfig) -> Option<&Entries<EndpointConfig>> {
    config.extensions.as_ref()?.endpoints.as_ref()
}
