use std::path::{Path, PathBuf};

use endpoint_resolver::GraphQlConfig;

use crate::error::{CliError, CliResult};

/// File names looked up in the working directory, in order.
pub(crate) const CONFIG_FILE_NAMES: [&str; 3] =
    [".graphqlconfig", ".graphqlconfig.yml", ".graphqlconfig.yaml"];

/// A parsed config file together with its raw text.
#[derive(Debug)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub text: String,
    pub config: GraphQlConfig,
}

/// Load a graphql-config file. JSON and YAML are both accepted.
pub async fn load(path: &Path) -> CliResult<LoadedConfig> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CliError::Config(format!("read {}: {e}", path.display())))?;
    let config = serde_yaml_ng::from_str(&text)
        .map_err(|e| CliError::Config(format!("parse {}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "Loaded graphql config");
    Ok(LoadedConfig {
        path: path.to_path_buf(),
        text,
        config,
    })
}

/// First config file present in `dir`.
pub async fn find(dir: &Path) -> CliResult<Option<PathBuf>> {
    for name in CONFIG_FILE_NAMES {
        let candidate = dir.join(name);
        let exists = tokio::fs::try_exists(&candidate)
            .await
            .map_err(|e| CliError::Config(format!("check {}: {e}", candidate.display())))?;
        if exists {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Load `path` when given, otherwise a config file from the working
/// directory if there is one.
pub async fn load_or_find(path: Option<&Path>) -> CliResult<Option<LoadedConfig>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match find(&std::env::current_dir()?).await? {
            Some(found) => found,
            None => return Ok(None),
        },
    };
    load(&path).await.map(Some)
}
