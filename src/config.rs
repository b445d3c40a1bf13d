//! Environment-driven configuration.

use crate::types::{CfsiError, CfsiResult};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_AWS_REGION: &str = "eu-central-1";
pub const OUTPUT_DIR_ENV: &str = "CFSI_OUTPUT_DIR";
pub const INDEX_DIR_ENV: &str = "CFSI_INDEX_DIR";
pub const CLOUD_MODEL_ENV: &str = "CFSI_CLOUD_MODEL";

/// How long the indexing worker waits on an empty queue before stopping
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct AwsCredentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub aws: AwsCredentials,
    pub output_dir: PathBuf,
    pub index_dir: PathBuf,
    pub cloud_model: Option<PathBuf>,
}

impl Config {
    /// Build configuration from the process environment (and `.env`, if present)
    pub fn from_env() -> CfsiResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> CfsiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let aws = AwsCredentials {
            access_key_id: lookup("AWS_ACCESS_KEY_ID"),
            secret_access_key: lookup("AWS_SECRET_ACCESS_KEY"),
            region: lookup("AWS_REGION").unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
        };

        let output_dir = match lookup(OUTPUT_DIR_ENV) {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if !dir.is_dir() {
                    return Err(CfsiError::Config(format!(
                        "{} points to {}, which does not exist",
                        OUTPUT_DIR_ENV,
                        dir.display()
                    )));
                }
                dir
            }
            None => default_output_dir(),
        };

        let index_dir = lookup(INDEX_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_index_dir);

        let cloud_model = lookup(CLOUD_MODEL_ENV).map(PathBuf::from);

        Ok(Self { aws, output_dir, index_dir, cloud_model })
    }

    /// Forward S3 settings to GDAL's `/vsis3/` handler
    pub fn apply_gdal_options(&self) -> CfsiResult<()> {
        let mut options = vec![
            ("AWS_REGION", self.aws.region.clone()),
            ("AWS_REQUEST_PAYER", "requester".to_string()),
        ];
        if let Some(key) = &self.aws.access_key_id {
            options.push(("AWS_ACCESS_KEY_ID", key.clone()));
        }
        if let Some(secret) = &self.aws.secret_access_key {
            options.push(("AWS_SECRET_ACCESS_KEY", secret.clone()));
        }

        for (key, value) in options {
            gdal::config::set_config_option(key, &value)?;
        }
        Ok(())
    }

    pub fn cloud_model(&self) -> CfsiResult<&PathBuf> {
        self.cloud_model.as_ref().ok_or_else(|| {
            CfsiError::Config(format!("{} is not set; cannot run the cloud classifier", CLOUD_MODEL_ENV))
        })
    }
}

fn default_output_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tmp")
        .join("cfsi_output")
}

fn default_index_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cfsi")
        .join("index")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(HashMap::new())).unwrap();
        assert_eq!(config.aws.region, "eu-central-1");
        assert!(config.output_dir.ends_with("tmp/cfsi_output"));
        assert!(config.cloud_model.is_none());
        assert!(config.cloud_model().is_err());
    }

    #[test]
    fn test_output_dir_must_exist() {
        let vars = HashMap::from([(OUTPUT_DIR_ENV, "/definitely/not/here".to_string())]);
        assert!(matches!(Config::from_lookup(lookup(vars)), Err(CfsiError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let vars = HashMap::from([
            (OUTPUT_DIR_ENV, dir.path().display().to_string()),
            ("AWS_REGION", "us-west-2".to_string()),
        ]);
        let config = Config::from_lookup(lookup(vars)).unwrap();
        assert_eq!(config.output_dir, dir.path());
        assert_eq!(config.aws.region, "us-west-2");
    }
}
