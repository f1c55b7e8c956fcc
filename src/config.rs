use std::path::Path;

use serde::Deserialize;

use crate::cli::{Cli, LogFormat, OutputFormat};
use crate::error::{Error, Result};
use crate::template;

pub const DEFAULT_CONFIG_PATH: &str = "devdash.toml";
pub const DEFAULT_SERVICE_TREE: &str = "default";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub offline: Option<bool>,
    pub service_tree: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub ado: Option<AdoConfig>,
    pub kusto: Option<KustoConfig>,
}

/// `[ado]` section: work-tracking backlog.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AdoConfig {
    pub organization: String,
    pub project: String,
    pub backlog_query_id: Option<String>,
    /// Read a personal access token from this variable instead of using managed identity.
    pub token_env: Option<String>,
    /// User-assigned managed identity.
    pub client_id: Option<String>,
}

/// `[kusto]` section: analytics cluster behind the IcM and S360 feeds.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct KustoConfig {
    pub cluster: Option<String>,
    pub database: Option<String>,
    #[serde(default)]
    pub icm_query: String,
    #[serde(default)]
    pub s360_query: String,
    /// User-assigned managed identity.
    pub client_id: Option<String>,
    /// Application key auth: names of the variables holding the client id,
    /// client secret and tenant id. All three or none.
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,
    pub tenant_id_env: Option<String>,
}

/// Environment variable names for application key auth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationKeyVars<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub tenant_id: &'a str,
}

impl KustoConfig {
    pub fn application_key(&self) -> Option<ApplicationKeyVars<'_>> {
        match (
            self.client_id_env.as_deref(),
            self.client_secret_env.as_deref(),
            self.tenant_id_env.as_deref(),
        ) {
            (Some(client_id), Some(client_secret), Some(tenant_id)) => Some(ApplicationKeyVars {
                client_id,
                client_secret,
                tenant_id,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub offline: bool,
    pub service_tree: String,
    pub http_timeout_secs: u64,
    pub ado: Option<AdoConfig>,
    pub kusto: Option<KustoConfig>,
    pub format: OutputFormat,
    pub log_format: LogFormat,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = Path::new(cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));
        let file_config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            parse_config(&content)?
        } else if cli.offline {
            // offline mode runs without any upstream settings
            ConfigFile::default()
        } else {
            return Err(Error::ConfigNotFound(config_path.to_path_buf()));
        };

        let config = merge(file_config, cli);
        template::check_service_tree(&config.service_tree)
            .map_err(|e| Error::ConfigValidation(format!("service_tree: {e}")))?;
        Ok(config)
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(timeout) = config.http_timeout_secs
        && timeout == 0
    {
        return Err(Error::ConfigValidation(
            "http_timeout_secs must be > 0".to_string(),
        ));
    }

    if let Some(ref ado) = config.ado {
        if !is_http_url(&ado.organization) {
            return Err(Error::ConfigValidation(format!(
                "ado.organization must be an http(s) URL, got: {}",
                ado.organization
            )));
        }
        if ado.project.trim().is_empty() {
            return Err(Error::ConfigValidation(
                "ado.project must not be empty".to_string(),
            ));
        }
        if let Some(ref var) = ado.token_env
            && var.trim().is_empty()
        {
            return Err(Error::ConfigValidation(
                "ado.token_env must not be empty".to_string(),
            ));
        }
    }

    if let Some(ref kusto) = config.kusto {
        if let Some(ref cluster) = kusto.cluster
            && !cluster.trim().is_empty()
            && !is_http_url(cluster)
        {
            return Err(Error::ConfigValidation(format!(
                "kusto.cluster must be an http(s) URL, got: {cluster}"
            )));
        }
        let key_vars = [
            ("client_id_env", &kusto.client_id_env),
            ("client_secret_env", &kusto.client_secret_env),
            ("tenant_id_env", &kusto.tenant_id_env),
        ];
        let set = key_vars.iter().filter(|(_, var)| var.is_some()).count();
        if set != 0 && set != key_vars.len() {
            return Err(Error::ConfigValidation(
                "kusto.client_id_env, kusto.client_secret_env and kusto.tenant_id_env \
                 must be set together"
                    .to_string(),
            ));
        }
        for (key, var) in key_vars {
            if let Some(var) = var
                && var.trim().is_empty()
            {
                return Err(Error::ConfigValidation(format!(
                    "kusto.{key} must not be empty"
                )));
            }
        }

        for (key, query) in [("icm_query", &kusto.icm_query), ("s360_query", &kusto.s360_query)] {
            template::validate_template(query)
                .map_err(|e| Error::ConfigValidation(format!("kusto.{key}: {e}")))?;
        }
    }

    Ok(())
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Config {
    Config {
        offline: cli.offline || file.offline.unwrap_or(false),
        service_tree: cli
            .service_tree
            .clone()
            .or(file.service_tree)
            .unwrap_or_else(|| DEFAULT_SERVICE_TREE.to_string()),
        http_timeout_secs: file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        ado: file.ado,
        kusto: file.kusto,
        format: cli.format,
        log_format: cli.log_format,
    }
}
