// ── Onboarding documents ──
//
// The onboarding profile is a YAML document. It is read untyped so the
// directory's remote profile can be merged over it before typing.

use std::path::Path;
use std::time::Duration;

use edgeprov_api::{DirectoryClient, TlsMode, TransportConfig};
use edgeprov_core::{OnboardingConfig, OnboardingSecrets};
use figment::Figment;
use figment::providers::{Format, Yaml};
use serde_json::Value;
use url::Url;

use crate::{ConfigError, keyring_get};

/// Read a YAML onboarding document as an untyped value.
pub fn load_onboarding_document(path: &Path) -> Result<Value, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let value: Value = Figment::from(Yaml::file(path)).extract()?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(serde_json::Map::new())),
        _ => Err(ConfigError::Validation {
            field: path.display().to_string(),
            reason: "top level must be a mapping".into(),
        }),
    }
}

/// Keyring key for a secret the onboarding document names by env var.
pub fn onboarding_key(env_name: &str) -> String {
    format!("onboarding/{env_name}")
}

/// Resolve the profile's secrets. A `*_env` name is looked up in the
/// environment first, then in the keyring under `onboarding/<NAME>`.
pub fn resolve_onboarding_secrets(cfg: &OnboardingConfig) -> Result<OnboardingSecrets, ConfigError> {
    let lookup = |name: &str| {
        std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| keyring_get(&onboarding_key(name)))
    };
    Ok(cfg.resolve_secrets(&lookup)?)
}

/// JSON-RPC client for the profile's `odoo` section, if any.
pub fn directory_client(
    cfg: &OnboardingConfig,
    secrets: &OnboardingSecrets,
    timeout: Duration,
) -> Result<Option<DirectoryClient>, ConfigError> {
    let Some(directory) = &cfg.directory else {
        return Ok(None);
    };
    let Some(password) = secrets.directory_password.clone() else {
        return Ok(None);
    };
    let url = Url::parse(&directory.url).map_err(|_| ConfigError::Validation {
        field: "odoo.url".into(),
        reason: format!("invalid URL: {}", directory.url),
    })?;
    let tls = match (&directory.ca_cert, directory.insecure_tls) {
        (_, true) => TlsMode::DangerAcceptInvalid,
        (Some(path), false) if !path.trim().is_empty() => TlsMode::CustomCa(path.into()),
        _ => TlsMode::System,
    };
    let transport = TransportConfig {
        tls,
        ..TransportConfig::default()
    }
    .with_timeout(timeout);
    let client = DirectoryClient::new(&url, &directory.db, &directory.user, password, &transport).map_err(|e| {
        ConfigError::Validation {
            field: "odoo".into(),
            reason: e.to_string(),
        }
    })?;
    Ok(Some(client))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const PROFILE: &str = r#"
mgmt_subnet: 192.168.88.0/24
sector_code: NORTE
target_mac:
routeros:
  api_port: 8728
  mgmt_pass_value: n0c-pass
  allowed_mgmt_ips: [10.0.0.5, 10.0.0.6]
  discovery_interfaces: ether2,ether3
  config:
    wan_interface: ether1
    lan_ports: [ether2, ether3]
    hotspot_dns_name: false
odoo:
  url: https://odoo.isp.example
  db: isp
  user: bot
  pass_value: s3cret
"#;

    fn write(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onboarding.yaml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn yaml_document_types_into_onboarding_config() {
        let (_dir, path) = write(PROFILE);
        let value = load_onboarding_document(&path).unwrap();
        let cfg = OnboardingConfig::from_value(value).unwrap();

        assert_eq!(cfg.mgmt_subnet, "192.168.88.0/24");
        assert!(cfg.target_mac.is_none());
        assert_eq!(cfg.routeros.allowed_mgmt_ips, vec!["10.0.0.5", "10.0.0.6"]);
        assert_eq!(cfg.routeros.discovery_interfaces, vec!["ether2", "ether3"]);
        assert_eq!(cfg.routeros.config.lan_ports, vec!["ether2", "ether3"]);
        assert!(cfg.routeros.config.hotspot_dns_name.is_none());

        let secrets = cfg.resolve_secrets(&|_| None).unwrap();
        assert_eq!(secrets.mgmt_password.expose_secret(), "n0c-pass");
        let client = directory_client(&cfg, &secrets, Duration::from_secs(5)).unwrap();
        assert_eq!(client.unwrap().db(), "isp");
    }

    #[test]
    fn unreadable_ca_certificate_is_rejected() {
        let (dir, path) = write(PROFILE);
        let value = load_onboarding_document(&path).unwrap();
        let mut cfg = OnboardingConfig::from_value(value).unwrap();
        let secrets = cfg.resolve_secrets(&|_| None).unwrap();

        cfg.directory.as_mut().unwrap().ca_cert = Some(dir.path().join("absent.pem").display().to_string());
        let err = directory_client(&cfg, &secrets, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn missing_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_onboarding_document(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn scalar_document_is_rejected() {
        let (_dir, path) = write("just text\n");
        assert!(matches!(
            load_onboarding_document(&path),
            Err(ConfigError::Validation { .. } | ConfigError::Figment(_))
        ));
    }
}
