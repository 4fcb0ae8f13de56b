//! Config subcommand handlers.

use dialoguer::{Confirm, Input, Select};
use edgeprov_config::{Config, DeviceProfile, WEBHOOK_TOKEN_KEY, device_key, save_config_to, store_secret};
use serde_json::Value;

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Config as a JSON tree with secrets masked and unset fields dropped.
fn redacted(cfg: &Config) -> Result<Value, CliError> {
    let mut value = serde_json::to_value(cfg)?;
    redact(&mut value);
    Ok(value)
}

fn redact(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
        for (key, v) in map.iter_mut() {
            if matches!(key.as_str(), "password" | "token") && v.is_string() {
                *v = Value::String(REDACTED.into());
            } else {
                redact(v);
            }
        }
    }
}

/// Prompt for a secret and offer keyring or plaintext storage. Returns the
/// plaintext to write to the config file, if that was chosen.
fn capture_secret(label: &str, keyring_key: &str) -> Result<Option<String>, CliError> {
    let secret = rpassword::prompt_password(format!("{label}: ")).map_err(prompt_err)?;
    if secret.is_empty() {
        return Ok(None);
    }

    let store_choices = &["Store in system keyring (recommended)", "Save to config file (plaintext)"];
    let store_selection = Select::new()
        .with_prompt(format!("Where to store the {}?", label.to_lowercase()))
        .items(store_choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if store_selection == 0 {
        store_secret(keyring_key, &secret)?;
        eprintln!("   ✓ {label} stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, ctx: &Context) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let path = &ctx.config_path;
            eprintln!("edgeprov configuration wizard");
            eprintln!("   Config path: {}\n", path.display());

            if path.exists() && !ctx.yes {
                let overwrite = Confirm::new()
                    .with_prompt("A config file already exists. Overwrite it?")
                    .default(false)
                    .interact()
                    .map_err(prompt_err)?;
                if !overwrite {
                    eprintln!("Aborted.");
                    return Ok(());
                }
            }

            // 1. First device
            let name: String = Input::new()
                .with_prompt("Device name")
                .default("core-1".into())
                .interact_text()
                .map_err(prompt_err)?;
            let host: String = Input::new()
                .with_prompt("Device management address")
                .interact_text()
                .map_err(prompt_err)?;
            let port: u16 = Input::new()
                .with_prompt("API port")
                .default(edgeprov_api::DEFAULT_API_PORT)
                .interact_text()
                .map_err(prompt_err)?;
            let username: String = Input::new()
                .with_prompt("API user")
                .default("odoo_noc".into())
                .interact_text()
                .map_err(prompt_err)?;
            let sector: String = Input::new()
                .with_prompt("Sector code served by this device (empty for none)")
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;
            let password = capture_secret("Password", &device_key(&name))?;

            // 2. Webhook
            let bind: String = Input::new()
                .with_prompt("Webhook listen address")
                .default(ctx.config.webhook.bind.clone())
                .interact_text()
                .map_err(prompt_err)?;
            let token = capture_secret("Webhook token", WEBHOOK_TOKEN_KEY)?;

            // 3. Build and write config
            let mut cfg = Config::default();
            cfg.webhook.bind = bind;
            cfg.webhook.token = token;
            cfg.devices.insert(
                name.clone(),
                DeviceProfile {
                    host,
                    port,
                    username,
                    password,
                    password_env: None,
                    sector: Some(sector).filter(|s| !s.trim().is_empty()),
                },
            );
            save_config_to(&cfg, path)?;

            eprintln!("\n✓ Configuration written to {}", path.display());
            eprintln!("\n  Test it: edgeprov jobs enqueue device_healthcheck --device {name} && edgeprov jobs run");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let value = redacted(&ctx.config)?;
            let out = output::render_single(
                ctx.output,
                &value,
                |v| toml::to_string_pretty(v).unwrap_or_else(|e| format!("# cannot render as TOML: {e}")),
                |_| ctx.config_path.display().to_string(),
            );
            output::print_output(&out, ctx.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", ctx.config_path.display());
            Ok(())
        }

        // ── SetPassword ─────────────────────────────────────────────
        ConfigCommand::SetPassword { device, webhook } => {
            let (key, label) = if webhook {
                (WEBHOOK_TOKEN_KEY.to_owned(), "webhook token".to_owned())
            } else {
                let name = device.unwrap_or_default();
                if !ctx.config.devices.contains_key(&name) {
                    return Err(CliError::NotFound {
                        resource_type: "device".into(),
                        identifier: name,
                        list_command: "config show".into(),
                    });
                }
                (device_key(&name), format!("device '{name}'"))
            };

            let secret = rpassword::prompt_password("Secret: ").map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "secret".into(),
                    reason: "value cannot be empty".into(),
                });
            }
            store_secret(&key, &secret)?;
            eprintln!("✓ Secret stored in system keyring for {label}");
            Ok(())
        }
    }
}
