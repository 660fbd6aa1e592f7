//! Config subcommand handlers.

use lanprint_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(config::load_config()?);
            let out = match global.output {
                OutputFormat::Json => output::render_json(&cfg),
                OutputFormat::Table => toml::to_string_pretty(&cfg).map_err(|e| {
                    CliError::Validation {
                        field: "config".into(),
                        reason: format!("failed to render config: {e}"),
                    }
                })?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Use <name> ──────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            cfg.printer(Some(&name))?;

            cfg.default_printer = Some(name.clone());
            config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("✓ Default printer set to '{name}'");
            }
            Ok(())
        }

        // ── SetAccessCode ───────────────────────────────────────────
        ConfigCommand::SetAccessCode { code } => {
            let cfg = config::load_config()?;
            let (name, _) = cfg.printer(global.printer.as_deref())?;

            let code = match code {
                Some(code) => code,
                None => rpassword::prompt_password(format!("Access code for '{name}': "))?,
            };
            let code = code.trim();
            if code.is_empty() {
                return Err(CliError::Validation {
                    field: "access_code".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            config::store_access_code(&name, code)?;
            if !global.quiet {
                eprintln!("✓ Access code stored in system keyring for printer '{name}'");
            }
            Ok(())
        }
    }
}

fn redacted(mut cfg: Config) -> Config {
    for profile in cfg.printers.values_mut() {
        if profile.access_code.is_some() {
            profile.access_code = Some(REDACTED.into());
        }
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanprint_config::PrinterProfile;

    #[test]
    fn show_never_prints_access_codes() {
        let mut cfg = Config::default();
        cfg.printers.insert(
            "shop".into(),
            PrinterProfile {
                dev_id: "01P00A000000001".into(),
                host: "192.168.1.40".into(),
                model: None,
                name: None,
                username: "bblp".into(),
                access_code: Some("12345678".into()),
                access_code_env: None,
                tls: true,
            },
        );

        let shown = redacted(cfg);
        assert_eq!(
            shown.printers["shop"].access_code.as_deref(),
            Some(REDACTED)
        );
    }
}
