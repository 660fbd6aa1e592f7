#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use figment::Jail;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

use lanprint_config::{
    Config, PrinterProfile, load_config_from, profile_to_device, resolve_access_code,
    save_config_to, to_agent_config,
};

const SAMPLE: &str = r#"
default_printer = "shop"

[defaults]
settle_delay_ms = 1500
upload_timeout_secs = 120

[printers.shop]
dev_id = "01P00A000000001"
host = "192.168.1.40"
model = "C12"
access_code_env = "SHOP_ACCESS_CODE"

[printers.garage]
dev_id = "00M00A000000002"
host = "garage.lan"
access_code = "87654321"
tls = false
"#;

#[test]
fn file_and_environment_merge_over_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", SAMPLE)?;
        jail.set_env("LANPRINT_DEFAULTS__KEEP_ALIVE_SECS", "30");

        let cfg = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
        assert_eq!(cfg.default_printer.as_deref(), Some("shop"));
        assert_eq!(cfg.printers.len(), 2);

        let agent = to_agent_config(&cfg.defaults);
        assert_eq!(agent.settle_delay, Duration::from_millis(1500));
        assert_eq!(agent.upload_timeout, Duration::from_secs(120));
        assert_eq!(agent.keep_alive, Duration::from_secs(30));
        assert_eq!(agent.connect_timeout, Duration::from_secs(10));

        let garage = &cfg.printers["garage"];
        assert_eq!(garage.username, "bblp");
        assert!(!garage.tls);
        Ok(())
    });
}

#[test]
fn missing_file_yields_defaults() {
    Jail::expect_with(|_| {
        let cfg = load_config_from(Path::new("nope.toml")).map_err(|e| e.to_string())?;
        assert!(cfg.printers.is_empty());
        assert_eq!(cfg.defaults.settle_delay_ms, 1000);
        Ok(())
    });
}

#[test]
fn access_code_prefers_environment() {
    Jail::expect_with(|jail| {
        jail.set_env("SHOP_ACCESS_CODE", "11112222");
        let profile = PrinterProfile {
            dev_id: "01P00A000000001".into(),
            host: "192.168.1.40".into(),
            model: None,
            name: None,
            username: "bblp".into(),
            access_code: Some("plaintext".into()),
            access_code_env: Some("SHOP_ACCESS_CODE".into()),
            tls: true,
        };

        let code = resolve_access_code(&profile, "shop").map_err(|e| e.to_string())?;
        assert_eq!(code.expose_secret(), "11112222");

        let device = profile_to_device(&profile, "shop").map_err(|e| e.to_string())?;
        assert_eq!(device.id, "01P00A000000001");
        assert!(device.use_tls);
        Ok(())
    });
}

#[test]
fn profile_without_host_is_rejected() {
    let profile = PrinterProfile {
        dev_id: "01P00A000000001".into(),
        host: " ".into(),
        model: None,
        name: None,
        username: "bblp".into(),
        access_code: Some("1234".into()),
        access_code_env: None,
        tls: true,
    };
    let err = profile_to_device(&profile, "shop").unwrap_err();
    assert!(err.to_string().contains("host"));
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/config.toml");

    let mut cfg = Config::default();
    cfg.default_printer = Some("shop".into());
    cfg.defaults.settle_delay_ms = 250;
    save_config_to(&cfg, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded.default_printer.as_deref(), Some("shop"));
    assert_eq!(loaded.defaults.settle_delay_ms, 250);
}
