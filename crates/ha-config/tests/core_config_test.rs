//! Loading a configuration directory and applying its core section

mod common;

use common::{registry, write_files};
use ha_config::{
    config_path, hass_config_yaml, log_schema_error, process_ha_core_config, ConfigError,
    PathSegment, Value, ISSUE_COUNTRY_NOT_CONFIGURED,
};
use ha_core::{ConfigSource, HomeAssistant};
use std::path::Path;
use tempfile::TempDir;

#[tokio::test]
async fn test_core_section_from_directory() {
    let dir = TempDir::new().unwrap();
    write_files(
        dir.path(),
        &[
            (
                "configuration.yaml",
                "homeassistant:\n  name: !secret home_name\n  country: NL\n  \
                 unit_system: imperial\n  packages: !include_dir_named packages\n",
            ),
            ("secrets.yaml", "home_name: Cottage\n"),
            (
                "packages/lights.yaml",
                "homeassistant:\n  customize:\n    light.porch:\n      friendly_name: Porch\n",
            ),
        ],
    );

    let (config, errors) = hass_config_yaml(dir.path(), &registry()).await.unwrap();
    assert!(errors.is_empty());

    let mut hass = HomeAssistant::new(dir.path());
    process_ha_core_config(&mut hass, &config.data[ha_core::DOMAIN])
        .await
        .unwrap();

    assert_eq!(hass.config.location_name, "Cottage");
    assert_eq!(hass.config.config_source, ConfigSource::Yaml);
    assert_eq!(hass.config.units.name, ha_core::UNIT_SYSTEM_US_CUSTOMARY);
    assert_eq!(
        hass.customize.get("light.porch").get("friendly_name"),
        Some(&Value::from("Porch"))
    );
    assert!(hass
        .issues
        .get(ha_core::DOMAIN, ISSUE_COUNTRY_NOT_CONFIGURED)
        .is_none());
}

#[tokio::test]
async fn test_core_schema_error_points_at_source_line() {
    let dir = TempDir::new().unwrap();
    write_files(
        dir.path(),
        &[(
            "configuration.yaml",
            "homeassistant:\n  name: Home\n  latitude: north\n",
        )],
    );

    let (config, _) = hass_config_yaml(dir.path(), &registry()).await.unwrap();
    let mut hass = HomeAssistant::new(dir.path());
    let err = process_ha_core_config(&mut hass, &config.data[ha_core::DOMAIN])
        .await
        .unwrap_err();
    let ConfigError::Schema(err) = err else {
        panic!("expected a schema error, got {:?}", err);
    };
    assert_eq!(err.errors()[0].path, config_path!["latitude"]);

    let core = config
        .subtree(&[PathSegment::Key(ha_core::DOMAIN.to_string())])
        .unwrap();
    assert_eq!(core.find_annotation(&err.errors()[0].path).unwrap().line, 3);

    log_schema_error(&err, ha_core::DOMAIN, &core, Some(&mut hass), None);
    assert!(hass.setup_errors.contains_key(ha_core::DOMAIN));
}

#[tokio::test]
async fn test_relative_config_directory() {
    // Created in the working directory so it can be named relatively
    let dir = TempDir::new_in(".").unwrap();
    write_files(
        dir.path(),
        &[
            (
                "configuration.yaml",
                "homeassistant:\n  name: !secret home_name\nlight: !include lights.yaml\n",
            ),
            ("secrets.yaml", "home_name: Cabin\n"),
            ("lights.yaml", "platform: demo\n"),
        ],
    );
    let relative = Path::new(dir.path().file_name().unwrap());
    assert!(relative.is_relative());

    let (config, errors) = hass_config_yaml(relative, &registry()).await.unwrap();
    assert!(errors.is_empty());
    assert_eq!(config.data["homeassistant"]["name"], Value::from("Cabin"));
    assert_eq!(config.data["light"]["platform"], Value::from("demo"));

    let light = config.find_annotation(&config_path!["light", "platform"]).unwrap();
    assert!(light.file.ends_with("lights.yaml"));
}
