//! Core Home Assistant configuration
//!
//! Validates the `homeassistant:` section and applies it to the running hub.

use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use tracing::{debug, warn};

use ha_core::{
    get_unit_system, AuthManager, ConfigSource, EntityValues, HomeAssistant, Issue,
    IssueSeverity,
};

use crate::annotation::{key_to_string, mapping_get};
use crate::error::ConfigResult;
use crate::files::is_docker_env;
use crate::packages::{packages_config_schema, CONF_PACKAGES};
use crate::schema::{Extra, Invalid, MapSchema, Schema};
use crate::validation::{
    boolean, coerce_int, country, currency, ensure_list, entity_id, historic_currency, is_dir,
    is_historic_currency, language, latitude, longitude, not_in, schema_with_slug_keys, string,
    temperature_unit, time_zone, unit_system, url, url_path,
};

pub const CONF_NAME: &str = "name";
pub const CONF_LATITUDE: &str = "latitude";
pub const CONF_LONGITUDE: &str = "longitude";
pub const CONF_ELEVATION: &str = "elevation";
pub const CONF_TEMPERATURE_UNIT: &str = "temperature_unit";
pub const CONF_UNIT_SYSTEM: &str = "unit_system";
pub const CONF_TIME_ZONE: &str = "time_zone";
pub const CONF_INTERNAL_URL: &str = "internal_url";
pub const CONF_EXTERNAL_URL: &str = "external_url";
pub const CONF_ALLOWLIST_EXTERNAL_DIRS: &str = "allowlist_external_dirs";
pub const LEGACY_CONF_WHITELIST_EXTERNAL_DIRS: &str = "whitelist_external_dirs";
pub const CONF_ALLOWLIST_EXTERNAL_URLS: &str = "allowlist_external_urls";
pub const CONF_AUTH_PROVIDERS: &str = "auth_providers";
pub const CONF_AUTH_MFA_MODULES: &str = "auth_mfa_modules";
pub const CONF_MEDIA_DIRS: &str = "media_dirs";
pub const CONF_LEGACY_TEMPLATES: &str = "legacy_templates";
pub const CONF_CURRENCY: &str = "currency";
pub const CONF_COUNTRY: &str = "country";
pub const CONF_LANGUAGE: &str = "language";
pub const CONF_CUSTOMIZE: &str = "customize";
pub const CONF_CUSTOMIZE_DOMAIN: &str = "customize_domain";
pub const CONF_CUSTOMIZE_GLOB: &str = "customize_glob";

const CONF_TYPE: &str = "type";
const CONF_ID: &str = "id";

/// Issue raised while a historic currency is configured
pub const ISSUE_HISTORIC_CURRENCY: &str = "historic_currency";
/// Issue raised while no country is configured
pub const ISSUE_COUNTRY_NOT_CONFIGURED: &str = "country_not_configured";
const ISSUE_LEARN_MORE_URL: &str = "homeassistant://config/general";

/// Keys that make the location settings come from YAML
const LOCATION_KEYS: &[&str] = &[
    CONF_LATITUDE,
    CONF_LONGITUDE,
    CONF_NAME,
    CONF_ELEVATION,
    CONF_TIME_ZONE,
    CONF_UNIT_SYSTEM,
    CONF_EXTERNAL_URL,
    CONF_INTERNAL_URL,
    CONF_CURRENCY,
    CONF_COUNTRY,
    CONF_LANGUAGE,
];

fn customize_dict_schema() -> MapSchema {
    MapSchema::new()
        .optional("friendly_name", string())
        .optional("hidden", boolean())
        .optional("assumed_state", boolean())
        .extra(Extra::Allow)
}

fn customize_fields() -> MapSchema {
    let empty = Value::Mapping(Mapping::new());
    MapSchema::new()
        .optional_default(
            CONF_CUSTOMIZE,
            empty.clone(),
            MapSchema::new().keys(entity_id(), customize_dict_schema()),
        )
        .optional_default(
            CONF_CUSTOMIZE_DOMAIN,
            empty.clone(),
            MapSchema::new().keys(string(), customize_dict_schema()),
        )
        .optional_default(
            CONF_CUSTOMIZE_GLOB,
            empty,
            MapSchema::new().keys(string(), customize_dict_schema()),
        )
}

/// Schema of the customize tables, also accepted inside packages
pub fn customize_config_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| customize_fields().into())
}

/// Reject a second entry with the same identity
fn no_duplicates(
    name: &'static str,
    kind: &'static str,
    identity: fn(&Mapping) -> String,
) -> Schema {
    Schema::func(name, move |v| {
        let mut seen = HashSet::new();
        for item in v.as_sequence().into_iter().flatten() {
            let Some(map) = item.as_mapping() else {
                continue;
            };
            if !seen.insert(identity(map)) {
                let item_type = mapping_get(map, CONF_TYPE).map(key_to_string).unwrap_or_default();
                return Err(Invalid::new(format!(
                    "Duplicate {} {} found. Please add unique IDs if you want to have the same {} twice",
                    kind, item_type, kind
                )));
            }
        }
        Ok(v.clone())
    })
}

fn auth_item_schema(insecure_message: &'static str) -> Schema {
    MapSchema::new()
        .required(
            CONF_TYPE,
            Schema::all(vec![
                string(),
                not_in(vec!["insecure_example".to_string()], insecure_message),
            ]),
        )
        .optional(CONF_NAME, string())
        .optional(CONF_ID, string())
        .extra(Extra::Allow)
        .into()
}

fn field_text(map: &Mapping, key: &str) -> Option<String> {
    mapping_get(map, key).filter(|v| !v.is_null()).map(key_to_string)
}

fn auth_providers_schema() -> Schema {
    Schema::all(vec![
        ensure_list(),
        Schema::seq(auth_item_schema(
            "The insecure_example auth provider is for testing only.",
        )),
        no_duplicates("no_duplicate_auth_provider", "auth provider", |map| {
            format!(
                "{}\u{0}{}",
                field_text(map, CONF_TYPE).unwrap_or_default(),
                field_text(map, CONF_ID).unwrap_or_default()
            )
        }),
    ])
}

fn auth_mfa_modules_schema() -> Schema {
    Schema::all(vec![
        ensure_list(),
        Schema::seq(auth_item_schema(
            "The insecure_example mfa module is for testing only.",
        )),
        no_duplicates("no_duplicate_auth_mfa_module", "mfa module", |map| {
            field_text(map, CONF_ID)
                .or_else(|| field_text(map, CONF_TYPE))
                .unwrap_or_default()
        }),
    ])
}

/// Active currency, or a historic one which is flagged after applying
fn currency_or_historic() -> Schema {
    Schema::any_of(vec![currency(), historic_currency()])
}

/// Warn about URLs with a path without altering them
fn filter_bad_internal_external_urls() -> Schema {
    Schema::func("filter_bad_internal_external_urls", |v| {
        if let Some(map) = v.as_mapping() {
            for key in [CONF_INTERNAL_URL, CONF_EXTERNAL_URL] {
                let Some(url) = mapping_get(map, key).and_then(Value::as_str) else {
                    continue;
                };
                if !matches!(url_path(url).as_str(), "" | "/") {
                    warn!("Invalid {} set. It's not allowed to have a path (/bla)", key);
                }
            }
        }
        Ok(v.clone())
    })
}

fn build_core_config_schema() -> Schema {
    let fields = customize_fields().extend(
        MapSchema::new()
            .optional(CONF_NAME, string())
            .optional(CONF_LATITUDE, latitude())
            .optional(CONF_LONGITUDE, longitude())
            .optional(CONF_ELEVATION, coerce_int())
            .remove(CONF_TEMPERATURE_UNIT, temperature_unit())
            .optional(CONF_UNIT_SYSTEM, unit_system())
            .optional(CONF_TIME_ZONE, time_zone())
            .optional(CONF_INTERNAL_URL, url())
            .optional(CONF_EXTERNAL_URL, url())
            .optional(
                CONF_ALLOWLIST_EXTERNAL_DIRS,
                Schema::all(vec![ensure_list(), Schema::seq(is_dir())]),
            )
            .optional(
                LEGACY_CONF_WHITELIST_EXTERNAL_DIRS,
                Schema::all(vec![ensure_list(), Schema::seq(is_dir())]),
            )
            .optional(
                CONF_ALLOWLIST_EXTERNAL_URLS,
                Schema::all(vec![ensure_list(), Schema::seq(url())]),
            )
            .optional_default(
                CONF_PACKAGES,
                Value::Mapping(Mapping::new()),
                packages_config_schema(),
            )
            .optional(CONF_AUTH_PROVIDERS, auth_providers_schema())
            .optional(CONF_AUTH_MFA_MODULES, auth_mfa_modules_schema())
            .optional(CONF_MEDIA_DIRS, schema_with_slug_keys(is_dir()))
            .optional(CONF_LEGACY_TEMPLATES, boolean())
            .optional(CONF_CURRENCY, currency_or_historic())
            .optional(CONF_COUNTRY, country())
            .optional(CONF_LANGUAGE, language()),
    );
    Schema::all(vec![fields.into(), filter_bad_internal_external_urls()])
}

/// Schema of the `homeassistant:` section
pub fn core_config_schema() -> &'static Schema {
    static SCHEMA: OnceLock<Schema> = OnceLock::new();
    SCHEMA.get_or_init(build_core_config_schema)
}

fn default_auth_providers() -> Vec<Value> {
    let mut provider = Mapping::new();
    provider.insert("type".into(), "homeassistant".into());
    vec![Value::Mapping(provider)]
}

fn default_mfa_modules() -> Vec<Value> {
    let mut module = Mapping::new();
    module.insert("type".into(), "totp".into());
    module.insert("id".into(), "totp".into());
    module.insert("name".into(), "Authenticator app".into());
    vec![Value::Mapping(module)]
}

fn sequence_of(config: &Mapping, key: &str) -> Option<Vec<Value>> {
    mapping_get(config, key)
        .and_then(Value::as_sequence)
        .cloned()
}

fn strings_of(config: &Mapping, key: &str) -> Option<Vec<String>> {
    sequence_of(config, key).map(|items| items.iter().map(key_to_string).collect())
}

fn text_of(config: &Mapping, key: &str) -> Option<String> {
    mapping_get(config, key).and_then(Value::as_str).map(String::from)
}

fn mapping_of(config: &Mapping, key: &str) -> Mapping {
    mapping_get(config, key)
        .and_then(Value::as_mapping)
        .cloned()
        .unwrap_or_default()
}

fn raise_issue_if_historic_currency(hass: &HomeAssistant, currency: &str) {
    if !is_historic_currency(currency) {
        hass.issues.delete_issue(ha_core::DOMAIN, ISSUE_HISTORIC_CURRENCY);
        return;
    }
    hass.issues.create_issue(
        Issue::new(ha_core::DOMAIN, ISSUE_HISTORIC_CURRENCY, IssueSeverity::Warning)
            .with_learn_more_url(ISSUE_LEARN_MORE_URL)
            .with_placeholder("currency", currency),
    );
}

fn raise_issue_if_no_country(hass: &HomeAssistant, country: Option<&str>) {
    if country.is_some() {
        hass.issues.delete_issue(ha_core::DOMAIN, ISSUE_COUNTRY_NOT_CONFIGURED);
        return;
    }
    hass.issues.create_issue(
        Issue::new(ha_core::DOMAIN, ISSUE_COUNTRY_NOT_CONFIGURED, IssueSeverity::Warning)
            .with_learn_more_url(ISSUE_LEARN_MORE_URL),
    );
}

/// Merge the customize tables of the section and of every package
fn merge_customize(config: &Mapping) -> EntityValues {
    let mut exact = mapping_of(config, CONF_CUSTOMIZE);
    let mut domain = mapping_of(config, CONF_CUSTOMIZE_DOMAIN);
    let mut glob = mapping_of(config, CONF_CUSTOMIZE_GLOB);

    for (name, package) in mapping_of(config, CONF_PACKAGES) {
        let Some(pkg_cust) = package
            .as_mapping()
            .and_then(|pkg| mapping_get(pkg, ha_core::DOMAIN))
            .filter(|v| !v.is_null())
        else {
            continue;
        };

        let pkg_cust = match customize_config_schema().validate(pkg_cust) {
            Ok(Value::Mapping(validated)) => validated,
            _ => {
                warn!("Package {} contains invalid customize", key_to_string(&name));
                continue;
            }
        };

        exact.extend(mapping_of(&pkg_cust, CONF_CUSTOMIZE));
        domain.extend(mapping_of(&pkg_cust, CONF_CUSTOMIZE_DOMAIN));
        glob.extend(mapping_of(&pkg_cust, CONF_CUSTOMIZE_GLOB));
    }

    EntityValues::new(exact, domain, glob)
}

/// Validate the `homeassistant:` section and apply it to `hass`
///
/// The auth manager is created only when the hub has none yet. Advisory
/// issues for a historic currency and a missing country are created or
/// cleared on every call.
pub async fn process_ha_core_config(hass: &mut HomeAssistant, config: &Value) -> ConfigResult<()> {
    let validated = core_config_schema().validate(config)?;
    let Value::Mapping(config) = validated else {
        return Ok(());
    };

    let created = hass.ensure_auth(|| {
        let providers = sequence_of(&config, CONF_AUTH_PROVIDERS).unwrap_or_else(default_auth_providers);
        let mfa_modules = sequence_of(&config, CONF_AUTH_MFA_MODULES).unwrap_or_else(default_mfa_modules);
        AuthManager::new(providers, mfa_modules)
    });
    if created {
        debug!("Auth manager initialized");
    }

    let hac = &mut hass.config;

    if LOCATION_KEYS.iter().any(|key| mapping_get(&config, key).is_some()) {
        hac.config_source = ConfigSource::Yaml;
    }

    if let Some(lat) = mapping_get(&config, CONF_LATITUDE).and_then(Value::as_f64) {
        hac.latitude = lat;
    }
    if let Some(lon) = mapping_get(&config, CONF_LONGITUDE).and_then(Value::as_f64) {
        hac.longitude = lon;
    }
    if let Some(name) = text_of(&config, CONF_NAME) {
        hac.location_name = name;
    }
    if let Some(elevation) = mapping_get(&config, CONF_ELEVATION).and_then(Value::as_i64) {
        hac.elevation = elevation;
    }
    if let Some(internal_url) = text_of(&config, CONF_INTERNAL_URL) {
        hac.internal_url = Some(internal_url);
    }
    if let Some(external_url) = text_of(&config, CONF_EXTERNAL_URL) {
        hac.external_url = Some(external_url);
    }
    if let Some(media_dirs) = mapping_get(&config, CONF_MEDIA_DIRS).and_then(Value::as_mapping) {
        hac.media_dirs = media_dirs
            .iter()
            .map(|(k, v)| (key_to_string(k), key_to_string(v)))
            .collect();
    }
    if let Some(legacy_templates) = mapping_get(&config, CONF_LEGACY_TEMPLATES).and_then(Value::as_bool) {
        hac.legacy_templates = legacy_templates;
    }
    if let Some(currency) = text_of(&config, CONF_CURRENCY) {
        hac.currency = currency;
    }
    if let Some(country) = text_of(&config, CONF_COUNTRY) {
        hac.country = Some(country);
    }
    if let Some(language) = text_of(&config, CONF_LANGUAGE) {
        hac.language = language;
    }

    raise_issue_if_historic_currency(hass, &hass.config.currency);
    raise_issue_if_no_country(hass, hass.config.country.as_deref());

    let hac = &mut hass.config;

    if let Some(time_zone) = text_of(&config, CONF_TIME_ZONE) {
        hac.set_time_zone(time_zone);
    }

    if mapping_get(&config, CONF_MEDIA_DIRS).is_none() {
        let local = if is_docker_env() {
            "/media".to_string()
        } else {
            hac.path("media").display().to_string()
        };
        hac.media_dirs = BTreeMap::from([("local".to_string(), local)]);
    }

    hac.allowlist_external_dirs = std::iter::once(hac.path("www").display().to_string())
        .chain(hac.media_dirs.values().cloned())
        .collect();
    if let Some(dirs) = strings_of(&config, CONF_ALLOWLIST_EXTERNAL_DIRS) {
        hac.allowlist_external_dirs.extend(dirs);
    } else if let Some(dirs) = strings_of(&config, LEGACY_CONF_WHITELIST_EXTERNAL_DIRS) {
        warn!(
            "Key {} has been replaced with {}. Please update your config",
            LEGACY_CONF_WHITELIST_EXTERNAL_DIRS, CONF_ALLOWLIST_EXTERNAL_DIRS
        );
        hac.allowlist_external_dirs.extend(dirs);
    }

    if let Some(urls) = strings_of(&config, CONF_ALLOWLIST_EXTERNAL_URLS) {
        hac.allowlist_external_urls.extend(urls.into_iter().map(|url| {
            if url.ends_with('/') {
                url
            } else {
                format!("{}/", url)
            }
        }));
    }

    if let Some(name) = text_of(&config, CONF_UNIT_SYSTEM) {
        hac.units = get_unit_system(&name).map_err(|e| {
            crate::schema::SchemaError::from(Invalid::new(e.to_string()).at(vec![CONF_UNIT_SYSTEM.into()]))
        })?;
    }

    hass.customize = merge_customize(&config);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::format_schema_error;
    use crate::annotation::ConfigTree;
    use tempfile::TempDir;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_schema_is_idempotent() {
        let config = yaml(
            "name: Home\nlatitude: 32.87\nlongitude: -117.22\nelevation: '73'\n\
             unit_system: imperial\ntime_zone: America/Los_Angeles\n\
             currency: EUR\ncountry: US\nlanguage: en\n\
             customize:\n  light.kitchen:\n    hidden: 'yes'\n",
        );
        let once = core_config_schema().validate(&config).unwrap();
        let twice = core_config_schema().validate(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once["elevation"], Value::from(73));
        assert_eq!(once["unit_system"], yaml("us_customary"));
        assert_eq!(once["customize"]["light.kitchen"]["hidden"], Value::Bool(true));
    }

    #[test]
    fn test_temperature_unit_is_dropped() {
        let validated = core_config_schema().validate(&yaml("temperature_unit: C")).unwrap();
        assert!(validated.get("temperature_unit").is_none());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let config = ConfigTree::new(yaml("name: Home\nbogus: 1"));
        let err = core_config_schema().validate(&config.data).unwrap_err();
        let message = format_schema_error(&err, ha_core::DOMAIN, &config, None);
        assert_eq!(
            message,
            "Invalid config for [homeassistant]: 'bogus' is an invalid option for [homeassistant], check: bogus"
        );
    }

    #[test]
    fn test_auth_provider_validation() {
        let err = core_config_schema()
            .validate(&yaml("auth_providers:\n  - type: insecure_example"))
            .unwrap_err();
        assert!(err.to_string().contains("The insecure_example auth provider is for testing only."));

        let err = core_config_schema()
            .validate(&yaml("auth_providers:\n  - type: homeassistant\n  - type: homeassistant"))
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate auth provider homeassistant found"));

        assert!(core_config_schema()
            .validate(&yaml(
                "auth_providers:\n  - type: homeassistant\n  - type: homeassistant\n    id: second"
            ))
            .is_ok());

        let err = core_config_schema()
            .validate(&yaml("auth_mfa_modules:\n  - type: totp\n  - type: notify\n    id: totp"))
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate mfa module notify found"));
    }

    #[tokio::test]
    async fn test_apply_core_config() {
        let dir = TempDir::new().unwrap();
        let mut hass = HomeAssistant::new(dir.path());
        let config = yaml(
            "name: Huis\nlatitude: 52.37\nlongitude: 4.89\nelevation: 2\n\
             time_zone: Europe/Amsterdam\nunit_system: metric\ncountry: NL\n\
             external_url: https://example.com\n\
             allowlist_external_urls: [https://a.example, 'https://b.example/']\n",
        );
        process_ha_core_config(&mut hass, &config).await.unwrap();

        let hac = &hass.config;
        assert_eq!(hac.location_name, "Huis");
        assert_eq!(hac.latitude, 52.37);
        assert_eq!(hac.elevation, 2);
        assert_eq!(hac.time_zone, "Europe/Amsterdam");
        assert_eq!(hac.config_source, ConfigSource::Yaml);
        assert_eq!(hac.country.as_deref(), Some("NL"));
        assert_eq!(hac.external_url.as_deref(), Some("https://example.com"));
        assert!(hac.allowlist_external_urls.contains("https://a.example/"));
        assert!(hac.allowlist_external_urls.contains("https://b.example/"));
        assert!(hac
            .allowlist_external_dirs
            .contains(&dir.path().join("www").display().to_string()));
        assert!(hass.auth.is_ready());
        assert_eq!(
            hass.auth.manager().unwrap().provider_types(),
            vec!["homeassistant"]
        );
        assert!(hass.issues.get(ha_core::DOMAIN, ISSUE_COUNTRY_NOT_CONFIGURED).is_none());
    }

    #[tokio::test]
    async fn test_auth_initialized_once() {
        let mut hass = HomeAssistant::new("/config");
        process_ha_core_config(&mut hass, &yaml("{}")).await.unwrap();
        process_ha_core_config(
            &mut hass,
            &yaml("auth_providers:\n  - type: trusted_networks"),
        )
        .await
        .unwrap();
        assert_eq!(
            hass.auth.manager().unwrap().provider_types(),
            vec!["homeassistant"]
        );
        assert_eq!(hass.config.config_source, ConfigSource::Default);
    }

    #[tokio::test]
    async fn test_historic_currency_issue() {
        let mut hass = HomeAssistant::new("/config");
        process_ha_core_config(&mut hass, &yaml("currency: LTL")).await.unwrap();
        let issue = hass.issues.get(ha_core::DOMAIN, ISSUE_HISTORIC_CURRENCY).unwrap();
        assert_eq!(issue.severity, IssueSeverity::Warning);
        assert_eq!(issue.translation_placeholders["currency"], "LTL");

        process_ha_core_config(&mut hass, &yaml("currency: EUR")).await.unwrap();
        assert!(hass.issues.get(ha_core::DOMAIN, ISSUE_HISTORIC_CURRENCY).is_none());
        assert!(hass.issues.get(ha_core::DOMAIN, ISSUE_COUNTRY_NOT_CONFIGURED).is_some());
    }

    #[tokio::test]
    async fn test_customize_from_packages() {
        let mut hass = HomeAssistant::new("/config");
        let config = yaml(
            "customize:\n  light.kitchen:\n    friendly_name: Top\n\
             packages:\n  pack_1:\n    homeassistant:\n      customize:\n        \
             light.kitchen:\n          friendly_name: Package\n        \
             switch.fan:\n          icon: mdi:fan\n  \
             pack_2:\n    homeassistant:\n      customize: not a dict\n",
        );
        process_ha_core_config(&mut hass, &config).await.unwrap();
        assert_eq!(
            hass.customize.get("light.kitchen").get("friendly_name"),
            Some(&Value::from("Package"))
        );
        assert_eq!(
            hass.customize.get("switch.fan").get("icon"),
            Some(&Value::from("mdi:fan"))
        );
    }

    #[tokio::test]
    async fn test_legacy_whitelist_dirs() {
        let dir = TempDir::new().unwrap();
        let extra = dir.path().join("extra");
        std::fs::create_dir(&extra).unwrap();
        let mut hass = HomeAssistant::new(dir.path());
        let mut config = Mapping::new();
        config.insert(
            LEGACY_CONF_WHITELIST_EXTERNAL_DIRS.into(),
            extra.display().to_string().into(),
        );
        process_ha_core_config(&mut hass, &Value::Mapping(config)).await.unwrap();
        assert!(hass
            .config
            .allowlist_external_dirs
            .contains(&extra.display().to_string()));
    }
}
