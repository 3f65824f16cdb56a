//! Reporting configuration failures to the user

use ha_core::HomeAssistant;
use tracing::error;

use crate::annotation::ConfigTree;
use crate::humanize::{format_homeassistant_error, format_schema_error};
use crate::integration::ValidatorError;
use crate::schema::SchemaError;

/// ID of the notification listing integrations that failed setup
pub const INVALID_CONFIG_NOTIFICATION_ID: &str = "invalid_config";
const INVALID_CONFIG_TITLE: &str = "Invalid config";

/// Add `component` to the cumulative setup error notification
///
/// A link recorded earlier for the same component is kept.
pub fn notify_setup_error(hass: &mut HomeAssistant, component: &str, display_link: Option<&str>) {
    let entry = hass.setup_errors.entry(component.to_string()).or_insert(None);
    if entry.is_none() {
        *entry = display_link.map(String::from);
    }

    let mut message = String::from("The following integrations and platforms could not be set up:\n\n");
    for (name, link) in &hass.setup_errors {
        let show_logs = format!("[Show logs](/config/logs?filter={})", name);
        let part = match link {
            Some(link) => format!("[{}]({})", name, link),
            None => name.clone(),
        };
        message.push_str(&format!(" - {} ({})\n", part, show_logs));
    }
    message.push_str("\nPlease check your config and [logs](/config/logs).");

    hass.notifications.create(
        INVALID_CONFIG_NOTIFICATION_ID,
        message,
        Some(INVALID_CONFIG_TITLE.to_string()),
    );
}

/// Log a schema failure and add it to the setup error notification
pub fn log_schema_error(
    error: &SchemaError,
    domain: &str,
    config: &ConfigTree,
    hass: Option<&mut HomeAssistant>,
    link: Option<&str>,
) {
    if let Some(hass) = hass {
        notify_setup_error(hass, domain, link);
    }
    error!("{}", format_schema_error(error, domain, config, link));
}

/// Log a failure reported by an integration's own config validator
pub fn log_config_validator_error(
    error: &ValidatorError,
    domain: &str,
    config: &ConfigTree,
    hass: Option<&mut HomeAssistant>,
    link: Option<&str>,
) {
    if let ValidatorError::Invalid(e) = error {
        log_schema_error(e, domain, config, hass, link);
        return;
    }

    if let Some(hass) = hass {
        notify_setup_error(hass, domain, link);
    }
    error!(
        "{}\n{:?}",
        format_homeassistant_error(&error.to_string(), domain, link),
        error
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_path;
    use crate::schema::{Invalid, MSG_REQUIRED_KEY};

    #[test]
    fn test_notification_is_cumulative() {
        let mut hass = HomeAssistant::new("/config");
        notify_setup_error(&mut hass, "light", Some("https://docs/light"));
        notify_setup_error(&mut hass, "sensor.demo", None);
        notify_setup_error(&mut hass, "light", None);

        let notification = hass.notifications.get(INVALID_CONFIG_NOTIFICATION_ID).unwrap();
        assert_eq!(notification.title.as_deref(), Some("Invalid config"));
        assert_eq!(
            notification.message,
            "The following integrations and platforms could not be set up:\n\n\
             \x20- [light](https://docs/light) ([Show logs](/config/logs?filter=light))\n\
             \x20- sensor.demo ([Show logs](/config/logs?filter=sensor.demo))\n\
             \nPlease check your config and [logs](/config/logs)."
        );
    }

    #[test]
    fn test_log_errors_notify() {
        let mut hass = HomeAssistant::new("/config");
        let config = ConfigTree::new(serde_yaml::from_str("http: {}").unwrap());
        let schema_error = SchemaError::from(Invalid::new(MSG_REQUIRED_KEY).at(config_path!["http", "port"]));
        log_schema_error(&schema_error, "http", &config, Some(&mut hass), None);

        let domain_error = ValidatorError::Domain("bad combination".into());
        log_config_validator_error(&domain_error, "demo", &config, Some(&mut hass), None);

        assert_eq!(hass.setup_errors.len(), 2);
        assert!(hass.setup_errors.contains_key("demo"));
    }
}
