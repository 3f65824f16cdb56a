//! Entity ID helpers
//!
//! Entity IDs are `domain.object_id` pairs. Both parts are lowercase
//! alphanumeric with underscores and cannot start or end with an underscore;
//! a domain additionally cannot contain `__`.

/// Split an entity ID into domain and object ID
pub fn split_entity_id(entity_id: &str) -> Option<(&str, &str)> {
    entity_id.split_once('.')
}

/// Check whether `domain` is a valid domain name
///
/// Equivalent to the pattern `(?!.+__)(?!_)[\da-z_]+(?<!_)`
pub fn valid_domain(domain: &str) -> bool {
    !domain.contains("__") && valid_slug_part(domain)
}

/// Check whether `entity_id` is a valid `domain.object_id`
pub fn valid_entity_id(entity_id: &str) -> bool {
    match split_entity_id(entity_id) {
        Some((domain, object_id)) => valid_domain(domain) && valid_slug_part(object_id),
        None => false,
    }
}

fn valid_slug_part(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
