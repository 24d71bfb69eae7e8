//! Alias-based field normalization for the primary provider.
//!
//! Nominatim's `address` object uses a wide, free-form key vocabulary
//! ("road" may arrive as `footway`, `street`, `pedestrian`, ...). Each
//! canonical field has a priority-ordered alias list; the first alias
//! present in the raw attribute map wins. The lists were derived
//! empirically against real provider responses and must be kept in this
//! exact order.

use serde_json::{Map, Value};

use crate::GeocodeError;

/// Aliases for the canonical `house_number` field.
pub const HOUSE_NUMBER_ALIASES: &[&str] = &["house_number", "street_number"];

/// Aliases for the canonical `road` field.
pub const ROAD_ALIASES: &[&str] = &[
    "road",
    "footway",
    "street",
    "street_name",
    "residential",
    "path",
    "pedestrian",
    "road_reference",
    "road_reference_intl",
    "square",
    "place",
];

/// Aliases for the canonical `neighbourhood` field.
pub const NEIGHBOURHOOD_ALIASES: &[&str] = &[
    "neighbourhood",
    "suburb",
    "city_district",
    "district",
    "quarter",
    "borough",
    "city_block",
    "residential",
    "commercial",
    "houses",
    "subdistrict",
    "subdivision",
    "ward",
];

/// Aliases for the canonical `city` field: city vocabulary, then the
/// village vocabulary, then the municipality vocabulary.
pub const CITY_ALIASES: &[&str] = &[
    "city",
    "town",
    "township",
    // village vocabulary
    "village",
    "municipality",
    "hamlet",
    "locality",
    "croft",
    // municipality vocabulary
    "municipality",
    "local_administrative_area",
    "subcounty",
];

/// Aliases for the canonical `county` field.
pub const COUNTY_ALIASES: &[&str] = &["county", "county_code", "department"];

/// Aliases for the canonical `state` field.
pub const STATE_ALIASES: &[&str] = &["state", "province", "state_code"];

/// Aliases for the canonical `country` field.
pub const COUNTRY_ALIASES: &[&str] = &["country", "country_name"];

/// Aliases for the canonical `postcode` field.
pub const POSTCODE_ALIASES: &[&str] = &["postcode"];

/// Aliases for the canonical `state_district` field.
pub const STATE_DISTRICT_ALIASES: &[&str] = &["state_district"];

/// Returns the value of the first alias present in the raw attribute
/// map, or `None` if no alias matches.
///
/// # Errors
///
/// Returns [`GeocodeError::Shape`] if a matching key is present but its
/// value is not a string.
pub fn field(
    address: &Map<String, Value>,
    aliases: &[&str],
) -> Result<Option<String>, GeocodeError> {
    for alias in aliases {
        if let Some(value) = address.get(*alias) {
            return match value {
                Value::String(s) => Ok(Some(s.clone())),
                other => Err(GeocodeError::Shape {
                    message: format!("address field '{alias}' is not a string: {other}"),
                }),
            };
        }
    }
    Ok(None)
}

/// Resolves the short name of a geocoded place.
///
/// Sources are checked in priority order, each present value overriding
/// the previous one:
///
/// 1. top-level `name`, if non-empty
/// 2. `namedetails.name`, if present
/// 3. `namedetails.alt_name`, if present
/// 4. if nothing above produced a non-empty value, the text before the
///    first comma of `display_name`
#[must_use]
pub fn place_name(place: &Value) -> String {
    let mut name = String::new();

    if let Some(n) = place.get("name").and_then(Value::as_str) {
        if !n.is_empty() {
            name = n.to_string();
        }
    }

    if let Some(details) = place.get("namedetails").filter(|v| !v.is_null()) {
        if let Some(n) = details.get("name").and_then(Value::as_str) {
            name = n.to_string();
        }
        if let Some(n) = details.get("alt_name").and_then(Value::as_str) {
            name = n.to_string();
        }
    }

    if name.is_empty() {
        name = place
            .get("display_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .split(',')
            .next()
            .unwrap_or_default()
            .to_string();
    }

    name
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn addr(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn first_alias_in_list_order_wins() {
        let address = addr(json!({"footway": "X", "road": "Main St"}));
        assert_eq!(
            field(&address, ROAD_ALIASES).unwrap(),
            Some("Main St".to_string())
        );
    }

    #[test]
    fn no_alias_matches() {
        let address = addr(json!({"postcode": "12345"}));
        assert_eq!(field(&address, ROAD_ALIASES).unwrap(), None);
    }

    #[test]
    fn village_vocabulary_absorbed_into_city() {
        let address = addr(json!({"hamlet": "Smallville"}));
        assert_eq!(
            field(&address, CITY_ALIASES).unwrap(),
            Some("Smallville".to_string())
        );
    }

    #[test]
    fn municipality_vocabulary_absorbed_into_city() {
        let address = addr(json!({"local_administrative_area": "Greater Area"}));
        assert_eq!(
            field(&address, CITY_ALIASES).unwrap(),
            Some("Greater Area".to_string())
        );
    }

    #[test]
    fn city_beats_village_vocabulary() {
        let address = addr(json!({"hamlet": "Smallville", "town": "Bigville"}));
        assert_eq!(
            field(&address, CITY_ALIASES).unwrap(),
            Some("Bigville".to_string())
        );
    }

    #[test]
    fn non_string_alias_value_is_fatal() {
        let address = addr(json!({"road": 42}));
        assert!(matches!(
            field(&address, ROAD_ALIASES),
            Err(GeocodeError::Shape { .. })
        ));
    }

    #[test]
    fn name_falls_back_to_display_name_head() {
        let place = json!({"display_name": "A, B, C"});
        assert_eq!(place_name(&place), "A");
    }

    #[test]
    fn top_level_name_wins_when_no_details() {
        let place = json!({"name": "The Spot", "display_name": "A, B, C"});
        assert_eq!(place_name(&place), "The Spot");
    }

    #[test]
    fn alt_name_overrides_earlier_sources() {
        let place = json!({
            "name": "The Spot",
            "namedetails": {"name": "Details Name", "alt_name": "Alt Name"},
            "display_name": "A, B, C"
        });
        assert_eq!(place_name(&place), "Alt Name");
    }

    #[test]
    fn absent_alt_name_keeps_details_name() {
        let place = json!({
            "name": "The Spot",
            "namedetails": {"name": "Details Name"},
            "display_name": "A, B, C"
        });
        assert_eq!(place_name(&place), "Details Name");
    }

    #[test]
    fn null_namedetails_is_ignored() {
        let place = json!({
            "name": "The Spot",
            "namedetails": null,
            "display_name": "A, B, C"
        });
        assert_eq!(place_name(&place), "The Spot");
    }
}
