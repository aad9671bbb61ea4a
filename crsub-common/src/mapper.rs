//! Field mapper: form record → Grist column record
//!
//! Pure and total. Blank inputs produce no column at all, and a value that
//! cannot be coerced (a counter typed as "douze", an object where text is
//! expected) is dropped instead of failing the whole record.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Number;

use crate::record::{FormValue, FrontendRecord};
use crate::schema::{fields_for, RecordKind, ValueKind, PROCESSED_COLUMN, PROCESSED_KEY};

/// Column value accepted by the Grist bulk-insert endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalValue {
    Text(String),
    Number(Number),
    Bool(bool),
    Null,
}

impl Serialize for ExternalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExternalValue::Text(text) => serializer.serialize_str(text),
            ExternalValue::Number(n) => n.serialize(serializer),
            ExternalValue::Bool(flag) => serializer.serialize_bool(*flag),
            ExternalValue::Null => serializer.serialize_unit(),
        }
    }
}

/// Column-keyed record in field-table order
///
/// Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalRecord {
    columns: Vec<(&'static str, ExternalValue)>,
}

impl ExternalRecord {
    pub fn get(&self, column: &str) -> Option<&ExternalValue> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of columns that came from the form (processed flag excluded)
    pub fn data_len(&self) -> usize {
        self.columns
            .iter()
            .filter(|(name, _)| *name != PROCESSED_COLUMN)
            .count()
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }

    fn push(&mut self, column: &'static str, value: ExternalValue) {
        self.columns.push((column, value));
    }
}

impl Serialize for ExternalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in &self.columns {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Map a record with its own kind's field table
pub fn map_record(record: &FrontendRecord) -> ExternalRecord {
    map(record, record.kind())
}

/// Map a record with `kind`'s field table
pub fn map(record: &FrontendRecord, kind: RecordKind) -> ExternalRecord {
    let mut mapped = ExternalRecord::default();

    for spec in fields_for(kind) {
        let Some(value) = record.value(spec.key) else {
            continue;
        };
        if value.is_blank() {
            continue;
        }

        let coerced = match spec.kind {
            ValueKind::Number => to_number(value).map(ExternalValue::Number),
            ValueKind::String | ValueKind::JoinedStringArray => {
                to_text(value).map(ExternalValue::Text)
            }
        };

        match coerced {
            Some(external) => mapped.push(spec.column, external),
            None => tracing::debug!(
                key = spec.key,
                column = spec.column,
                "Dropping value that does not coerce to its column type"
            ),
        }
    }

    let processed = record
        .value(PROCESSED_KEY)
        .is_some_and(FormValue::is_truthy);
    mapped.push(PROCESSED_COLUMN, ExternalValue::Bool(processed));

    mapped
}

/// Out-of-vocabulary values for fields with a fixed set of choices
///
/// Informational only; the record is still mapped and submitted.
pub fn vocabulary_warnings(record: &FrontendRecord) -> Vec<String> {
    fields_for(record.kind())
        .iter()
        .filter(|spec| !spec.choices.is_empty())
        .filter_map(|spec| {
            let value = record.value(spec.key)?;
            if value.is_blank() {
                return None;
            }
            let text = to_text(value)?;
            if spec.choices.contains(&text.as_str()) {
                None
            } else {
                Some(format!(
                    "{}: '{}' is not one of {}",
                    spec.column,
                    text,
                    spec.choices.join(", ")
                ))
            }
        })
        .collect()
}

fn to_text(value: &FormValue) -> Option<String> {
    let text = match value {
        FormValue::Text(text) => text.clone(),
        FormValue::Number(n) => n.to_string(),
        FormValue::Bool(flag) => flag.to_string(),
        FormValue::List(items) => items
            .iter()
            .filter(|item| !item.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        FormValue::Other(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn to_number(value: &FormValue) -> Option<Number> {
    match value {
        FormValue::Number(n) => Some(n.clone()),
        FormValue::Text(text) => parse_number(text),
        FormValue::Bool(_) | FormValue::List(_) | FormValue::Other(_) => None,
    }
}

/// Integers stay integers; non-finite values are rejected
fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(n.into());
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: RecordKind, fields: serde_json::Value) -> FrontendRecord {
        FrontendRecord::from_json(Some(kind), fields).unwrap()
    }

    fn text(value: &str) -> ExternalValue {
        ExternalValue::Text(value.to_string())
    }

    #[test]
    fn test_crca_scenario() {
        let crca = record(
            RecordKind::Crca,
            json!({"secteur": "ALPHA", "indicatifs": ["A1", "A2"], "intervention": "CIC"}),
        );
        let mapped = map(&crca, RecordKind::Crca);

        assert_eq!(mapped.get("Secteur"), Some(&text("ALPHA")));
        assert_eq!(mapped.get("Indic_Patrouille"), Some(&text("A1, A2")));
        assert_eq!(mapped.get("Intervention"), Some(&text("CIC")));
        assert!(!mapped.contains("Lieu"));
        assert!(!mapped.contains("PAM"));
        assert_eq!(mapped.data_len(), 3);
    }

    #[test]
    fn test_crfm_number_scenario() {
        let crfm = record(RecordKind::Crfm, json!({"effectifs": "12", "vlEngages": ""}));
        let mapped = map(&crfm, RecordKind::Crfm);

        assert_eq!(mapped.get("Effectifs"), Some(&ExternalValue::Number(12.into())));
        assert!(!mapped.contains("VL_Engages"));

        let body = serde_json::to_value(&mapped).unwrap();
        assert_eq!(body["Effectifs"], json!(12));
    }

    #[test]
    fn test_blank_values_are_never_emitted() {
        let crca = record(
            RecordKind::Crca,
            json!({"secteur": "", "lieu": null, "indicatifs": [], "resume": "RAS"}),
        );
        let mapped = map_record(&crca);

        let columns: Vec<_> = mapped.columns().collect();
        assert_eq!(columns, vec!["Resume_Intervention", PROCESSED_COLUMN]);
    }

    #[test]
    fn test_malformed_numbers_are_dropped() {
        let crfm = record(
            RecordKind::Crfm,
            json!({
                "effectifs": "douze",
                "nbOad": "1e400",
                "controlesVl": true,
                "mun9mm": [1, 2],
                "grenMp7": " 3 ",
                "feuAutres": 2.5
            }),
        );
        let mapped = map_record(&crfm);

        assert!(!mapped.contains("Effectifs"));
        assert!(!mapped.contains("Nbr_OAD"));
        assert!(!mapped.contains("Nbr_CTRL_VL"));
        assert!(!mapped.contains("c9_mm"));
        assert_eq!(mapped.get("MP7"), Some(&ExternalValue::Number(3.into())));
        assert_eq!(
            mapped.get("Feu_Autres"),
            Some(&ExternalValue::Number(Number::from_f64(2.5).unwrap()))
        );
    }

    #[test]
    fn test_string_coercion_of_scalars() {
        let crca = record(
            RecordKind::Crca,
            json!({"indicatifs": "B7", "personnel": 6, "armement": false}),
        );
        let mapped = map_record(&crca);

        assert_eq!(mapped.get("Indic_Patrouille"), Some(&text("B7")));
        assert_eq!(mapped.get("Personnel"), Some(&text("6")));
        assert_eq!(mapped.get("Armement"), Some(&text("false")));
    }

    #[test]
    fn test_processed_flag_defaults_to_false() {
        let crfm = record(RecordKind::Crfm, json!({}));
        let mapped = map_record(&crfm);

        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped.get(PROCESSED_COLUMN), Some(&ExternalValue::Bool(false)));
    }

    #[test]
    fn test_processed_flag_kept_when_already_set() {
        let crca = record(RecordKind::Crca, json!({"traite": true, "lieu": "Port"}));
        let mapped = map_record(&crca);

        assert_eq!(mapped.get(PROCESSED_COLUMN), Some(&ExternalValue::Bool(true)));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let crfm = record(
            RecordKind::Crfm,
            json!({"date": "2025-03-01", "secteur": "DELTA", "effectifs": 8, "stupAutres": "résine"}),
        );

        let first = map_record(&crfm);
        let second = map_record(&crfm);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_columns_follow_field_table_order() {
        let crfm = record(
            RecordKind::Crfm,
            json!({"commentairePam": "ok", "date": "2025-03-01", "effectifs": 8}),
        );
        let body = serde_json::to_string(&map_record(&crfm)).unwrap();

        assert_eq!(
            body,
            r#"{"Date":"2025-03-01","Effectifs":8,"Commentaire":"ok","Traite":false}"#
        );
    }

    #[test]
    fn test_map_with_other_kind_reads_shared_keys_only() {
        let crca = record(RecordKind::Crca, json!({"secteur": "BRAVO", "lieu": "Port"}));
        let mapped = map(&crca, RecordKind::Crfm);

        assert_eq!(mapped.get("Secteur"), Some(&text("BRAVO")));
        assert_eq!(mapped.data_len(), 1);
    }

    #[test]
    fn test_vocabulary_warnings() {
        let crfm = record(
            RecordKind::Crfm,
            json!({"secteur": "ZULU", "mission": "OAD", "horaire": ""}),
        );
        let warnings = vocabulary_warnings(&crfm);

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Secteur: 'ZULU'"));
    }
}
