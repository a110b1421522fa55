//! Signal catalog: definitions, mappings and the ordered table.
//!
//! A signal mapping projects one named logical value out of a raw CAN frame
//! through a condition and a calculation expression. Tables are ordered;
//! declaration order decides which mapping wins when several match one frame
//! and in which order events are emitted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A decoded signal value.
///
/// Calculations are real-valued; multi-part formatted calculations produce
/// text. Integral numbers display without a fractional part, so `835.0`
/// renders as `835` while `10.3515625` keeps its digits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Declarative description of one signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub name: String,

    /// Display unit, e.g. `"RPM"`. Not interpreted.
    #[serde(default)]
    pub unit: String,

    /// Boolean expression gating the calculation, evaluated per frame with
    /// `${i}` byte substitution.
    pub condition: String,

    /// Value expression, or several expressions joined by `;` for formatted
    /// multi-part output.
    pub calculation: String,

    /// Interleaved between stringified calculation parts; entry `k` follows
    /// part `k`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub format_separators: Vec<String>,

    /// Most recent decoded result, written by the decoder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// One table row: a signal definition bound to an arbitration ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMapping {
    pub arbitration_id: u32,

    #[serde(flatten)]
    pub definition: SignalDefinition,

    /// Whether a successful decode is fanned out to subscribers.
    #[serde(default)]
    pub trigger_event: bool,

    /// Payload bytes (`data[..dlc]`) of the frame that produced the current
    /// value.
    #[serde(skip)]
    pub original_data: Vec<u8>,
}

/// Ordered collection of signal mappings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalTable {
    mappings: Vec<SignalMapping>,
}

impl SignalTable {
    pub fn new(mappings: Vec<SignalMapping>) -> Self {
        Self { mappings }
    }

    /// Load a table from its JSON text form: an ordered array of mapping
    /// objects. The separator/part-count invariant is checked on load.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let table: SignalTable = serde_json::from_slice(bytes)
            .map_err(|err| Error::FrameMalformed(format!("signal table: {err}")))?;
        table.validate()?;
        Ok(table)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| Error::FrameMalformed(format!("signal table: {err}")))
    }

    /// Check that every mapping with separators has exactly one separator
    /// less than it has `;`-joined calculation parts.
    pub fn validate(&self) -> Result<()> {
        for mapping in &self.mappings {
            let def = &mapping.definition;
            if def.format_separators.is_empty() {
                continue;
            }
            let parts = def.calculation.split(';').count();
            if def.format_separators.len() + 1 != parts {
                return Err(Error::ExpressionParse(format!(
                    "signal `{}`: {} separators for {} calculation parts",
                    def.name,
                    def.format_separators.len(),
                    parts
                )));
            }
        }
        Ok(())
    }

    /// First mapping carrying `name`, in declaration order.
    pub fn get(&self, name: &str) -> Option<&SignalMapping> {
        self.mappings.iter().find(|m| m.definition.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalMapping> {
        self.mappings.iter()
    }

    /// Mappings bound to one arbitration ID, in declaration order.
    pub fn by_arbitration_id(&self, id: u32) -> impl Iterator<Item = &SignalMapping> {
        self.mappings.iter().filter(move |m| m.arbitration_id == id)
    }

    pub fn mappings(&self) -> &[SignalMapping] {
        &self.mappings
    }

    pub(crate) fn mappings_mut(&mut self) -> &mut [SignalMapping] {
        &mut self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Value-copy snapshot of one decoded mapping, fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalEvent {
    pub arbitration_id: u32,
    pub name: String,
    pub unit: String,
    pub value: Value,
    pub original_data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(name: &str, calculation: &str, separators: &[&str]) -> SignalMapping {
        SignalMapping {
            arbitration_id: 0x100,
            definition: SignalDefinition {
                name: name.into(),
                unit: String::new(),
                condition: "1 == 1".into(),
                calculation: calculation.into(),
                format_separators: separators.iter().map(|s| s.to_string()).collect(),
                value: None,
            },
            trigger_event: true,
            original_data: Vec::new(),
        }
    }

    #[test]
    fn integral_numbers_display_without_fraction() {
        assert_eq!(Value::Number(835.0).to_string(), "835");
        assert_eq!(Value::Number(10.3515625).to_string(), "10.3515625");
        assert_eq!(Value::Number(-100.0).to_string(), "-100");
    }

    #[test]
    fn lookup_returns_first_declaration() {
        let table = SignalTable::new(vec![
            mapping("AC Temperature", "1", &[]),
            mapping("AC Temperature", "2", &[]),
        ]);
        assert_eq!(table.get("AC Temperature").unwrap().definition.calculation, "1");
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn grouping_by_arbitration_id_keeps_declaration_order() {
        let mut second = mapping("Turn Lights", "${4}", &[]);
        second.arbitration_id = 0x175;
        let mut first = mapping("Weel Remote Key", "${5}", &[]);
        first.arbitration_id = 0x175;

        let table = SignalTable::new(vec![first, mapping("Other", "1", &[]), second]);

        let names: Vec<&str> = table
            .by_arbitration_id(0x175)
            .map(|m| m.definition.name.as_str())
            .collect();
        assert_eq!(names, ["Weel Remote Key", "Turn Lights"]);
        assert_eq!(table.by_arbitration_id(0x999).count(), 0);
    }

    #[test]
    fn validate_rejects_separator_mismatch() {
        let table = SignalTable::new(vec![mapping("Date", "${0};${1};${2}", &["-"])]);
        assert!(matches!(table.validate(), Err(Error::ExpressionParse(_))));
    }

    #[test]
    fn validate_accepts_matching_separators() {
        let table = SignalTable::new(vec![mapping("Date", "${0};${1};${2}", &["-", "-"])]);
        table.validate().unwrap();
    }

    #[test]
    fn json_round_trip_preserves_order_and_shape() {
        let json = r#"[
            {
                "arbitration_id": 264,
                "name": "Engine RPM",
                "unit": "RPM",
                "condition": "1 == 1",
                "calculation": "(${1}*256 + ${2})/4",
                "trigger_event": true
            },
            {
                "arbitration_id": 384,
                "name": "Date",
                "condition": "1 == 1",
                "calculation": "${2};${3}",
                "format_separators": ["-"]
            }
        ]"#;

        let table = SignalTable::from_json(json.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.mappings()[0].arbitration_id, 0x108);
        assert_eq!(table.mappings()[0].definition.name, "Engine RPM");
        assert!(table.mappings()[0].trigger_event);
        assert!(!table.mappings()[1].trigger_event);

        let back = table.to_json().unwrap();
        let again = SignalTable::from_json(back.as_bytes()).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(
            again.mappings()[1].definition.format_separators,
            vec!["-".to_string()]
        );
    }
}
