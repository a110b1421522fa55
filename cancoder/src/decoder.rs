//! Decoder and encoder core.
//!
//! The decoder dispatches each incoming frame to the table mappings bound to
//! its arbitration ID, in declaration order: the condition gates the
//! calculation, a successful decode updates the mapping value and, for
//! event-triggering mappings, fans a snapshot out to every subscriber. The
//! decoder also keeps the last-seen frame per arbitration ID for diagnostics
//! and the encoder round trip.
//!
//! One decoder instance is driven from one task at a time; callers serialize
//! `push`. Subscriptions may be opened concurrently at any point.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::expr;
use crate::fanout::FanOut;
use crate::frame::Frame;
use crate::signal::{SignalEvent, SignalMapping, SignalTable, Value};
use crate::tracing::prelude::*;

/// Outcome of pushing one frame through the decoder.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Snapshots of every mapping that produced a value, in declaration
    /// order.
    pub events: Vec<SignalEvent>,

    /// First per-mapping evaluator error. Later mappings still ran.
    pub first_error: Option<Error>,
}

pub struct Decoder {
    table: SignalTable,
    frame_buffer: HashMap<u32, Frame>,
    latest: HashMap<String, Value>,
    events: FanOut<SignalEvent>,
}

impl Decoder {
    pub fn new(table: SignalTable) -> Self {
        Self {
            table,
            frame_buffer: HashMap::new(),
            latest: HashMap::new(),
            events: FanOut::new("decoder"),
        }
    }

    /// Feed one frame through the table.
    ///
    /// Evaluator failures are soft: the failing mapping is skipped, the rest
    /// of the table still runs, and the first error is reported alongside the
    /// successful decodes.
    pub fn push(&mut self, frame: &Frame) -> Decoded {
        self.frame_buffer.insert(frame.arbitration_id(), *frame);

        let mut decoded = Decoded::default();

        for mapping in self.table.mappings_mut() {
            if mapping.arbitration_id != frame.arbitration_id() {
                continue;
            }
            match decode_mapping(mapping, frame) {
                Ok(Some(value)) => {
                    self.latest
                        .insert(mapping.definition.name.clone(), value.clone());
                    let event = SignalEvent {
                        arbitration_id: mapping.arbitration_id,
                        name: mapping.definition.name.clone(),
                        unit: mapping.definition.unit.clone(),
                        value,
                        original_data: mapping.original_data.clone(),
                    };
                    if mapping.trigger_event {
                        self.events.emit(&event);
                    }
                    decoded.events.push(event);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        signal = %mapping.definition.name,
                        error = %err,
                        "mapping failed to decode"
                    );
                    if decoded.first_error.is_none() {
                        decoded.first_error = Some(err);
                    }
                }
            }
        }

        decoded
    }

    /// Latest decoded value for `name`, across all mappings carrying it.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.latest.get(name).cloned()
    }

    /// Last frame seen for an arbitration ID.
    pub fn last_frame(&self, arbitration_id: u32) -> Option<&Frame> {
        self.frame_buffer.get(&arbitration_id)
    }

    /// Open a bounded subscription for decoded events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<SignalEvent> {
        self.events.subscribe()
    }

    /// Cloneable handle to the subscriber set, for opening subscriptions
    /// after the decoder has moved into its driving task.
    pub fn subscriptions(&self) -> FanOut<SignalEvent> {
        self.events.clone()
    }

    pub fn table(&self) -> &SignalTable {
        &self.table
    }

    /// Invert a byte-literal calculation into a frame.
    ///
    /// Each `;`-separated element must be exactly one two-hex-digit byte;
    /// computed calculations are one-way and cannot be encoded.
    pub fn encode(mapping: &SignalMapping) -> Result<Frame> {
        let calculation = &mapping.definition.calculation;
        let mut payload = Vec::new();

        for element in calculation.split(';') {
            let bytes = hex::decode(element).map_err(|err| {
                Error::EncodeShape(format!("`{element}` in `{calculation}`: {err}"))
            })?;
            if bytes.len() != 1 {
                return Err(Error::EncodeShape(format!(
                    "`{element}` in `{calculation}` is not a single byte"
                )));
            }
            payload.push(bytes[0]);
        }

        Frame::new(mapping.arbitration_id, &payload)
            .map_err(|err| Error::EncodeShape(err.to_string()))
    }
}

fn decode_mapping(mapping: &mut SignalMapping, frame: &Frame) -> Result<Option<Value>> {
    let def = &mapping.definition;

    let condition = expr::substitute(&def.condition, frame)?;
    let matched = match expr::evaluate(&condition)? {
        Value::Bool(b) => b,
        other => {
            return Err(Error::ExpressionEval(format!(
                "condition `{}` yielded {other}, expected a boolean",
                def.condition
            )));
        }
    };
    if !matched {
        return Ok(None);
    }

    mapping.original_data = frame.payload().to_vec();

    let calculation = expr::substitute(&def.calculation, frame)?;
    let parts: Vec<&str> = calculation.split(';').collect();

    let value = if parts.len() == 1 {
        expr::evaluate(parts[0])?
    } else {
        let mut output = String::new();
        for (index, part) in parts.iter().enumerate() {
            output.push_str(&expr::evaluate(part)?.to_string());
            if let Some(separator) = mapping.definition.format_separators.get(index) {
                output.push_str(separator);
            }
        }
        Value::Text(output)
    };

    mapping.definition.value = Some(value.clone());
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalDefinition;

    fn mapping(
        arbitration_id: u32,
        name: &str,
        condition: &str,
        calculation: &str,
    ) -> SignalMapping {
        SignalMapping {
            arbitration_id,
            definition: SignalDefinition {
                name: name.into(),
                unit: String::new(),
                condition: condition.into(),
                calculation: calculation.into(),
                format_separators: Vec::new(),
                value: None,
            },
            trigger_event: true,
            original_data: Vec::new(),
        }
    }

    fn mapping_fmt(
        arbitration_id: u32,
        name: &str,
        calculation: &str,
        separators: &[&str],
    ) -> SignalMapping {
        let mut m = mapping(arbitration_id, name, "1 == 1", calculation);
        m.definition.format_separators = separators.iter().map(|s| s.to_string()).collect();
        m
    }

    #[test]
    fn engine_rpm_and_speed_decode() {
        let mut decoder = Decoder::new(SignalTable::new(vec![
            mapping(0x108, "Engine RPM", "1 == 1", "(${1}*256 + ${2})/4"),
            mapping(0x108, "Speed", "1 == 1", "(${4}*256 + ${5}) / 128"),
        ]));

        let frame = Frame::new(0x108, &[0x13, 0x0c, 0xf3, 0x00, 0x04, 0xe5, 0x00, 0x00]).unwrap();
        let decoded = decoder.push(&frame);

        assert!(decoded.first_error.is_none());
        assert_eq!(decoded.events.len(), 2);
        assert_eq!(decoder.get("Engine RPM"), Some(Value::Number(828.75)));
        assert_eq!(decoder.get("Speed"), Some(Value::Number(9.7890625)));
    }

    #[test]
    fn condition_gates_both_mappings_on_one_frame() {
        let mut decoder = Decoder::new(SignalTable::new(vec![
            mapping(
                0x175,
                "Weel Remote Key",
                "${2} == 0x00 && ${3} == 0x00",
                "${5}",
            ),
            mapping(0x175, "Turn Lights", "${2} == 0x00 && ${3} == 0x00", "${4}"),
        ]));

        let frame = Frame::new(0x175, &[0x00, 0x00, 0x00, 0x00, 0x03, 0x42, 0x00, 0x00]).unwrap();
        let decoded = decoder.push(&frame);

        assert_eq!(decoded.events.len(), 2);
        // Declaration order is preserved in the emitted events.
        assert_eq!(decoded.events[0].name, "Weel Remote Key");
        assert_eq!(decoded.events[1].name, "Turn Lights");
        assert_eq!(decoder.get("Weel Remote Key"), Some(Value::Number(66.0)));
        assert_eq!(decoder.get("Turn Lights"), Some(Value::Number(3.0)));
    }

    #[test]
    fn non_matching_condition_leaves_value_untouched() {
        let mut decoder = Decoder::new(SignalTable::new(vec![mapping(
            0x230,
            "Door State",
            "${0} == 0 && ${1} == 0",
            "${2}",
        )]));

        let open = Frame::new(0x230, &[0x00, 0x00, 0x40]).unwrap();
        decoder.push(&open);
        assert_eq!(decoder.get("Door State"), Some(Value::Number(64.0)));

        // ${0} != 0: the mapping must not update.
        let other = Frame::new(0x230, &[0x01, 0x00, 0x00]).unwrap();
        let decoded = decoder.push(&other);
        assert!(decoded.events.is_empty());
        assert!(decoded.first_error.is_none());
        assert_eq!(decoder.get("Door State"), Some(Value::Number(64.0)));
    }

    #[test]
    fn multi_part_calculation_joins_with_separators() {
        let mut decoder = Decoder::new(SignalTable::new(vec![mapping_fmt(
            0x180,
            "Date",
            "${2};${3};${4}>>3;((${4}&0x07)<<2)+(${5}>>6);${5}&0x3f;${6}",
            &["-", "-", "T", ":", ":"],
        )]));

        let frame = Frame::new(0x180, &[0x46, 0x01, 0x17, 0x0a, 0x5d, 0x12, 0x27, 0xff]).unwrap();
        let decoded = decoder.push(&frame);

        assert!(decoded.first_error.is_none());
        assert_eq!(
            decoder.get("Date"),
            Some(Value::Text("23-10-11T20:18:39".into()))
        );
    }

    #[test]
    fn same_name_mappings_last_winner_wins() {
        // AC temperature style: three rows share a name under mutually
        // exclusive conditions, plus an always-true fallback later in the
        // table that must win the race within one frame.
        let mut decoder = Decoder::new(SignalTable::new(vec![
            mapping(0x6c8, "AC Temperature", "${1} == 0x48", "100"),
            mapping(0x6c8, "AC Temperature", "${1} == 0x4c", "-100"),
            mapping(0x6c8, "AC Temperature", "${1} == 0x4c", "-50"),
        ]));

        let frame = Frame::new(0x6c8, &[0x22, 0x4c]).unwrap();
        let decoded = decoder.push(&frame);

        assert_eq!(decoded.events.len(), 2);
        assert_eq!(decoder.get("AC Temperature"), Some(Value::Number(-50.0)));
    }

    #[test]
    fn original_data_matches_frame_payload() {
        let mut decoder = Decoder::new(SignalTable::new(vec![mapping(
            0x500,
            "Battery Voltage",
            "1 == 1",
            "${1} / 8",
        )]));

        let frame = Frame::new(0x500, &[0x00, 0x73, 0x00]).unwrap();
        let decoded = decoder.push(&frame);
        assert_eq!(decoded.events[0].original_data, vec![0x00, 0x73, 0x00]);
    }

    #[test]
    fn evaluator_error_is_soft_and_first_is_surfaced() {
        let mut decoder = Decoder::new(SignalTable::new(vec![
            mapping(0x100, "Broken A", "1 == 1", "${9}"),
            mapping(0x100, "Broken B", "1 ==", "1"),
            mapping(0x100, "Working", "1 == 1", "${0}"),
        ]));

        let frame = Frame::new(0x100, &[0x2a]).unwrap();
        let decoded = decoder.push(&frame);

        // The good mapping still decoded.
        assert_eq!(decoded.events.len(), 1);
        assert_eq!(decoder.get("Working"), Some(Value::Number(42.0)));
        // The first failure is the out-of-range byte reference.
        assert!(matches!(
            decoded.first_error,
            Some(Error::ExpressionParse(_))
        ));
    }

    #[test]
    fn frame_buffer_keeps_last_frame_per_id() {
        let mut decoder = Decoder::new(SignalTable::new(vec![]));

        decoder.push(&Frame::new(0x108, &[1]).unwrap());
        decoder.push(&Frame::new(0x108, &[2]).unwrap());
        decoder.push(&Frame::new(0x500, &[3]).unwrap());

        assert_eq!(decoder.last_frame(0x108).unwrap().payload(), &[2]);
        assert_eq!(decoder.last_frame(0x500).unwrap().payload(), &[3]);
        assert!(decoder.last_frame(0x999).is_none());
    }

    #[tokio::test]
    async fn trigger_event_mappings_reach_subscribers() {
        let mut decoder = Decoder::new(SignalTable::new(vec![
            mapping(0x108, "Engine RPM", "1 == 1", "(${1}*256 + ${2})/4"),
            {
                let mut silent = mapping(0x108, "Quiet", "1 == 1", "${0}");
                silent.trigger_event = false;
                silent
            },
        ]));

        let mut rx = decoder.subscribe();
        let frame = Frame::new(0x108, &[0x13, 0x0c, 0xf3]).unwrap();
        decoder.push(&frame);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "Engine RPM");
        assert_eq!(event.value, Value::Number(828.75));
        assert_eq!(event.arbitration_id, 0x108);
        // The non-triggering mapping produced no event.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn encode_inverts_byte_literal_calculations() {
        let mapping = mapping(0x208, "Door Open", "1 == 1", "02;40;00");
        let frame = Decoder::encode(&mapping).unwrap();

        assert_eq!(frame.arbitration_id(), 0x208);
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.payload(), &[0x02, 0x40, 0x00]);
    }

    #[test]
    fn encode_rejects_computed_calculations() {
        let computed = mapping(0x108, "Engine RPM", "1 == 1", "(${1}*256 + ${2})/4");
        assert!(matches!(
            Decoder::encode(&computed),
            Err(Error::EncodeShape(_))
        ));

        let wide = mapping(0x108, "Wide", "1 == 1", "0102");
        assert!(matches!(Decoder::encode(&wide), Err(Error::EncodeShape(_))));
    }
}
