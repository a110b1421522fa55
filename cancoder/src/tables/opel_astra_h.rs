//! Opel Astra H OPC (2006) decoding profile.
//!
//! Two buses are mapped: the single-wire GMLan at 33.3k and the mid-speed
//! Entertainment CAN at 95k. Mappings were reverse-engineered on the bench;
//! a few arbitration IDs are still guesses and marked as such.

use crate::signal::{SignalDefinition, SignalMapping, SignalTable};

use super::{DeviceTable, Profile};

// Signal names shared across both buses.
pub const AC_TEMPERATURE: &str = "AC Temperature";
pub const AC_MODE: &str = "AC Mode";
pub const AC_FAN_SPEED: &str = "AC Fan Speed";
pub const BATTERY_VOLTAGE: &str = "Battery Voltage";
pub const BUS_WAKEUP: &str = "CAN-Bus Wakeup";
pub const BREAK_STATE: &str = "Break State";
pub const DATE_TIME: &str = "Date";
pub const ENGINE_SPEED_RPM: &str = "Engine RPM";
pub const FULL_INJECTION: &str = "Full Injection";
pub const FULL_INJECTION_MID: &str = "Full Injection Mid";
pub const FULL_LEVEL: &str = "Full Level";
pub const FULL_LEVEL_MID: &str = "Full Level Mid";
pub const LED_BRIGHTNESS: &str = "Led Brightness";
pub const MILAGE: &str = "Milage";
pub const OUTDOOR_TEMPERATURE: &str = "Output Temperature";
pub const VEHICLE_SPEED: &str = "Speed";
pub const VEHICLE_SPEED_MID: &str = "Speed Mid";
pub const WEEL_KEY: &str = "Weel Remote Key";
pub const DISPLAY_R1C1: &str = "Display Row 1 Column 1";
pub const DISPLAY_R1C2: &str = "Display Row 1 Column 2";
pub const DISPLAY_R1C3: &str = "Display Row 1 Column 3";
pub const DISPLAY_R1C4: &str = "Display Row 1 Column 4";
pub const LIGHT_SWITCH: &str = "Light Switch";
pub const LIGHT_LEVELER: &str = "Light Leveler";
pub const LIGHT_BACK: &str = "Light Back";
pub const DOOR_STATE: &str = "Door State";
pub const ENGINE_RUNNING_STATE: &str = "Engine State";
pub const TURN_LIGHTS: &str = "Turn Lights";
pub const COOLANT_TEMPERATURE: &str = "Coolant Temperature";
pub const TPMS: &str = "Tire Pressure Monitoring System";
pub const CRUSE_CONTROL: &str = "Cruse Control";
pub const SYSTEM_TIME: &str = "System Time";
pub const DISPLAY_TEMPERATURE: &str = "Display Temperature";
pub const SENSOR_TEMPERATURE: &str = "Outdoor Sensor Temperature";
pub const LEFT_TRAVEL_RANGE: &str = "Range";
pub const RANGE_WARNING: &str = "Range Warning";
pub const TRAVELED_DISTANCE: &str = "Traveled Distance";
pub const DISTANCE: &str = "Distance";

// GMLan (single-wire, 33.3k) arbitration IDs.
pub const GMLAN_BUS_WAKEUP: u32 = 0x100;
pub const GMLAN_ENGINE_SPEED_RPM: u32 = 0x108;
pub const GMLAN_TRAVELED_DISTANCE: u32 = 0x110; // not sure
pub const GMLAN_FULL_INJECTION: u32 = 0x130; // counter-like, ml/s?
pub const GMLAN_COOLANT: u32 = 0x145;
pub const GMLAN_CRUSE_CONTROL: u32 = 0x145;
pub const GMLAN_WEEL_REMOTE: u32 = 0x175;
pub const GMLAN_MILAGE: u32 = 0x190;
pub const GMLAN_DOOR_STATE: u32 = 0x230;
pub const GMLAN_LED_BRIGHTNESS: u32 = 0x235;
pub const GMLAN_LIGHT_SWITCH: u32 = 0x305;
pub const GMLAN_LIGHT_LEVELER: u32 = 0x350;
pub const GMLAN_CLUTCH_BREAK: u32 = 0x360;
pub const GMLAN_LIGHT_BACK: u32 = 0x370;
pub const GMLAN_FULL_LEVEL: u32 = 0x375;
pub const GMLAN_SYS_TIME: u32 = 0x440;
pub const GMLAN_OUTPUT_TEMPERATURE: u32 = 0x445;
pub const GMLAN_BATTERY_VOLTAGE: u32 = 0x500;
pub const GMLAN_TPMS: u32 = 0x530; // unknown

// Entertainment CAN (mid-speed, 95k) arbitration IDs.
pub const ENT_DATE: u32 = 0x180;
pub const ENT_DISTANCE: u32 = 0x188;
pub const ENT_ENGINE_MOTION: u32 = 0x4e8;
pub const ENT_ENGINE_TEMPERATURE: u32 = 0x4ec;
pub const ENT_FULL_INJECTION: u32 = 0x4ed;
pub const ENT_RANGE: u32 = 0x4ee;
pub const ENT_DISPLAY_TEMPERATURE: u32 = 0x682;
pub const ENT_SENSOR_TEMPERATURE: u32 = 0x683;
pub const ENT_FULL_LEVEL: u32 = 0x68c;
pub const ENT_DISPLAY_DATA: u32 = 0x6c1;
pub const ENT_AIR_CONDITIONER: u32 = 0x6c8;

fn map(
    arbitration_id: u32,
    name: &str,
    unit: &str,
    condition: &str,
    calculation: &str,
) -> SignalMapping {
    SignalMapping {
        arbitration_id,
        definition: SignalDefinition {
            name: name.into(),
            unit: unit.into(),
            condition: condition.into(),
            calculation: calculation.into(),
            format_separators: Vec::new(),
            value: None,
        },
        trigger_event: true,
        original_data: Vec::new(),
    }
}

fn map_fmt(
    arbitration_id: u32,
    name: &str,
    unit: &str,
    condition: &str,
    calculation: &str,
    separators: &[&str],
) -> SignalMapping {
    let mut mapping = map(arbitration_id, name, unit, condition, calculation);
    mapping.definition.format_separators = separators.iter().map(|s| s.to_string()).collect();
    mapping
}

/// The GMLan table, in bench-tested declaration order.
pub fn gm_lan() -> SignalTable {
    SignalTable::new(vec![
        map(
            GMLAN_WEEL_REMOTE,
            WEEL_KEY,
            "Key Action",
            "${2} == 0x00 && ${3} == 0x00",
            "${5}",
        ),
        map(
            GMLAN_WEEL_REMOTE,
            TURN_LIGHTS,
            "Turn Lights",
            "${2} == 0x00 && ${3} == 0x00",
            "${4}",
        ),
        map(GMLAN_BUS_WAKEUP, BUS_WAKEUP, "Bus Wakeup", "1 == 1", "1"),
        // Engine running would be ${0} == 0x13; decode unconditionally.
        map(
            GMLAN_ENGINE_SPEED_RPM,
            ENGINE_SPEED_RPM,
            "RPM",
            "1 == 1",
            "(${1}*256 + ${2})/4",
        ),
        map(
            GMLAN_ENGINE_SPEED_RPM,
            VEHICLE_SPEED,
            "km/h",
            "1 == 1",
            "(${4}*256 + ${5}) / 128",
        ),
        map(GMLAN_ENGINE_SPEED_RPM, ENGINE_RUNNING_STATE, "", "1 == 1", "${0}"),
        map(
            GMLAN_MILAGE,
            MILAGE,
            "km",
            "1 == 1",
            "(${2}*65536 + ${3}*256 +${4}) / 64",
        ),
        map(
            GMLAN_TRAVELED_DISTANCE,
            TRAVELED_DISTANCE,
            "m",
            "1 == 1",
            "(${1} * 256 + ${2}) * 0.015748",
        ),
        map(
            GMLAN_CLUTCH_BREAK,
            BREAK_STATE,
            "",
            "${0} == 0x00 && ${1} == 0x00",
            "${2}",
        ),
        map(GMLAN_BATTERY_VOLTAGE, BATTERY_VOLTAGE, "V", "1 == 1", "${1} / 8"),
        map(GMLAN_LED_BRIGHTNESS, LED_BRIGHTNESS, "", "${0} == 0x00", "${1}"),
        // 256 / 2.56 -> 100%, tank is 52 l.
        map(GMLAN_FULL_LEVEL, FULL_LEVEL, "l", "${0} == 0x00", "${1}/2+10"),
        map(
            GMLAN_FULL_INJECTION,
            FULL_INJECTION,
            "x1",
            "${3} == 0x00",
            "(${1} * 256 + ${2})",
        ),
        map(
            GMLAN_LIGHT_SWITCH,
            LIGHT_SWITCH,
            "",
            "${0} == 0x00 && ${1} == 0x00",
            "${2}",
        ),
        map(GMLAN_LIGHT_LEVELER, LIGHT_LEVELER, "", "1 == 1", "${0}"),
        map(GMLAN_LIGHT_BACK, LIGHT_BACK, "", "${0} == 0", "${1}"),
        map(
            GMLAN_DOOR_STATE,
            DOOR_STATE,
            "",
            "${0} == 0 && ${1} == 0",
            "${2}",
        ),
        map(
            GMLAN_COOLANT,
            COOLANT_TEMPERATURE,
            "°C",
            "${5} == 0x04 && ${6} == 0",
            "${3} - 40",
        ),
        map(
            GMLAN_OUTPUT_TEMPERATURE,
            OUTDOOR_TEMPERATURE,
            "°C",
            "${0} == 0x00",
            "${1} / 2 - 40",
        ),
        map(
            GMLAN_TPMS,
            TPMS,
            "bar",
            "1 == 1",
            "${2}/25;${3}/25;${4}/25;${5}/25",
        ),
        map(GMLAN_CRUSE_CONTROL, CRUSE_CONTROL, "", "1 == 1", "${5}"),
        map(GMLAN_SYS_TIME, SYSTEM_TIME, "", "1 == 1", "${0};${1};${2}"),
    ])
}

/// The Entertainment CAN table.
pub fn entertainment() -> SignalTable {
    let mut full_level_mid = map(
        ENT_FULL_LEVEL,
        FULL_LEVEL_MID,
        "l",
        "${0} == 0x46",
        "94-(${2}/2)",
    );
    full_level_mid.trigger_event = false;

    SignalTable::new(vec![
        map(
            ENT_DISPLAY_TEMPERATURE,
            DISPLAY_TEMPERATURE,
            "°C",
            "${0} == 0x46 && ${1} == 0x01",
            "${2} / 2 - 40",
        ),
        map(
            ENT_SENSOR_TEMPERATURE,
            SENSOR_TEMPERATURE,
            "°C",
            "${0} == 0x46 && ${1} == 0x01",
            "${2} / 2 - 40",
        ),
        map_fmt(
            ENT_DATE,
            DATE_TIME,
            "",
            "1 == 1",
            "${2};${3};${4}>>3;((${4}&0x07)<<2)+(${5}>>6);${5}&0x3f;${6}",
            &["-", "-", "T", ":", ":"],
        ),
        // Top bit of ${5} flags the Hi/Low stops; those arrive as the two
        // dedicated rows below, last decode wins within a frame.
        map(
            ENT_AIR_CONDITIONER,
            AC_TEMPERATURE,
            "°C",
            "${0} == 0x22 && ${1} == 0x03",
            "(((${3} & 0x03) * 10) + (${5} & 0x3f))-48",
        ),
        map(
            ENT_AIR_CONDITIONER,
            AC_TEMPERATURE,
            "°C",
            "${0} == 0x22 && ${1} == 0x48",
            "100",
        ),
        map(
            ENT_AIR_CONDITIONER,
            AC_TEMPERATURE,
            "°C",
            "${0} == 0x22 && ${1} == 0x4c",
            "-100",
        ),
        map(
            ENT_AIR_CONDITIONER,
            AC_FAN_SPEED,
            "",
            "${0} == 0x22 && ${1} == 0x50",
            "${3} & 0x0f",
        ),
        map(
            ENT_AIR_CONDITIONER,
            AC_MODE,
            "",
            "${0} == 0x21 && ${1} == 0xe0",
            "${2}",
        ),
        full_level_mid,
        map(
            ENT_DISTANCE,
            DISTANCE,
            "cm",
            "${0} == 0x46",
            "(${2} * 256 + ${3}) * 1.5748",
        ),
        map(
            ENT_ENGINE_MOTION,
            ENGINE_SPEED_RPM,
            "rpm",
            "${0} == 0x46",
            "(${2} * 256 + ${3}) / 4",
        ),
        map(
            ENT_ENGINE_MOTION,
            VEHICLE_SPEED_MID,
            "km/h",
            "${0} == 0x46",
            "${4} * 2",
        ),
        map(
            ENT_ENGINE_TEMPERATURE,
            COOLANT_TEMPERATURE,
            "°C",
            "${0} == 0x46",
            "${2} - 40",
        ),
        // Up-counting; highly probable litres since engine start.
        map(
            ENT_FULL_INJECTION,
            FULL_INJECTION_MID,
            "x1",
            "${0} == 0x46",
            "${2} * 256 + ${3}",
        ),
        map(
            ENT_RANGE,
            LEFT_TRAVEL_RANGE,
            "km",
            "${0} == 0x46",
            "(${2} * 256 + ${3}) * 0.5",
        ),
        map(ENT_RANGE, RANGE_WARNING, "", "${0} == 0x46", "${1}"),
        map_fmt(
            ENT_DISPLAY_DATA,
            DISPLAY_R1C1,
            "",
            "${0} == 0x23",
            "${2};${4};${6}",
            &[",", ","],
        ),
        map_fmt(
            ENT_DISPLAY_DATA,
            DISPLAY_R1C2,
            "",
            "${0} == 0x24",
            "${1};${3};${5};${7}",
            &[",", ",", ","],
        ),
        map_fmt(
            ENT_DISPLAY_DATA,
            DISPLAY_R1C3,
            "",
            "${0} == 0x25",
            "${2};${4};${6}",
            &[",", ","],
        ),
        map_fmt(
            ENT_DISPLAY_DATA,
            DISPLAY_R1C4,
            "",
            "${0} == 0x26",
            "${1};${3};${5};${7}",
            &[",", ",", ","],
        ),
    ])
}

pub fn profile() -> Profile {
    Profile {
        name: "Opel_Astra_H_OPC_2006",
        buses: vec![
            DeviceTable {
                device: "can1",
                table: gm_lan(),
            },
            DeviceTable {
                device: "can0",
                table: entertainment(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;
    use crate::frame::Frame;
    use crate::signal::Value;

    #[test]
    fn gm_lan_speeds_frame() {
        let mut decoder = Decoder::new(gm_lan());

        let frame = Frame::new(
            GMLAN_ENGINE_SPEED_RPM,
            &[0x13, 0x0c, 0xf3, 0x00, 0x04, 0xe5, 0x00, 0x00],
        )
        .unwrap();
        let decoded = decoder.push(&frame);
        assert!(decoded.first_error.is_none());

        assert_eq!(decoder.get(ENGINE_SPEED_RPM), Some(Value::Number(828.75)));
        assert_eq!(decoder.get(VEHICLE_SPEED), Some(Value::Number(9.7890625)));
        assert_eq!(decoder.get(ENGINE_RUNNING_STATE), Some(Value::Number(0x13 as f64)));
    }

    #[test]
    fn gm_lan_wheel_key_and_turn_lights() {
        let mut decoder = Decoder::new(gm_lan());

        let frame = Frame::new(
            GMLAN_WEEL_REMOTE,
            &[0x00, 0x00, 0x00, 0x00, 0x03, 0x42, 0x00, 0x00],
        )
        .unwrap();
        let decoded = decoder.push(&frame);

        assert_eq!(decoded.events.len(), 2);
        assert_eq!(decoder.get(WEEL_KEY), Some(Value::Number(0x42 as f64)));
        assert_eq!(decoder.get(TURN_LIGHTS), Some(Value::Number(3.0)));
    }

    #[test]
    fn entertainment_date_frame() {
        let mut decoder = Decoder::new(entertainment());

        let frame = Frame::new(ENT_DATE, &[0x46, 0x01, 0x17, 0x0a, 0x5d, 0x12, 0x27, 0xff]).unwrap();
        let decoded = decoder.push(&frame);
        assert!(decoded.first_error.is_none());

        assert_eq!(
            decoder.get(DATE_TIME),
            Some(Value::Text("23-10-11T20:18:39".into()))
        );
    }

    #[test]
    fn entertainment_ac_temperature_triplet() {
        let mut decoder = Decoder::new(entertainment());

        // Normal reading: 22.5 °C quantized to the knob scale.
        let normal = Frame::new(
            ENT_AIR_CONDITIONER,
            &[0x22, 0x03, 0x00, 0x02, 0x00, 0x32, 0x00, 0x00],
        )
        .unwrap();
        decoder.push(&normal);
        assert_eq!(decoder.get(AC_TEMPERATURE), Some(Value::Number(22.0)));

        // "Hi" stop.
        let hi = Frame::new(ENT_AIR_CONDITIONER, &[0x22, 0x48, 0, 0, 0, 0, 0, 0]).unwrap();
        decoder.push(&hi);
        assert_eq!(decoder.get(AC_TEMPERATURE), Some(Value::Number(100.0)));

        // "Low" stop.
        let low = Frame::new(ENT_AIR_CONDITIONER, &[0x22, 0x4c, 0, 0, 0, 0, 0, 0]).unwrap();
        decoder.push(&low);
        assert_eq!(decoder.get(AC_TEMPERATURE), Some(Value::Number(-100.0)));
    }

    #[test]
    fn entertainment_display_cells_concatenate_codepoints() {
        let mut decoder = Decoder::new(entertainment());

        // Row fragment carrying "No " in UTF-16-ish display cells.
        let frame = Frame::new(
            ENT_DISPLAY_DATA,
            &[0x23, 0x00, 0x4e, 0x00, 0x6f, 0x00, 0x20, 0x00],
        )
        .unwrap();
        decoder.push(&frame);

        assert_eq!(
            decoder.get(DISPLAY_R1C1),
            Some(Value::Text("78,111,32".into()))
        );
    }

    #[test]
    fn full_level_mid_is_not_an_event() {
        let mut decoder = Decoder::new(entertainment());
        let mut events = decoder.subscribe();

        let frame = Frame::new(ENT_FULL_LEVEL, &[0x46, 0x00, 0x20]).unwrap();
        let decoded = decoder.push(&frame);

        // Decoded (94 - 32/2 = 78) but not fanned out.
        assert_eq!(decoded.events.len(), 1);
        assert_eq!(decoder.get(FULL_LEVEL_MID), Some(Value::Number(78.0)));
        assert!(events.try_recv().is_err());
    }
}
