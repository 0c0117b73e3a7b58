use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::Value;
use uuid::Uuid;

use super::blocklist::{self, BlocklistStatus};

/// The Bluetooth base UUID, `00000000-0000-1000-8000-00805f9b34fb`.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expands a 16- or 32-bit assigned number into the Bluetooth base UUID.
#[must_use]
pub fn uuid_from_short(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}

/// Lower-case hyphenated 128-bit form reported to the peer.
#[must_use]
pub fn canonical_uuid_string(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string()
}

/// Resolves peer-supplied GATT identifiers and answers blocklist queries.
pub trait GattResolver: Send + Sync {
    /// Resolves a service identifier (number, UUID string or alias).
    fn service_uuid(&self, id: &Value) -> Option<Uuid>;

    /// Resolves a characteristic identifier (number, UUID string or alias).
    fn characteristic_uuid(&self, id: &Value) -> Option<Uuid>;

    /// Returns the blocklist flags for `uuid`, if it is listed.
    fn blocklist_status(&self, uuid: &Uuid) -> Option<BlocklistStatus>;
}

/// Resolver backed by the Bluetooth SIG assigned numbers and the Web Bluetooth blocklist.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardGattResolver;

impl GattResolver for StandardGattResolver {
    fn service_uuid(&self, id: &Value) -> Option<Uuid> {
        resolve(id, &SERVICE_ALIASES)
    }

    fn characteristic_uuid(&self, id: &Value) -> Option<Uuid> {
        resolve(id, &CHARACTERISTIC_ALIASES)
    }

    fn blocklist_status(&self, uuid: &Uuid) -> Option<BlocklistStatus> {
        blocklist::blocklist_status(uuid)
    }
}

fn resolve(id: &Value, aliases: &HashMap<&'static str, u32>) -> Option<Uuid> {
    match id {
        Value::Number(number) => {
            let short = u32::try_from(number.as_u64()?).ok()?;
            Some(uuid_from_short(short))
        }
        Value::String(text) => {
            if let Some(short) = aliases.get(text.as_str()) {
                return Some(uuid_from_short(*short));
            }
            // Only the full hyphenated form is accepted as a literal UUID.
            if text.len() != 36 {
                return None;
            }
            Uuid::parse_str(text).ok()
        }
        _ => None,
    }
}

static SERVICE_ALIASES: LazyLock<HashMap<&'static str, u32>> = LazyLock::new(|| {
    HashMap::from([
        ("generic_access", 0x1800),
        ("generic_attribute", 0x1801),
        ("immediate_alert", 0x1802),
        ("link_loss", 0x1803),
        ("tx_power", 0x1804),
        ("current_time", 0x1805),
        ("health_thermometer", 0x1809),
        ("device_information", 0x180A),
        ("heart_rate", 0x180D),
        ("battery_service", 0x180F),
        ("blood_pressure", 0x1810),
        ("human_interface_device", 0x1812),
        ("scan_parameters", 0x1813),
        ("running_speed_and_cadence", 0x1814),
        ("automation_io", 0x1815),
        ("cycling_speed_and_cadence", 0x1816),
        ("cycling_power", 0x1818),
        ("location_and_navigation", 0x1819),
        ("environmental_sensing", 0x181A),
        ("body_composition", 0x181B),
        ("user_data", 0x181C),
        ("weight_scale", 0x181D),
        ("bond_management", 0x181E),
        ("continuous_glucose_monitoring", 0x181F),
        ("internet_protocol_support", 0x1820),
        ("indoor_positioning", 0x1821),
        ("pulse_oximeter", 0x1822),
        ("fitness_machine", 0x1826),
    ])
});

static CHARACTERISTIC_ALIASES: LazyLock<HashMap<&'static str, u32>> = LazyLock::new(|| {
    HashMap::from([
        ("gap.device_name", 0x2A00),
        ("gap.appearance", 0x2A01),
        ("gap.peripheral_privacy_flag", 0x2A02),
        ("gap.reconnection_address", 0x2A03),
        ("gap.peripheral_preferred_connection_parameters", 0x2A04),
        ("gatt.service_changed", 0x2A05),
        ("alert_level", 0x2A06),
        ("tx_power_level", 0x2A07),
        ("date_time", 0x2A08),
        ("temperature_measurement", 0x2A1C),
        ("temperature_type", 0x2A1D),
        ("intermediate_temperature", 0x2A1E),
        ("battery_level", 0x2A19),
        ("system_id", 0x2A23),
        ("model_number_string", 0x2A24),
        ("serial_number_string", 0x2A25),
        ("firmware_revision_string", 0x2A26),
        ("hardware_revision_string", 0x2A27),
        ("software_revision_string", 0x2A28),
        ("manufacturer_name_string", 0x2A29),
        ("pnp_id", 0x2A50),
        ("current_time", 0x2A2B),
        ("blood_pressure_measurement", 0x2A35),
        ("heart_rate_measurement", 0x2A37),
        ("body_sensor_location", 0x2A38),
        ("heart_rate_control_point", 0x2A39),
        ("report", 0x2A4D),
        ("report_map", 0x2A4B),
        ("protocol_mode", 0x2A4E),
        ("csc_measurement", 0x2A5B),
        ("rsc_measurement", 0x2A53),
        ("cycling_power_measurement", 0x2A63),
        ("temperature", 0x2A6E),
        ("humidity", 0x2A6F),
        ("pressure", 0x2A6D),
        ("weight_measurement", 0x2A9D),
    ])
});

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(0x180F, "0000180f-0000-1000-8000-00805f9b34fb")]
    #[case(0xFEE9, "0000fee9-0000-1000-8000-00805f9b34fb")]
    #[case(0x1234_5678, "12345678-0000-1000-8000-00805f9b34fb")]
    fn short_uuids_expand_into_base_template(#[case] short: u32, #[case] expected: &str) {
        assert_eq!(expected, canonical_uuid_string(&uuid_from_short(short)));
    }

    #[rstest]
    #[case(json!(0x180F))]
    #[case(json!("battery_service"))]
    #[case(json!("0000180F-0000-1000-8000-00805F9B34FB"))]
    fn service_identifiers_resolve_to_the_same_uuid(#[case] id: Value) {
        assert_eq!(
            Some(uuid_from_short(0x180F)),
            StandardGattResolver.service_uuid(&id)
        );
    }

    #[rstest]
    #[case(json!("not_a_service"))]
    #[case(json!("180f"))]
    #[case(json!(-1))]
    #[case(json!(1.5))]
    #[case(json!(null))]
    fn unresolvable_identifiers_yield_none(#[case] id: Value) {
        assert_eq!(None, StandardGattResolver.service_uuid(&id));
    }

    #[test]
    fn characteristic_aliases_are_separate_from_service_aliases() {
        assert_eq!(
            Some(uuid_from_short(0x2A19)),
            StandardGattResolver.characteristic_uuid(&json!("battery_level"))
        );
        assert_eq!(
            None,
            StandardGattResolver.service_uuid(&json!("battery_level"))
        );
    }
}
