use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use super::model::{AdvertisementData, PeripheralInfo};
use super::uuid::GattResolver;
use crate::error::RpcError;

/// Lowest signal strength, in dBm, at which an advertisement is reported.
pub const MINIMUM_SIGNAL_STRENGTH: i16 = -70;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanFilterInit {
    name: Option<String>,
    name_prefix: Option<String>,
    services: Option<Vec<Value>>,
    manufacturer_data: Option<BTreeMap<String, ManufacturerDataInit>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManufacturerDataInit {
    data_prefix: Option<Vec<u8>>,
    mask: Option<Vec<u8>>,
}

/// Manufacturer-data constraint for one company identifier.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ManufacturerDataFilter {
    company_id: u16,
    data_prefix: Vec<u8>,
    mask: Vec<u8>,
}

impl ManufacturerDataFilter {
    /// Builds a constraint; `mask` defaults to all-ones over the prefix.
    ///
    /// # Errors
    ///
    /// Returns invalid-params when the mask and prefix lengths differ.
    pub fn new(company_id: u16, data_prefix: Vec<u8>, mask: Option<Vec<u8>>) -> Result<Self, RpcError> {
        let mask = mask.unwrap_or_else(|| vec![0xFF; data_prefix.len()]);
        if mask.len() != data_prefix.len() {
            return Err(RpcError::invalid_params(
                "data prefix length does not match mask length",
            ));
        }
        Ok(Self {
            company_id,
            data_prefix,
            mask,
        })
    }

    /// Checks the raw manufacturer field: little-endian company id, then masked payload.
    fn matches(&self, manufacturer_data: Option<&[u8]>) -> bool {
        let Some([low, high, payload @ ..]) = manufacturer_data else {
            return false;
        };
        if u16::from_le_bytes([*low, *high]) != self.company_id {
            return false;
        }
        if payload.len() < self.data_prefix.len() {
            return false;
        }

        self.data_prefix
            .iter()
            .zip(payload)
            .zip(&self.mask)
            .all(|((expected, actual), mask)| expected & mask == actual & mask)
    }
}

/// One filter of a discovery request; all present criteria must hold.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ScanFilter {
    name: Option<String>,
    name_prefix: Option<String>,
    required_services: HashSet<Uuid>,
    manufacturer_data: Vec<ManufacturerDataFilter>,
}

impl ScanFilter {
    /// Parses one element of the `filters` parameter.
    ///
    /// # Errors
    ///
    /// Returns invalid-params when the filter is malformed, a service cannot be resolved, or a
    /// manufacturer-data entry is inconsistent.
    pub fn from_json(value: &Value, resolver: &dyn GattResolver) -> Result<Self, RpcError> {
        let init = ScanFilterInit::deserialize(value)
            .map_err(|error| RpcError::invalid_params(format!("could not parse filter: {error}")))?;

        let required_services = init
            .services
            .unwrap_or_default()
            .iter()
            .map(|service| {
                resolver.service_uuid(service).ok_or_else(|| {
                    RpcError::invalid_params(format!("could not determine UUID for service {service}"))
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let manufacturer_data = init
            .manufacturer_data
            .unwrap_or_default()
            .into_iter()
            .map(|(company_id, entry)| {
                let company_id = company_id
                    .parse::<u16>()
                    .map_err(|_error| RpcError::invalid_params("could not parse manufacturer data"))?;
                let data_prefix = entry
                    .data_prefix
                    .ok_or_else(|| RpcError::invalid_params("no data prefix specified"))?;
                ManufacturerDataFilter::new(company_id, data_prefix, entry.mask)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: init.name,
            name_prefix: init.name_prefix,
            required_services,
            manufacturer_data,
        })
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_name_prefix(mut self, name_prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(name_prefix.into());
        self
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_required_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.required_services.extend(services);
        self
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_manufacturer_data(mut self, filter: ManufacturerDataFilter) -> Self {
        self.manufacturer_data.push(filter);
        self
    }

    /// True when no criterion restricts the match.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name().is_none()
            && self.name_prefix().is_none()
            && self.required_services.is_empty()
            && self.manufacturer_data.is_empty()
    }

    #[must_use]
    pub fn required_services(&self) -> &HashSet<Uuid> {
        &self.required_services
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }

    fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref().filter(|prefix| !prefix.is_empty())
    }

    /// Evaluates one advertisement event against this filter.
    #[must_use]
    pub fn matches(&self, peripheral: &PeripheralInfo, advertisement: &AdvertisementData) -> bool {
        match peripheral.name() {
            Some(peripheral_name) => {
                if let Some(name) = self.name()
                    && peripheral_name != name
                {
                    return false;
                }
                if let Some(prefix) = self.name_prefix()
                    && !peripheral_name.starts_with(prefix)
                {
                    return false;
                }
            }
            None => {
                if self.name().is_some() || self.name_prefix().is_some() {
                    return false;
                }
            }
        }

        if !self.required_services.is_empty() {
            let available: HashSet<Uuid> = peripheral
                .services()
                .iter()
                .chain(advertisement.service_uuids())
                .copied()
                .collect();
            if !self.required_services.is_subset(&available) {
                return false;
            }
        }

        self.manufacturer_data
            .iter()
            .all(|filter| filter.matches(advertisement.manufacturer_data()))
    }
}

/// Parses the `filters` parameter of a discovery request.
///
/// # Errors
///
/// Returns invalid-params when `filters` is missing, empty, malformed, or contains a filter
/// with no criteria.
#[instrument(skip(filters, resolver), level = "debug")]
pub fn parse_filters(
    filters: Option<&Value>,
    resolver: &dyn GattResolver,
) -> Result<Vec<ScanFilter>, RpcError> {
    let Some(Value::Array(filters)) = filters else {
        return Err(RpcError::invalid_params(
            "could not parse filters in discovery request",
        ));
    };
    if filters.is_empty() {
        return Err(RpcError::invalid_params(
            "discovery request must include filters",
        ));
    }

    let parsed = filters
        .iter()
        .map(|filter| ScanFilter::from_json(filter, resolver))
        .collect::<Result<Vec<_>, _>>()?;
    if parsed.iter().any(ScanFilter::is_empty) {
        return Err(RpcError::invalid_params(
            "discovery request includes empty filter",
        ));
    }
    Ok(parsed)
}

/// True when any filter in the active set matches (OR across filters).
#[must_use]
pub fn matches_any(
    filters: &[ScanFilter],
    peripheral: &PeripheralInfo,
    advertisement: &AdvertisementData,
) -> bool {
    filters
        .iter()
        .any(|filter| filter.matches(peripheral, advertisement))
}
