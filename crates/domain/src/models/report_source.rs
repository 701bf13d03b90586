//! Report source domain model.

use serde::{Deserialize, Serialize};

use super::pin::PinType;

/// One pin of a device selected for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDataStream {
    pub pin: u8,
    pub pin_type: Option<PinType>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub is_selected: bool,
}

impl ReportDataStream {
    pub fn new(pin_type: PinType, pin: u8, label: impl Into<String>) -> Self {
        Self {
            pin,
            pin_type: Some(pin_type),
            label: Some(label.into()),
            is_selected: true,
        }
    }

    /// A stream takes part in an export only when its pin type is known and
    /// it is selected.
    pub fn is_valid(&self) -> bool {
        self.pin_type.is_some() && self.is_selected
    }

    /// Pin type and index of a valid stream.
    pub fn pin_ref(&self) -> Option<(PinType, u8)> {
        if !self.is_selected {
            return None;
        }
        self.pin_type.map(|pin_type| (pin_type, self.pin))
    }
}

/// A selection of devices and pins to include in one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportSource {
    /// Devices bound to a tile template, sharing one stream list.
    #[serde(rename_all = "camelCase")]
    TileTemplate {
        template_id: i64,
        #[serde(default)]
        device_ids: Vec<i32>,
        #[serde(default)]
        report_data_streams: Vec<ReportDataStream>,
    },

    /// A plain device selection.
    #[serde(rename_all = "camelCase")]
    Device {
        #[serde(default)]
        device_ids: Vec<i32>,
        #[serde(default)]
        report_data_streams: Vec<ReportDataStream>,
    },
}

impl ReportSource {
    pub fn device_ids(&self) -> &[i32] {
        match self {
            ReportSource::TileTemplate { device_ids, .. }
            | ReportSource::Device { device_ids, .. } => device_ids,
        }
    }

    pub fn data_streams(&self) -> &[ReportDataStream] {
        match self {
            ReportSource::TileTemplate {
                report_data_streams,
                ..
            }
            | ReportSource::Device {
                report_data_streams,
                ..
            } => report_data_streams,
        }
    }

    /// A source is exported only when it names at least one device and one stream.
    pub fn is_valid(&self) -> bool {
        !self.device_ids().is_empty() && !self.data_streams().is_empty()
    }

    /// Selected pins of this source, skipping malformed streams.
    pub fn selected_pins(&self) -> impl Iterator<Item = (PinType, u8)> + '_ {
        self.data_streams().iter().filter_map(ReportDataStream::pin_ref)
    }
}
