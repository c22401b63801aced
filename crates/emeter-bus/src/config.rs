// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serial line configuration.
//!
//! Both meter families run at 9600 baud with 8 data bits and no parity, but
//! they disagree on stop bits: the AC meter uses one, the DC meter two. The
//! [`SerialConfig::default_ac`] and [`SerialConfig::default_dc`] constructors
//! encode those defaults; the builder exists for the odd bus that needs
//! something else.

use serde::{Deserialize, Serialize};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::BusError;

/// Default baud rate for both meter families.
pub const DEFAULT_BAUD: u32 = 9600;

// =============================================================================
// Line parameter enums
// =============================================================================

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits (meter default).
    #[default]
    Eight,
}

impl DataBits {
    /// Converts to the tokio-serial representation.
    pub fn to_serial(self) -> tokio_serial::DataBits {
        match self {
            Self::Five => tokio_serial::DataBits::Five,
            Self::Six => tokio_serial::DataBits::Six,
            Self::Seven => tokio_serial::DataBits::Seven,
            Self::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Parity bit mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity (meter default).
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl Parity {
    /// Converts to the tokio-serial representation.
    pub fn to_serial(self) -> tokio_serial::Parity {
        match self {
            Self::None => tokio_serial::Parity::None,
            Self::Odd => tokio_serial::Parity::Odd,
            Self::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// One stop bit (AC meters).
    #[default]
    One,
    /// Two stop bits (DC meters).
    Two,
}

impl StopBits {
    /// Converts to the tokio-serial representation.
    pub fn to_serial(self) -> tokio_serial::StopBits {
        match self {
            Self::One => tokio_serial::StopBits::One,
            Self::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Flow control mode. Meters use none; kept configurable for exotic buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// No flow control (meter default).
    #[default]
    None,
    /// XON/XOFF software flow control.
    Software,
    /// RTS/CTS hardware flow control.
    Hardware,
}

impl FlowControl {
    /// Converts to the tokio-serial representation.
    pub fn to_serial(self) -> tokio_serial::FlowControl {
        match self {
            Self::None => tokio_serial::FlowControl::None,
            Self::Software => tokio_serial::FlowControl::Software,
            Self::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

// =============================================================================
// SerialConfig
// =============================================================================

/// Configuration of one serial bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl SerialConfig {
    /// 9600 8N1 — the AC meter line settings.
    pub fn default_ac(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }

    /// 9600 8N2 — the DC meter line settings.
    pub fn default_dc(path: impl Into<String>) -> Self {
        Self {
            stop_bits: StopBits::Two,
            ..Self::default_ac(path)
        }
    }

    /// Starts a builder with AC defaults.
    pub fn builder() -> SerialConfigBuilder {
        SerialConfigBuilder::default()
    }

    /// Opens the device asynchronously.
    ///
    /// A refused open is fatal for port construction; the error tells the
    /// operator whether the device is missing, locked or misconfigured.
    pub fn open(&self) -> Result<SerialStream, BusError> {
        let builder = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(self.data_bits.to_serial())
            .parity(self.parity.to_serial())
            .stop_bits(self.stop_bits.to_serial())
            .flow_control(self.flow_control.to_serial());

        builder.open_native_async().map_err(|e| match e.kind {
            tokio_serial::ErrorKind::NoDevice => BusError::DeviceNotFound {
                path: self.path.clone(),
            },
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => BusError::DeviceNotFound {
                path: self.path.clone(),
            },
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                BusError::AccessDenied {
                    path: self.path.clone(),
                }
            }
            _ => BusError::ConfigRejected {
                path: self.path.clone(),
                message: e.to_string(),
            },
        })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SerialConfig`]; defaults match the AC meter (9600 8N1).
#[derive(Debug, Clone, Default)]
pub struct SerialConfigBuilder {
    path: Option<String>,
    baud_rate: Option<u32>,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    flow_control: FlowControl,
}

impl SerialConfigBuilder {
    /// Sets the device path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the baud rate.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = Some(baud);
        self
    }

    /// Sets the data bits.
    pub fn data_bits(mut self, bits: DataBits) -> Self {
        self.data_bits = bits;
        self
    }

    /// Sets the parity.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the stop bits.
    pub fn stop_bits(mut self, bits: StopBits) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Sets the flow control.
    pub fn flow_control(mut self, fc: FlowControl) -> Self {
        self.flow_control = fc;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<SerialConfig, BusError> {
        let path = self.path.unwrap_or_default();
        if path.is_empty() {
            return Err(BusError::InvalidConfig {
                field: "path",
                message: "device path must not be empty".into(),
            });
        }

        let baud_rate = self.baud_rate.unwrap_or(DEFAULT_BAUD);
        if baud_rate == 0 {
            return Err(BusError::InvalidConfig {
                field: "baud_rate",
                message: "baud rate must be non-zero".into(),
            });
        }

        Ok(SerialConfig {
            path,
            baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            flow_control: self.flow_control,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_defaults() {
        let ac = SerialConfig::default_ac("/dev/ttyUSB0");
        assert_eq!(ac.baud_rate, 9600);
        assert_eq!(ac.stop_bits, StopBits::One);
        assert_eq!(ac.parity, Parity::None);

        let dc = SerialConfig::default_dc("/dev/ttyUSB1");
        assert_eq!(dc.stop_bits, StopBits::Two);
        assert_eq!(dc.data_bits, DataBits::Eight);
    }

    #[test]
    fn test_builder_defaults_to_ac_line() {
        let cfg = SerialConfig::builder().path("/dev/ttyUSB0").build().unwrap();
        assert_eq!(cfg, SerialConfig::default_ac("/dev/ttyUSB0"));
    }

    #[test]
    fn test_builder_rejects_empty_path() {
        let err = SerialConfig::builder().build().unwrap_err();
        assert!(matches!(err, BusError::InvalidConfig { field: "path", .. }));
    }

    #[test]
    fn test_builder_rejects_zero_baud() {
        let err = SerialConfig::builder()
            .path("/dev/ttyUSB0")
            .baud_rate(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidConfig { field: "baud_rate", .. }));
    }

    #[test]
    fn test_conversions() {
        assert!(matches!(
            DataBits::Eight.to_serial(),
            tokio_serial::DataBits::Eight
        ));
        assert!(matches!(Parity::None.to_serial(), tokio_serial::Parity::None));
        assert!(matches!(StopBits::Two.to_serial(), tokio_serial::StopBits::Two));
        assert!(matches!(
            FlowControl::None.to_serial(),
            tokio_serial::FlowControl::None
        ));
    }

    #[test]
    fn test_config_serde_round_trip() {
        let cfg = SerialConfig::default_dc("/dev/ttyUSB1");
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SerialConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
