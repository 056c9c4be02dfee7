//! Acquisition protocol constants, validated once at startup

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Fixed scanner and tool constants shared by every subject of a cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Protocol {
    /// Effective echo spacing in milliseconds
    pub echo_spacing_ms: f64,
    /// EPI factor (phase-encoding lines)
    pub epi_factor: u32,
    /// topup configuration file name or path
    pub topup_config: String,
    /// bet `-f` for the mean field-corrected b0 (moderate, keeps edge tissue)
    pub reference_bet_frac: f64,
    /// bet `-f` for the T1w (anatomical contrast tolerates tighter stripping)
    pub anatomical_bet_frac: f64,
    /// Pass `--repol` to eddy (outlier slice replacement)
    pub replace_outliers: bool,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            echo_spacing_ms: 0.69,
            epi_factor: 140,
            topup_config: "b02b0.cnf".into(),
            reference_bet_frac: 0.7,
            anatomical_bet_frac: 0.15,
            replace_outliers: true,
        }
    }
}

impl Protocol {
    /// Total readout time in seconds: echo spacing × (EPI factor − 1).
    pub fn total_readout_time(&self) -> f64 {
        self.echo_spacing_ms * f64::from(self.epi_factor.saturating_sub(1)) / 1000.0
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !(self.echo_spacing_ms.is_finite() && self.echo_spacing_ms > 0.0) {
            return Err(ProtocolError::EchoSpacing(self.echo_spacing_ms));
        }
        if self.epi_factor < 2 {
            return Err(ProtocolError::EpiFactor(self.epi_factor));
        }
        for (name, value) in [
            ("reference_bet_frac", self.reference_bet_frac),
            ("anatomical_bet_frac", self.anatomical_bet_frac),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ProtocolError::BetFraction { name, value });
            }
        }
        if self.topup_config.trim().is_empty() {
            return Err(ProtocolError::EmptyTopupConfig);
        }
        Ok(())
    }
}
