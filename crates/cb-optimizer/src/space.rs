//! Parameter spaces and their basis-space transforms.
//!
//! Every parameter is searched in a dimensionless *basis* coordinate where
//! Euclidean distance is meaningful. A [`ParameterSpace`] maps real values
//! into that coordinate (`to_basis`) and back (`from_basis`), applying bound
//! clamping and integer/multiple rounding on the way out.

use serde::{Deserialize, Serialize};

use cb_types::{config_error, CbResult};

/// Distance kept from 0 and 1 before taking a logit.
const LOGIT_EPS: f64 = 1e-12;

/// The transform family of a parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceKind {
    /// `(v - min) / scale`, or identity without a scale.
    Linear,
    /// Natural log; requires `min > 0`.
    Log,
    /// `ln(v / (1 - v))`; requires bounds exactly `[0, 1]`.
    Logit,
}

impl std::fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Log => write!(f, "log"),
            Self::Logit => write!(f, "logit"),
        }
    }
}

/// A bounded real domain with its basis transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub kind: SpaceKind,
    #[serde(with = "lower_bound")]
    pub min: f64,
    #[serde(with = "upper_bound")]
    pub max: f64,
    #[serde(default)]
    pub is_integer: bool,
    /// Quantize real values to the nearest multiple of this factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounding_factor: Option<f64>,
    /// Linear only: divisor applied before distance comparisons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl ParameterSpace {
    fn unchecked(kind: SpaceKind, min: f64, max: f64) -> Self {
        Self {
            kind,
            min,
            max,
            is_integer: false,
            rounding_factor: None,
            scale: None,
        }
    }

    pub fn linear(min: f64, max: f64) -> CbResult<Self> {
        let space = Self::unchecked(SpaceKind::Linear, min, max);
        space.validate()?;
        Ok(space)
    }

    pub fn log(min: f64, max: f64) -> CbResult<Self> {
        let space = Self::unchecked(SpaceKind::Log, min, max);
        space.validate()?;
        Ok(space)
    }

    pub fn logit(min: f64, max: f64) -> CbResult<Self> {
        let space = Self::unchecked(SpaceKind::Logit, min, max);
        space.validate()?;
        Ok(space)
    }

    /// Build a space of the given kind, mirroring the sweep config layout.
    pub fn from_kind(kind: SpaceKind, min: f64, max: f64) -> CbResult<Self> {
        match kind {
            SpaceKind::Linear => Self::linear(min, max),
            SpaceKind::Log => Self::log(min, max),
            SpaceKind::Logit => Self::logit(min, max),
        }
    }

    pub fn integer(mut self) -> Self {
        self.is_integer = true;
        self
    }

    pub fn with_rounding_factor(mut self, factor: f64) -> CbResult<Self> {
        self.rounding_factor = Some(factor);
        self.validate()?;
        Ok(self)
    }

    pub fn with_scale(mut self, scale: f64) -> CbResult<Self> {
        self.scale = Some(scale);
        self.validate()?;
        Ok(self)
    }

    /// Check bound and option consistency for this space's kind.
    pub fn validate(&self) -> CbResult<()> {
        if self.min.is_nan() || self.max.is_nan() {
            return Err(config_error!("{} space bounds must not be NaN", self.kind));
        }
        if self.min >= self.max {
            return Err(config_error!(
                "{} space requires min < max, got [{}, {}]",
                self.kind,
                self.min,
                self.max
            ));
        }
        if let Some(factor) = self.rounding_factor {
            if !(factor.is_finite() && factor > 0.0) {
                return Err(config_error!("rounding_factor must be positive, got {factor}"));
            }
        }

        match self.kind {
            SpaceKind::Linear => {
                if let Some(scale) = self.scale {
                    if !(scale.is_finite() && scale > 0.0) {
                        return Err(config_error!("linear scale must be positive, got {scale}"));
                    }
                    if !self.min.is_finite() {
                        return Err(config_error!("a scaled linear space needs a finite min"));
                    }
                }
            }
            SpaceKind::Log => {
                if !(self.min > 0.0 && self.min.is_finite()) {
                    return Err(config_error!(
                        "log space requires a positive finite min, got {}",
                        self.min
                    ));
                }
            }
            SpaceKind::Logit => {
                if self.min != 0.0 || self.max != 1.0 {
                    return Err(config_error!(
                        "logit space requires bounds [0, 1], got [{}, {}]",
                        self.min,
                        self.max
                    ));
                }
            }
        }

        if self.scale.is_some() && self.kind != SpaceKind::Linear {
            return Err(config_error!("scale is only supported by linear spaces"));
        }
        Ok(())
    }

    /// Map a real value into basis space. Values outside the bounds are
    /// clamped first.
    pub fn to_basis(&self, value: f64) -> f64 {
        let value = value.clamp(self.min, self.max);
        match self.kind {
            SpaceKind::Linear => match self.scale {
                Some(scale) => (value - self.min) / scale,
                None => value,
            },
            SpaceKind::Log => value.ln(),
            SpaceKind::Logit => {
                let p = value.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
                (p / (1.0 - p)).ln()
            }
        }
    }

    /// Map a basis coordinate back to a real value inside `[min, max]`,
    /// rounded according to `is_integer` and `rounding_factor`.
    pub fn from_basis(&self, basis: f64) -> f64 {
        let raw = match self.kind {
            SpaceKind::Linear => match self.scale {
                Some(scale) => basis * scale + self.min,
                None => basis,
            },
            SpaceKind::Log => basis.exp(),
            SpaceKind::Logit => {
                (1.0 / (1.0 + (-basis).exp())).clamp(LOGIT_EPS, 1.0 - LOGIT_EPS)
            }
        };

        let mut value = raw.clamp(self.min, self.max);
        if self.is_integer {
            value = self.snap(value, 1.0);
        }
        if let Some(factor) = self.rounding_factor {
            value = self.snap(value, factor);
        }
        value
    }

    /// `from_basis(to_basis(value))`: the value the optimizer would actually
    /// propose for `value`.
    pub fn round_trip(&self, value: f64) -> f64 {
        self.from_basis(self.to_basis(value))
    }

    /// Basis-space image of `[min, max]`. Either side may be infinite.
    pub fn basis_bounds(&self) -> (f64, f64) {
        match self.kind {
            SpaceKind::Linear => match self.scale {
                Some(scale) => (0.0, (self.max - self.min) / scale),
                None => (self.min, self.max),
            },
            SpaceKind::Log => (self.min.ln(), self.max.ln()),
            SpaceKind::Logit => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }

    pub fn clamp_basis(&self, basis: f64) -> f64 {
        let (lo, hi) = self.basis_bounds();
        basis.clamp(lo, hi)
    }

    /// Round to the nearest multiple of `step` that stays inside the bounds.
    fn snap(&self, value: f64, step: f64) -> f64 {
        let mut snapped = (value / step).round() * step;
        if snapped < self.min {
            snapped += step;
        }
        if snapped > self.max {
            snapped -= step;
        }
        if snapped < self.min || snapped > self.max {
            // No multiple of `step` fits inside the bounds.
            value
        } else {
            snapped
        }
    }
}

/// Serialize an infinite lower bound as `null`.
mod lower_bound {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}

/// Serialize an infinite upper bound as `null`.
mod upper_bound {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
