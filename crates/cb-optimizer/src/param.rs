//! Named search dimensions.

use serde::{Deserialize, Serialize};

use cb_types::{config_error, internal_error, CbResult, ParamDict};

use crate::space::{ParameterSpace, SpaceKind};

/// A single named dimension of the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Unique within one optimizer instance.
    pub name: String,
    pub space: ParameterSpace,
    /// Real value the random phase is centered on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_center: Option<f64>,
}

impl Param {
    pub fn new(
        name: impl Into<String>,
        space: ParameterSpace,
        search_center: Option<f64>,
    ) -> CbResult<Self> {
        let param = Self {
            name: name.into(),
            space,
            search_center,
        };
        param.validate()?;
        Ok(param)
    }

    pub fn validate(&self) -> CbResult<()> {
        if self.name.is_empty() {
            return Err(config_error!("parameter name must not be empty"));
        }
        self.space
            .validate()
            .map_err(|e| config_error!("parameter {}: {e}", self.name))?;

        match self.search_center {
            Some(center) => {
                if !center.is_finite() || center < self.space.min || center > self.space.max {
                    return Err(config_error!(
                        "parameter {}: search_center {center} is outside [{}, {}]",
                        self.name,
                        self.space.min,
                        self.space.max
                    ));
                }
                if self.space.kind == SpaceKind::Logit && (center <= 0.0 || center >= 1.0) {
                    return Err(config_error!(
                        "parameter {}: logit search_center must lie strictly inside (0, 1), got {center}",
                        self.name
                    ));
                }
            }
            None => {
                if self.space.kind == SpaceKind::Logit {
                    return Err(config_error!(
                        "parameter {}: logit spaces require a search_center",
                        self.name
                    ));
                }
                let (lo, hi) = self.space.basis_bounds();
                if !(lo.is_finite() && hi.is_finite()) {
                    return Err(config_error!(
                        "parameter {}: unbounded spaces require a search_center",
                        self.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Basis-space coordinate of the search center. Falls back to the basis
    /// midpoint when no center was given.
    pub fn basis_center(&self) -> f64 {
        match self.search_center {
            Some(center) => self.space.to_basis(center),
            None => {
                let (lo, hi) = self.space.basis_bounds();
                0.5 * (lo + hi)
            }
        }
    }
}

/// Project a real-valued input onto basis coordinates, in `params` order.
pub fn basis_point(params: &[Param], input: &ParamDict) -> CbResult<Vec<f64>> {
    params
        .iter()
        .map(|p| {
            input
                .get(&p.name)
                .map(|v| p.space.to_basis(*v))
                .ok_or_else(|| internal_error!("input is missing parameter {}", p.name))
        })
        .collect()
}

/// Convert basis coordinates back to a real-valued input.
pub fn real_point(params: &[Param], basis: &[f64]) -> ParamDict {
    params
        .iter()
        .zip(basis)
        .map(|(p, b)| (p.name.clone(), p.space.from_basis(*b)))
        .collect()
}
