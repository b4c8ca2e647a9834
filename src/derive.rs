//! Derived-value inference: values computed rather than observed.
//!
//! The canonical case is location-based scope 2 emissions from electricity
//! consumption:
//!
//! ```text
//! scope2_tco2e = kwh × grid_factor / 1000
//! scope3_tco2e = scope2_tco2e × 0.15        (upstream share, opt-in)
//! ```
//!
//! Intermediate figures stay unrounded; rounding happens exactly once when an
//! [`EmissionsEstimate`] is built (3 dp for scope figures, 2 dp for the
//! display total). The consumption is echoed back unrounded, so feeding an
//! estimate's `kwh` into another calculation reproduces the same figures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::EmissionsConfig;
use crate::context::{Context, FieldValue};
use crate::error::{InferenceError, InferenceResult};

/// Upstream emissions as a share of scope 2.
pub const SCOPE3_UPSTREAM_SHARE: f64 = 0.15;

/// Country used when neither the context nor the config names one.
pub const FALLBACK_COUNTRY: &str = "DE";

/// Built-in grid emission factors, kg CO2 per kWh.
const GRID_FACTORS: &[(&str, f64)] = &[
    ("DE", 0.42),
    ("FR", 0.05),
    ("ES", 0.25),
    ("IT", 0.35),
    ("UK", 0.25),
    ("PL", 0.72),
];

/// Country names and aliases recognized in free text, mapped to table codes.
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("germany", "DE"),
    ("deutschland", "DE"),
    ("france", "FR"),
    ("spain", "ES"),
    ("españa", "ES"),
    ("italy", "IT"),
    ("italia", "IT"),
    ("united kingdom", "UK"),
    ("great britain", "UK"),
    ("gb", "UK"),
    ("poland", "PL"),
    ("polska", "PL"),
];

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Map a country code or name to a grid-table code.
pub fn country_code(country: &str) -> Option<&'static str> {
    let lower = country.trim().to_lowercase();
    if let Some((code, _)) = GRID_FACTORS
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(&lower))
    {
        return Some(*code);
    }
    COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, code)| *code)
}

/// Names and codes the slot classifier may look for in free text.
pub fn country_aliases() -> impl Iterator<Item = (&'static str, &'static str)> {
    COUNTRY_ALIASES.iter().copied()
}

/// Codes of the built-in grid table.
pub fn grid_codes() -> impl Iterator<Item = &'static str> {
    GRID_FACTORS.iter().map(|(code, _)| *code)
}

// ── Estimate ────────────────────────────────────────────────────────────

/// Where the grid factor of an estimate came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "country")]
pub enum GridFactorSource {
    Explicit,
    Country(String),
    Default(String),
}

impl std::fmt::Display for GridFactorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit override"),
            Self::Country(c) => write!(f, "{c} grid average"),
            Self::Default(c) => write!(f, "default, {c} grid average"),
        }
    }
}

/// Result of an emissions calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionsEstimate {
    /// Consumption as supplied, unrounded.
    pub kwh: f64,
    /// kg CO2 per kWh used.
    pub grid_factor: f64,
    pub grid_factor_source: GridFactorSource,
    /// Scope 2 tonnes CO2e, 3 dp.
    pub scope2_tco2e: f64,
    /// Upstream scope 3 tonnes CO2e, 3 dp, when requested.
    pub scope3_tco2e: Option<f64>,
    /// Display total in tonnes CO2e, 2 dp.
    pub tco2e: f64,
    pub breakdown: BTreeMap<String, f64>,
    pub note: String,
}

impl EmissionsEstimate {
    fn compute(
        kwh: f64,
        grid_factor: f64,
        source: GridFactorSource,
        include_scope3: bool,
    ) -> InferenceResult<Self> {
        if !kwh.is_finite() || kwh < 0.0 {
            return Err(InferenceError::InvalidEnergy { kwh });
        }
        if !grid_factor.is_finite() || grid_factor < 0.0 {
            return Err(InferenceError::InvalidGridFactor {
                factor: grid_factor,
            });
        }

        let scope2 = kwh * grid_factor / 1000.0;
        let scope3 = include_scope3.then(|| scope2 * SCOPE3_UPSTREAM_SHARE);
        let total = scope2 + scope3.unwrap_or(0.0);

        let scope2_tco2e = round_to(scope2, 3);
        let scope3_tco2e = scope3.map(|s| round_to(s, 3));

        let mut breakdown = BTreeMap::new();
        breakdown.insert("electricity_scope2".to_string(), scope2_tco2e);
        if let Some(s3) = scope3_tco2e {
            breakdown.insert("upstream_scope3".to_string(), s3);
        }

        let note = format!(
            "Calculated using grid emission factor {grid_factor} kg CO2/kWh ({source})"
        );

        Ok(Self {
            kwh,
            grid_factor,
            grid_factor_source: source,
            scope2_tco2e,
            scope3_tco2e,
            tco2e: round_to(total, 2),
            breakdown,
            note,
        })
    }
}

/// Scope 2 emissions for `kwh` at an explicit grid factor.
pub fn calculate_emissions(kwh: f64, grid_factor: f64) -> InferenceResult<EmissionsEstimate> {
    EmissionsEstimate::compute(kwh, grid_factor, GridFactorSource::Explicit, false)
}

// ── Request + table ─────────────────────────────────────────────────────

/// Parameters of one emissions calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionsRequest {
    pub kwh: f64,
    pub country: Option<String>,
    pub grid_factor: Option<f64>,
    pub include_scope3: bool,
}

impl EmissionsRequest {
    pub fn new(kwh: f64) -> Self {
        Self {
            kwh,
            ..Default::default()
        }
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn grid_factor(mut self, factor: f64) -> Self {
        self.grid_factor = Some(factor);
        self
    }

    pub fn with_scope3(mut self) -> Self {
        self.include_scope3 = true;
        self
    }
}

/// Per-country grid factors: the built-in table plus configured overrides.
#[derive(Debug, Clone)]
pub struct GridTable {
    factors: BTreeMap<String, f64>,
    default_country: String,
}

impl GridTable {
    pub fn builtin() -> Self {
        Self {
            factors: GRID_FACTORS
                .iter()
                .map(|(code, f)| (code.to_string(), *f))
                .collect(),
            default_country: FALLBACK_COUNTRY.to_string(),
        }
    }

    /// Built-in table with the config's additions and default country.
    pub fn from_config(config: &EmissionsConfig) -> Self {
        let mut table = Self::builtin();
        for (country, factor) in &config.grid_factors {
            table.factors.insert(country.to_uppercase(), *factor);
        }
        if let Some(country) = &config.default_country {
            table.default_country = table.code_for(country);
        }
        table
    }

    fn code_for(&self, country: &str) -> String {
        country_code(country)
            .map(str::to_string)
            .unwrap_or_else(|| country.trim().to_uppercase())
    }

    pub fn factor_for(&self, country: &str) -> Option<f64> {
        self.factors.get(&self.code_for(country)).copied()
    }

    /// Pick the grid factor for a request: explicit override, then the
    /// named country, then the default country.
    pub fn select(&self, request: &EmissionsRequest) -> (f64, GridFactorSource) {
        if let Some(g) = request.grid_factor {
            return (g, GridFactorSource::Explicit);
        }
        if let Some(country) = &request.country {
            let code = self.code_for(country);
            if let Some(g) = self.factors.get(&code) {
                return (*g, GridFactorSource::Country(code));
            }
            tracing::warn!(country = %country, "no grid factor for country, using default");
        }
        let g = self
            .factors
            .get(&self.default_country)
            .copied()
            .unwrap_or(0.42);
        (g, GridFactorSource::Default(self.default_country.clone()))
    }

    pub fn estimate(&self, request: &EmissionsRequest) -> InferenceResult<EmissionsEstimate> {
        let (factor, source) = self.select(request);
        EmissionsEstimate::compute(request.kwh, factor, source, request.include_scope3)
    }
}

impl Default for GridTable {
    fn default() -> Self {
        Self::builtin()
    }
}

// ── Context inference ───────────────────────────────────────────────────

/// Computes derived context entries from known facts.
#[derive(Debug, Clone, Default)]
pub struct Inference {
    table: GridTable,
    grid_factor: Option<f64>,
    include_scope3: bool,
}

impl Inference {
    pub fn new(config: &EmissionsConfig) -> Self {
        Self {
            table: GridTable::from_config(config),
            grid_factor: config.grid_factor,
            include_scope3: config.include_scope3,
        }
    }

    pub fn table(&self) -> &GridTable {
        &self.table
    }

    /// Derive emissions entries from a context that knows `kwh`.
    ///
    /// Returns nothing when consumption is unknown or unusable; derivation
    /// never fails a request.
    pub fn derive(&self, ctx: &Context) -> Vec<(String, FieldValue)> {
        let Some(kwh) = ctx.value("kwh").and_then(FieldValue::as_f64) else {
            return Vec::new();
        };
        let mut request = EmissionsRequest {
            kwh,
            country: ctx.value("country").map(|v| v.to_string()),
            grid_factor: self.grid_factor,
            include_scope3: self.include_scope3,
        };
        if let Some(g) = ctx.value("grid_factor").and_then(FieldValue::as_f64) {
            request.grid_factor = Some(g);
        }

        let estimate = match self.table.estimate(&request) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping emissions inference: {e}");
                return Vec::new();
            }
        };

        let mut out = vec![
            ("tco2e".to_string(), FieldValue::Number(estimate.tco2e)),
            ("scope2_tco2e".to_string(), FieldValue::Number(estimate.scope2_tco2e)),
            ("grid_factor".to_string(), FieldValue::Number(estimate.grid_factor)),
        ];
        if let Some(s3) = estimate.scope3_tco2e {
            out.push(("scope3_tco2e".to_string(), FieldValue::Number(s3)));
        }
        out
    }
}
