//! Plan identifiers and the provider commercial types they map to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

/// A resolved machine plan.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Identifier the requester ordered (for example `2gb`).
    pub id: String,
    /// Provider commercial type backing the plan (for example `DEV1-S`).
    pub commercial_type: String,
}

/// Catalogue of orderable plans.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PlanCatalog {
    plans: BTreeMap<String, String>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::empty()
            .with_plan("2gb", "DEV1-S")
            .with_plan("4gb", "DEV1-M")
            .with_plan("8gb", "DEV1-L")
    }
}

impl PlanCatalog {
    /// Creates a catalogue without any plans.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            plans: BTreeMap::new(),
        }
    }

    /// Adds or replaces a plan.
    #[must_use]
    pub fn with_plan(mut self, id: impl Into<String>, commercial_type: impl Into<String>) -> Self {
        self.plans.insert(id.into(), commercial_type.into());
        self
    }

    /// Looks up `plan_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] naming the known plans when
    /// `plan_id` is not in the catalogue.
    pub fn resolve(&self, plan_id: &str) -> Result<Plan, ProvisionError> {
        let id = plan_id.trim();
        self.plans
            .get(id)
            .map(|commercial_type| Plan {
                id: id.to_owned(),
                commercial_type: commercial_type.clone(),
            })
            .ok_or_else(|| {
                let known: Vec<&str> = self.plans.keys().map(String::as_str).collect();
                ProvisionError::validation(format!(
                    "unknown plan '{id}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }

    /// Parses a catalogue written as `id=TYPE` pairs separated by commas, for
    /// example `2gb=DEV1-S,4gb=DEV1-M`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] for malformed pairs or an empty
    /// catalogue.
    pub fn parse(text: &str) -> Result<Self, ProvisionError> {
        let mut catalog = Self::empty();
        for pair in text.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let Some((raw_id, raw_type)) = pair.split_once('=') else {
                return Err(ProvisionError::validation(format!(
                    "plan entry '{pair}' must look like id=TYPE"
                )));
            };
            let (id, commercial_type) = (raw_id.trim(), raw_type.trim());
            if id.is_empty() || commercial_type.is_empty() {
                return Err(ProvisionError::validation(format!(
                    "plan entry '{pair}' has an empty id or type"
                )));
            }
            catalog = catalog.with_plan(id, commercial_type);
        }
        if catalog.is_empty() {
            return Err(ProvisionError::validation("plan catalogue is empty"));
        }
        Ok(catalog)
    }

    /// Returns `true` when no plan is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}
