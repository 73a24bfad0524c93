//! Query frames: a request decomposed into typed slots, each backed by a
//! verbatim quotation from the request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ValidationError;
use crate::phase::{Intent, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    TargetFeature,
    TriggerCondition,
    ObservedIssue,
    DesiredAction,
}

impl SlotName {
    pub const ALL: [SlotName; 4] = [
        SlotName::TargetFeature,
        SlotName::TriggerCondition,
        SlotName::ObservedIssue,
        SlotName::DesiredAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotName::TargetFeature => "target_feature",
            SlotName::TriggerCondition => "trigger_condition",
            SlotName::ObservedIssue => "observed_issue",
            SlotName::DesiredAction => "desired_action",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SlotName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        SlotName::ALL
            .into_iter()
            .find(|slot| slot.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid slot '{}'. Valid values: target_feature, trigger_condition, observed_issue, desired_action",
                    s
                )
            })
    }
}

/// Where a piece of information came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    /// Quoted from the request.
    Fact,
    /// Inferred later; never promoted to fact.
    Hypothesis,
}

/// A slot as proposed by the caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedSlot {
    pub slot: SlotName,
    /// Interpreted value; defaults to the quotation.
    #[serde(default)]
    pub value: Option<String>,
    pub quote: String,
}

impl ProposedSlot {
    pub fn new(slot: SlotName, quote: impl Into<String>) -> Self {
        Self {
            slot,
            value: None,
            quote: quote.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotValue {
    pub value: String,
    pub quote: String,
    pub provenance: Provenance,
}

/// Validated, immutable decomposition of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFrame {
    pub request: String,
    pub slots: BTreeMap<SlotName, SlotValue>,
}

/// Lower-case and collapse every whitespace run to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether `quote` appears in `request`, ignoring case and whitespace runs.
pub fn quote_in_request(request: &str, quote: &str) -> bool {
    let quote = normalize(quote);
    !quote.is_empty() && normalize(request).contains(&quote)
}

impl QueryFrame {
    /// Validate every proposed slot against `request`. Any unfounded quotation
    /// rejects the whole frame.
    pub fn validate(request: &str, proposed: &[ProposedSlot]) -> Result<Self, ValidationError> {
        let mut slots = BTreeMap::new();
        for p in proposed {
            if p.quote.trim().is_empty() {
                return Err(ValidationError::EmptyQuote {
                    slot: p.slot.to_string(),
                });
            }
            if !quote_in_request(request, &p.quote) {
                return Err(ValidationError::QuoteNotFound {
                    slot: p.slot.to_string(),
                    quote: p.quote.clone(),
                });
            }
            if slots.contains_key(&p.slot) {
                return Err(ValidationError::DuplicateEntries {
                    list: "slots".to_string(),
                    entries: vec![p.slot.to_string()],
                });
            }
            let value = p
                .value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| p.quote.trim())
                .to_string();
            slots.insert(
                p.slot,
                SlotValue {
                    value,
                    quote: p.quote.trim().to_string(),
                    provenance: Provenance::Fact,
                },
            );
        }
        Ok(Self {
            request: request.to_string(),
            slots,
        })
    }

    pub fn get(&self, slot: SlotName) -> Option<&SlotValue> {
        self.slots.get(&slot)
    }

    pub fn has(&self, slot: SlotName) -> bool {
        self.slots.contains_key(&slot)
    }

    /// True when every slot is filled.
    pub fn is_fully_resolved(&self) -> bool {
        SlotName::ALL.iter().all(|slot| self.has(*slot))
    }

    /// Phrase used for relevance scoring: the target feature, or the raw
    /// request when that slot is absent.
    pub fn focus_phrase(&self) -> &str {
        self.get(SlotName::TargetFeature)
            .map(|s| s.value.as_str())
            .unwrap_or(self.request.as_str())
    }

    /// Initial risk for a session with this frame.
    ///
    /// MODIFY with an observed issue but no desired action is HIGH; IMPLEMENT
    /// is MEDIUM; INVESTIGATE, QUESTION and fully resolved frames are LOW.
    pub fn assess_risk(&self, intent: Intent) -> RiskLevel {
        match intent {
            Intent::Investigate | Intent::Question => RiskLevel::Low,
            Intent::Implement => RiskLevel::Medium,
            Intent::Modify => {
                if self.is_fully_resolved() {
                    RiskLevel::Low
                } else if self.has(SlotName::ObservedIssue) && !self.has(SlotName::DesiredAction)
                {
                    RiskLevel::High
                } else if self.slots.is_empty() {
                    // Nothing grounded at all.
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                }
            }
        }
    }
}
