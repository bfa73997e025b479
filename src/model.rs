//! Analysis result types shared by the provider client, the HTTP layer and
//! the history store.  Field names follow the JSON contract the browser
//! client consumes (camelCase).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder recorded in history when an upload carried no file name.
pub const UNTITLED_FILE_NAME: &str = "Untitled document";

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub property_address: String,
    pub buyer_name: String,
    pub seller_name: String,
    pub purchase_price: String,
    pub contract_date: String,
    pub closing_date: String,
}

/// Outcome of one checklist rule.  Deserialization rejects any other value.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Present,
    Missing,
    Unclear,
    NotApplicable,
}

impl ComplianceStatus {
    pub const ALL: [ComplianceStatus; 4] = [
        ComplianceStatus::Present,
        ComplianceStatus::Missing,
        ComplianceStatus::Unclear,
        ComplianceStatus::NotApplicable,
    ];

    /// Display priority; lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            ComplianceStatus::Missing => 1,
            ComplianceStatus::Unclear => 2,
            ComplianceStatus::Present => 3,
            ComplianceStatus::NotApplicable => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComplianceStatus::Present => "PRESENT",
            ComplianceStatus::Missing => "MISSING",
            ComplianceStatus::Unclear => "UNCLEAR",
            ComplianceStatus::NotApplicable => "NOT_APPLICABLE",
        }
    }

    /// Whether the item needs follow-up from the other side of the deal.
    pub fn needs_attention(self) -> bool {
        matches!(self, ComplianceStatus::Missing | ComplianceStatus::Unclear)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub rule_name: String,
    pub description: String,
    pub status: ComplianceStatus,
    pub notes: String,
    /// Page where the evidence was found.  Always serialized, as `null` when
    /// absent, and accepted as missing on input.
    #[serde(default)]
    pub page_reference: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: TransactionSummary,
    pub checklist: Vec<ChecklistItem>,
    pub missing_items_email_draft: String,
}

/// Output that parsed but still breaks the result contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConformanceError {
    #[error("checklist item '{id}' has a page reference of 0; page numbers start at 1")]
    ZeroPageReference { id: String },
}

impl AnalysisResult {
    /// Check invariants the type system cannot express on its own.  Status
    /// values and integer page numbers are already enforced by serde.
    pub fn check_conformance(&self) -> Result<(), ConformanceError> {
        for item in &self.checklist {
            if item.page_reference == Some(0) {
                return Err(ConformanceError::ZeroPageReference {
                    id: item.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Checklist in display order: MISSING, UNCLEAR, PRESENT, NOT_APPLICABLE.
    /// Items sharing a status keep their provider order.
    pub fn checklist_by_priority(&self) -> Vec<&ChecklistItem> {
        let mut items: Vec<&ChecklistItem> = self.checklist.iter().collect();
        items.sort_by_key(|item| item.status.priority());
        items
    }

    /// Items the email draft is expected to cover.
    pub fn attention_items(&self) -> impl Iterator<Item = &ChecklistItem> {
        self.checklist
            .iter()
            .filter(|item| item.status.needs_attention())
    }
}

/// One persisted analysis as returned by `GET /history`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisHistoryItem {
    pub id: String,
    /// Epoch milliseconds assigned by the store when the row was written.
    pub created_at: i64,
    pub file_names: Vec<String>,
    pub result: AnalysisResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str, status: ComplianceStatus) -> ChecklistItem {
        ChecklistItem {
            id: id.into(),
            rule_name: format!("Rule {}", id),
            description: String::new(),
            status,
            notes: String::new(),
            page_reference: None,
        }
    }

    #[test]
    fn status_uses_screaming_snake_case() {
        for status in ComplianceStatus::ALL {
            let encoded = serde_json::to_value(status).unwrap();
            assert_eq!(encoded, json!(status.as_str()));
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let raw = json!({
            "id": "1", "ruleName": "x", "description": "", "status": "APPROVED",
            "notes": "", "pageReference": null
        });
        assert!(serde_json::from_value::<ChecklistItem>(raw).is_err());
    }

    #[test]
    fn fractional_page_reference_is_rejected() {
        let raw = json!({
            "id": "1", "ruleName": "x", "description": "", "status": "PRESENT",
            "notes": "", "pageReference": 2.5
        });
        assert!(serde_json::from_value::<ChecklistItem>(raw).is_err());
        let negative = json!({
            "id": "1", "ruleName": "x", "description": "", "status": "PRESENT",
            "notes": "", "pageReference": -3
        });
        assert!(serde_json::from_value::<ChecklistItem>(negative).is_err());
    }

    #[test]
    fn null_page_reference_serializes_as_null() {
        let value = serde_json::to_value(item("a", ComplianceStatus::Missing)).unwrap();
        assert_eq!(value["pageReference"], serde_json::Value::Null);
        assert_eq!(value["ruleName"], json!("Rule a"));
    }

    #[test]
    fn zero_page_reference_breaks_conformance() {
        let mut bad = item("lead", ComplianceStatus::Present);
        bad.page_reference = Some(0);
        let result = AnalysisResult {
            summary: TransactionSummary::default(),
            checklist: vec![item("ok", ComplianceStatus::Present), bad],
            missing_items_email_draft: String::new(),
        };
        assert_eq!(
            result.check_conformance(),
            Err(ConformanceError::ZeroPageReference { id: "lead".into() })
        );
    }

    #[test]
    fn priority_sort_is_stable() {
        let result = AnalysisResult {
            summary: TransactionSummary::default(),
            checklist: vec![
                item("1", ComplianceStatus::Present),
                item("2", ComplianceStatus::NotApplicable),
                item("3", ComplianceStatus::Unclear),
                item("4", ComplianceStatus::Missing),
                item("5", ComplianceStatus::Present),
                item("6", ComplianceStatus::Missing),
            ],
            missing_items_email_draft: String::new(),
        };
        let ids: Vec<&str> = result
            .checklist_by_priority()
            .into_iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["4", "6", "3", "1", "5", "2"]);
        let attention: Vec<&str> = result.attention_items().map(|i| i.id.as_str()).collect();
        assert_eq!(attention, vec!["3", "4", "6"]);
    }
}
