//! The editable-field mapping table and value normalization.
//!
//! [`CaseField`] is the authoritative contract of what staff may edit: a
//! column absent here can never appear in a patch, no matter what the
//! request carried.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{CaseRecord, CaseStatus};
use crate::error::EditError;

/// Currency suffix used when presenting the fee field.
const AMOUNT_UNIT: &str = "PLN";
/// Display sentinel for "no fee agreed yet".
const AMOUNT_SENTINEL: &str = "N/A";

/// Value shape of an editable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Status,
    Date,
    Flag,
    /// Nullable money amount, displayed with a currency suffix.
    Amount,
}

/// Editable fields of a case record.
///
/// The logical name (used by the API) is deliberately distinct from the
/// storage column: presentation may reshape a field without touching the
/// storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaseField {
    ClientName,
    CaseType,
    Status,
    DecisionDue,
    PaymentAmount,
    PaymentReceived,
    Notes,
}

impl CaseField {
    pub const ALL: [CaseField; 7] = [
        Self::ClientName,
        Self::CaseType,
        Self::Status,
        Self::DecisionDue,
        Self::PaymentAmount,
        Self::PaymentReceived,
        Self::Notes,
    ];

    /// Logical field name as used by the dashboard API.
    pub fn name(self) -> &'static str {
        match self {
            Self::ClientName => "clientName",
            Self::CaseType => "caseType",
            Self::Status => "status",
            Self::DecisionDue => "decisionDue",
            Self::PaymentAmount => "paymentAmount",
            Self::PaymentReceived => "paymentReceived",
            Self::Notes => "notes",
        }
    }

    /// Storage column this field maps to.
    pub fn column(self) -> &'static str {
        match self {
            Self::ClientName => "client_name",
            Self::CaseType => "case_type",
            Self::Status => "status",
            Self::DecisionDue => "decision_due",
            Self::PaymentAmount => "payment_amount",
            Self::PaymentReceived => "payment_received",
            Self::Notes => "notes",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Self::ClientName => FieldKind::Text,
            Self::CaseType => FieldKind::Text,
            Self::Status => FieldKind::Status,
            Self::DecisionDue => FieldKind::Date,
            Self::PaymentAmount => FieldKind::Amount,
            Self::PaymentReceived => FieldKind::Flag,
            Self::Notes => FieldKind::Text,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }
}

/// Raw input a form control delivers for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldInput {
    Flag(bool),
    Text(String),
}

/// The editable projection of a case row, in display form.
///
/// Both the baseline snapshot and the working copy are `CaseDraft`s; the
/// working copy holds whatever the user typed (e.g. `"1600 PLN"`), and
/// normalization is deferred to diff time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDraft {
    pub client_name: String,
    pub case_type: String,
    pub status: CaseStatus,
    /// ISO date string, empty when no decision date is known.
    pub decision_due: String,
    /// Display amount like "1500 PLN", or "N/A" when unset.
    pub payment_amount: String,
    pub payment_received: bool,
    pub notes: String,
}

impl CaseDraft {
    pub fn from_record(record: &CaseRecord) -> Self {
        Self {
            client_name: record.client_name.clone(),
            case_type: record.case_type.clone().unwrap_or_default(),
            status: record.status,
            decision_due: format_date(record.decision_due),
            payment_amount: format_amount(record.payment_amount),
            payment_received: record.payment_received,
            notes: record.notes.clone().unwrap_or_default(),
        }
    }

    /// Mutate one field of the working copy. Coercion only: text is
    /// trimmed, flags accept the literal strings a form may send. No
    /// remote effect, no validation beyond the field's shape.
    pub fn set_field(&mut self, field: CaseField, input: FieldInput) -> Result<(), EditError> {
        let text = |input: FieldInput| match input {
            FieldInput::Text(value) => Ok(value),
            FieldInput::Flag(value) => Ok(value.to_string()),
        };
        match field {
            CaseField::ClientName => self.client_name = text(input)?.trim().to_string(),
            CaseField::CaseType => self.case_type = text(input)?.trim().to_string(),
            CaseField::Notes => self.notes = text(input)?.trim().to_string(),
            CaseField::DecisionDue => self.decision_due = text(input)?.trim().to_string(),
            CaseField::PaymentAmount => self.payment_amount = text(input)?.trim().to_string(),
            CaseField::Status => {
                let raw = text(input)?;
                self.status = CaseStatus::from_db_value(raw.trim()).ok_or_else(|| {
                    EditError::InvalidValue {
                        field: field.name(),
                        message: format!("unknown status '{}'", raw.trim()),
                    }
                })?;
            }
            CaseField::PaymentReceived => {
                self.payment_received = match input {
                    FieldInput::Flag(value) => value,
                    FieldInput::Text(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                        "true" | "yes" | "1" => true,
                        "false" | "no" | "0" => false,
                        other => {
                            return Err(EditError::InvalidValue {
                                field: field.name(),
                                message: format!("expected a boolean, got '{other}'"),
                            });
                        }
                    },
                }
            }
        }
        Ok(())
    }

    /// Normalized storage value of one field, ready for comparison and
    /// for the update payload.
    pub fn storage_value(&self, field: CaseField) -> Result<ColumnValue, EditError> {
        Ok(match field {
            CaseField::ClientName => ColumnValue::Text(self.client_name.trim().to_string()),
            CaseField::CaseType => ColumnValue::NullableText(opt_text(&self.case_type)),
            CaseField::Status => ColumnValue::Status(self.status),
            CaseField::DecisionDue => ColumnValue::Date(parse_date(&self.decision_due)?),
            CaseField::PaymentAmount => ColumnValue::Amount(parse_amount(&self.payment_amount)?),
            CaseField::PaymentReceived => ColumnValue::Flag(self.payment_received),
            CaseField::Notes => ColumnValue::NullableText(opt_text(&self.notes)),
        })
    }
}

/// A storage-ready value, typed per column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Text(String),
    NullableText(Option<String>),
    Status(CaseStatus),
    Date(Option<NaiveDate>),
    Flag(bool),
    Amount(Option<Decimal>),
}

/// Minimal update payload: storage column name → new storage-ready value.
///
/// Ordered so the generated SQL is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CasePatch {
    columns: BTreeMap<&'static str, ColumnValue>,
}

impl CasePatch {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ColumnValue)> {
        self.columns.iter().map(|(column, value)| (*column, value))
    }

    pub(crate) fn insert(&mut self, column: &'static str, value: ColumnValue) {
        self.columns.insert(column, value);
    }
}

/// Compare baseline and working copy under each field's equality rule and
/// collect only the differences.
///
/// The baseline always normalizes cleanly (it was rendered from a store
/// row); errors can only come from values the user typed.
pub(crate) fn diff_drafts(baseline: &CaseDraft, working: &CaseDraft) -> Result<CasePatch, EditError> {
    let mut patch = CasePatch::default();
    for field in CaseField::ALL {
        let before = baseline.storage_value(field)?;
        let after = working.storage_value(field)?;
        if before != after {
            patch.insert(field.column(), after);
        }
    }
    Ok(patch)
}

fn opt_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn parse_date(raw: &str) -> Result<Option<NaiveDate>, EditError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| EditError::InvalidValue {
            field: CaseField::DecisionDue.name(),
            message: format!("'{trimmed}' is not a YYYY-MM-DD date"),
        })
}

/// Render a stored amount for display: `Some(1500)` → `"1500 PLN"`,
/// `None` → `"N/A"`.
pub fn format_amount(amount: Option<Decimal>) -> String {
    match amount {
        Some(value) => format!("{} {}", value.normalize(), AMOUNT_UNIT),
        None => AMOUNT_SENTINEL.to_string(),
    }
}

/// Normalize a display amount back to its stored form.
///
/// Accepts `"1500 PLN"`, bare `"1500"`, the `"N/A"` sentinel, and the
/// empty string (both map to null). Anything else is the user's typo and
/// is rejected rather than silently dropped.
pub fn parse_amount(raw: &str) -> Result<Option<Decimal>, EditError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(AMOUNT_SENTINEL) {
        return Ok(None);
    }
    let numeric = trimmed
        .strip_suffix(AMOUNT_UNIT)
        .or_else(|| trimmed.strip_suffix(&AMOUNT_UNIT.to_ascii_lowercase()))
        .unwrap_or(trimmed)
        .trim();
    numeric
        .replace(' ', "")
        .parse::<Decimal>()
        .map(|value| Some(value.normalize()))
        .map_err(|_| EditError::InvalidValue {
            field: CaseField::PaymentAmount.name(),
            message: format!("'{trimmed}' is not an amount"),
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::{
        AMOUNT_SENTINEL, CaseDraft, CaseField, ColumnValue, FieldInput, diff_drafts,
        format_amount, parse_amount,
    };
    use crate::db::CaseStatus;

    fn draft() -> CaseDraft {
        CaseDraft {
            client_name: "John Doe".to_string(),
            case_type: "Karta Pobytu".to_string(),
            status: CaseStatus::InReview,
            decision_due: "2025-03-15".to_string(),
            payment_amount: "1500 PLN".to_string(),
            payment_received: false,
            notes: String::new(),
        }
    }

    #[test]
    fn every_field_has_a_distinct_column() {
        let mut columns: Vec<_> = CaseField::ALL.iter().map(|f| f.column()).collect();
        columns.sort_unstable();
        columns.dedup();
        assert_eq!(columns.len(), CaseField::ALL.len());
    }

    #[test]
    fn field_names_resolve_back_to_fields() {
        for field in CaseField::ALL {
            assert_eq!(CaseField::from_name(field.name()), Some(field));
        }
        assert_eq!(CaseField::from_name("publicCaseId"), None);
    }

    #[test]
    fn amount_parsing_strips_unit_and_handles_sentinel() {
        assert_eq!(parse_amount("1500 PLN").unwrap(), Some(dec!(1500)));
        assert_eq!(parse_amount("1500").unwrap(), Some(dec!(1500)));
        assert_eq!(parse_amount("1 500 PLN").unwrap(), Some(dec!(1500)));
        assert_eq!(parse_amount(AMOUNT_SENTINEL).unwrap(), None);
        assert_eq!(parse_amount("  ").unwrap(), None);
        assert!(parse_amount("15oo PLN").is_err());
    }

    #[test]
    fn amount_formatting_round_trips() {
        assert_eq!(format_amount(Some(dec!(1500))), "1500 PLN");
        assert_eq!(parse_amount(&format_amount(Some(dec!(1500)))).unwrap(), Some(dec!(1500)));
        assert_eq!(format_amount(None), "N/A");
    }

    #[test]
    fn identical_drafts_diff_to_nothing() {
        let patch = diff_drafts(&draft(), &draft()).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn reformatting_the_amount_is_not_a_change() {
        let baseline = draft();
        let mut working = draft();
        working.payment_amount = "1500PLN".to_string();
        let patch = diff_drafts(&baseline, &working).unwrap();
        assert!(patch.is_empty(), "presentation differences must not diff");
    }

    #[test]
    fn a_real_amount_change_diffs_to_one_numeric_column() {
        let baseline = draft();
        let mut working = draft();
        working
            .set_field(CaseField::PaymentAmount, FieldInput::Text("1600 PLN".to_string()))
            .unwrap();
        let patch = diff_drafts(&baseline, &working).unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(
            patch.get("payment_amount"),
            Some(&ColumnValue::Amount(Some(dec!(1600))))
        );
    }

    #[test]
    fn single_field_change_yields_single_column_patch() {
        let baseline = draft();
        let mut working = draft();
        working
            .set_field(CaseField::Status, FieldInput::Text("approved".to_string()))
            .unwrap();
        let patch = diff_drafts(&baseline, &working).unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(
            patch.get("status"),
            Some(&ColumnValue::Status(CaseStatus::Approved))
        );
    }

    #[test]
    fn clearing_text_maps_to_null_not_empty_string() {
        let mut baseline = draft();
        baseline.notes = "call the office".to_string();
        let mut working = baseline.clone();
        working.set_field(CaseField::Notes, FieldInput::Text("  ".to_string())).unwrap();
        let patch = diff_drafts(&baseline, &working).unwrap();
        assert_eq!(patch.get("notes"), Some(&ColumnValue::NullableText(None)));
    }

    #[test]
    fn set_field_rejects_unknown_status_tokens() {
        let mut working = draft();
        let err = working
            .set_field(CaseField::Status, FieldInput::Text("granted".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("granted"));
    }

    #[test]
    fn flag_accepts_form_literals() {
        let mut working = draft();
        working
            .set_field(CaseField::PaymentReceived, FieldInput::Text("yes".to_string()))
            .unwrap();
        assert!(working.payment_received);
        working
            .set_field(CaseField::PaymentReceived, FieldInput::Flag(false))
            .unwrap();
        assert!(!working.payment_received);
    }
}
