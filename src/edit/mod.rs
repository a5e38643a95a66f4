//! Record edit sessions for case records.
//!
//! When a staff member opens a case for editing, the dashboard must send
//! the store only the columns that actually changed. This module owns
//! that contract end to end: a typed table of editable fields
//! ([`CaseField`]), an editable projection of a case row ([`CaseDraft`]),
//! a minimal column-level diff ([`CasePatch`]), and the
//! begin/mutate/save-or-cancel lifecycle ([`EditSession`],
//! [`EditSessions`]).
//!
//! Two rules keep partial updates honest:
//!
//! - Diffs are always computed against the baseline captured when the
//!   session began, never against a previously sent patch, so repeated
//!   saves cannot compound drift.
//! - Comparison happens on *normalized storage values*. The fee field is
//!   displayed as `"1500 PLN"` but stored as a number; the diff strips
//!   the presentation before comparing, so reformatting never registers
//!   as a change.

mod fields;
mod session;

pub use fields::{
    CaseDraft, CaseField, CasePatch, ColumnValue, FieldInput, FieldKind, format_amount,
    format_date, parse_amount,
};
pub use session::{CasePatchTarget, EditSession, EditSessions, SaveOutcome};
