use crate::diff::Change;
use serde::Serialize;

/// What the remote catalog should actually see for a changed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
    Ignore,
}

/// Filters a raw change through the web-store flag before and after it.
///
/// The catalog only ever holds published records, so a content change only
/// matters while the record is published, and flag flips become creates or
/// deletes.
pub fn resolve(change: Change, was_published: bool, is_published: bool) -> Action {
    match (change, was_published, is_published) {
        (Change::Update, true, true) => Action::Update,
        (Change::Update, true, false) => Action::Delete,
        (Change::Update, false, true) => Action::Create,
        (Change::Update, false, false) => Action::Ignore,
        // never created remotely, so nothing to remove
        (Change::Delete, false, _) => Action::Ignore,
        (Change::Delete, true, _) => Action::Delete,
        (Change::New, _, true) => Action::Create,
        (Change::New, _, false) => Action::Ignore,
    }
}
