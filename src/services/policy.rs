//! Authorization policy for store-mutating and store-reading actions.
//!
//! Every service operation asks [`can`] before touching the store. The
//! broadcast channel itself never consults this module.

use serde::Serialize;

use crate::store::Viewer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ViewComments,
    PostComment,
    ClearComments,
    ViewVote,
    ToggleVote,
    UpdateStatus,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewComments => "view-comments",
            Self::PostComment => "post-comment",
            Self::ClearComments => "clear-comments",
            Self::ViewVote => "view-vote",
            Self::ToggleVote => "toggle-vote",
            Self::UpdateStatus => "update-status",
        }
    }

    /// Whether the action needs a signed-in viewer at all.
    #[must_use]
    pub fn requires_viewer(self) -> bool {
        !matches!(self, Self::ViewComments | Self::ViewVote)
    }
}

/// Reads are public, signed-in users may post and vote, admins may also
/// clear comments and change status. Rules are the same for every report.
#[must_use]
pub fn can(viewer: Option<&Viewer>, action: Action, _report_id: &str) -> bool {
    match action {
        Action::ViewComments | Action::ViewVote => true,
        Action::PostComment | Action::ToggleVote => viewer.is_some(),
        Action::ClearComments | Action::UpdateStatus => viewer.is_some_and(|v| v.role.is_admin()),
    }
}
