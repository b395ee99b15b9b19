//! Record lifecycle outside the trial loop: create-or-resume and operator
//! edits from the resume screen.

use pairlab_core::{validate_config, ConfigError, SessionConfig, SessionState};
use pairlab_store::SessionStore;
use tracing::info;

use crate::EngineError;

/// Opens the record behind the config's derived uid, creating and
/// persisting a fresh one when none exists. Returns whether an existing
/// record was resumed.
///
/// No validation happens here: the launcher validates operator input, and
/// hand-edited documents are accepted as long as they parse.
pub fn new_or_resume(
    store: &SessionStore,
    config: SessionConfig,
) -> Result<(SessionState, bool), EngineError> {
    let uid = config.uid();
    if let Some(existing) = store.load(&uid)? {
        info!(
            uid = %existing.uid,
            session = existing.progress.session_index,
            completed = existing.progress.completed_trios,
            "resuming existing record"
        );
        return Ok((existing, true));
    }
    let mut state = SessionState::new(config);
    store.save(&mut state)?;
    info!(uid = %state.uid, "created a fresh record");
    Ok((state, false))
}

/// One operator edit. Participants are addressed by physical side;
/// leadership is a flag on the left seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub left_side: String,
    pub right_side: String,
    pub left_is_leader: bool,
    pub stimulus_profile: String,
    /// 1-based session to resume into; must stay within the record's
    /// sessions_total.
    pub session_index: u32,
    /// 1-based trial to run next; out-of-range values clamp to the
    /// session's trial range.
    pub next_trial: u32,
}

/// Applies an operator edit to a resumed record.
///
/// Everything is checked before any durable state moves, so a rejected
/// edit leaves the stored document untouched. When the edit changes the
/// derived uid, the old document is dropped so the record does not fork.
/// Deck contents survive the edit; only a session roll reshuffles them.
pub fn apply_edit(
    store: &SessionStore,
    mut state: SessionState,
    edit: EditRequest,
) -> Result<SessionState, EngineError> {
    let (leader, follower) = if edit.left_is_leader {
        (edit.left_side.clone(), edit.right_side.clone())
    } else {
        (edit.right_side.clone(), edit.left_side.clone())
    };
    let mut config = state.config.clone();
    config.leader = leader;
    config.follower = follower;
    config.left_side = edit.left_side;
    config.right_side = edit.right_side;
    config.stimulus_profile = edit.stimulus_profile;
    validate_config(&config)?;
    if edit.session_index < 1 || edit.session_index > config.sessions_total {
        return Err(ConfigError::SessionIndexOutOfRange {
            got: edit.session_index,
            max: config.sessions_total,
        }
        .into());
    }

    state.config = config;
    state.progress.set_next_trial(edit.session_index, edit.next_trial);
    if let Some(old_uid) = state.refresh_uid() {
        info!(%old_uid, new_uid = %state.uid, "edit renamed the record");
        store.remove_document(&old_uid)?;
    }
    store.save(&mut state)?;
    Ok(state)
}
