//! Maps rule decisions to milter replies

use crate::milter::codec::action;
use crate::milter::Response;
use crate::rules::Decision;
use mailsift_common::types::{FilterAction, FilterStage};

/// Replies for a decision taken at `stage`
///
/// Quarantine needs the end of body and the negotiated quarantine action;
/// anywhere else the message is rejected instead.
pub fn map(decision: &Decision, stage: FilterStage, negotiated_actions: u32) -> Vec<Response> {
    let Some(action) = decision.action else {
        return vec![Response::Continue];
    };

    match action {
        FilterAction::Accept => vec![Response::Accept],
        FilterAction::Reject | FilterAction::Trash => vec![Response::Reject],
        FilterAction::Defer => vec![Response::TempFail],
        FilterAction::Discard => vec![Response::Discard],
        FilterAction::Quarantine => {
            if stage == FilterStage::Data && negotiated_actions & action::QUARANTINE != 0 {
                let reason = match decision.rule_id {
                    Some(id) => format!("rule {}", id),
                    None => "quarantined".to_string(),
                };
                vec![Response::Quarantine(reason), Response::Accept]
            } else {
                vec![Response::Reject]
            }
        }
    }
}
