//! Agent routing: the pipeline's single branch point.

use crate::domain::conversation::{AgentKind, ConversationState, Intent};

/// Picks the responder for this turn.
///
/// The current agent is sticky until a forced re-route is requested; otherwise
/// the classified intent decides. Deterministic and free of I/O.
pub fn route(state: &ConversationState) -> AgentKind {
    match state.current_agent {
        Some(agent) if !state.force_reroute => agent,
        _ => agent_for_intent(state.intent()),
    }
}

pub fn agent_for_intent(intent: Intent) -> AgentKind {
    match intent {
        Intent::Sales => AgentKind::Sales,
        Intent::Support => AgentKind::Support,
    }
}

#[cfg(test)]
mod tests {
    use super::route;
    use crate::domain::conversation::{AgentKind, ConversationState, Intent, ThreadKey};

    fn state_with(intent: Intent, current: Option<AgentKind>, force: bool) -> ConversationState {
        let mut state = ConversationState::new(ThreadKey("user_1".to_owned()), None);
        state.set_intent(intent);
        state.current_agent = current;
        state.force_reroute = force;
        state
    }

    #[test]
    fn fresh_thread_follows_intent() {
        assert_eq!(route(&state_with(Intent::Sales, None, false)), AgentKind::Sales);
        assert_eq!(route(&state_with(Intent::Support, None, false)), AgentKind::Support);
    }

    #[test]
    fn sticky_agent_wins_over_any_intent() {
        for intent in [Intent::Sales, Intent::Support] {
            assert_eq!(
                route(&state_with(intent, Some(AgentKind::Support), false)),
                AgentKind::Support
            );
        }
    }

    #[test]
    fn forced_reroute_falls_back_to_intent() {
        let state = state_with(Intent::Sales, Some(AgentKind::Support), true);
        assert_eq!(route(&state), AgentKind::Sales);
    }

    #[test]
    fn unclassified_thread_routes_to_support() {
        let state = ConversationState::new(ThreadKey("user_2".to_owned()), None);
        assert_eq!(route(&state), AgentKind::Support);
    }
}
