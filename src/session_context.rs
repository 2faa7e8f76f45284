/// Identity stamped onto every entry a logger produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub agent_id: String,
    pub user_id: String,
}

pub const UNKNOWN: &str = "unknown";

impl SessionContext {
    pub fn new(user_id: &str) -> Self {
        SessionContext {
            session_id: String::new(),
            agent_id: UNKNOWN.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn with_session(mut self, session_id: &str, agent_id: Option<&str>) -> Self {
        self.set_session(session_id, agent_id);
        self
    }

    pub fn set_session(&mut self, session_id: &str, agent_id: Option<&str>) {
        self.session_id = session_id.to_string();
        self.agent_id = agent_id.unwrap_or(UNKNOWN).to_string();
    }

    /// Session id as written to entries; never empty.
    pub fn effective_session_id(&self) -> &str {
        if self.session_id.is_empty() {
            UNKNOWN
        } else {
            &self.session_id
        }
    }
}
