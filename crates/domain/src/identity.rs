/// Caller of a support operation, resolved once by the transport layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupportActor {
    Customer { username: String },
    Guest { token: Option<String> },
    Agent { username: String },
}

impl SupportActor {
    pub fn customer(username: impl Into<String>) -> Self {
        Self::Customer {
            username: username.into(),
        }
    }

    pub fn guest(token: Option<String>) -> Self {
        Self::Guest { token }
    }

    pub fn agent(username: impl Into<String>) -> Self {
        Self::Agent {
            username: username.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Customer { .. } => "customer",
            Self::Guest { .. } => "guest",
            Self::Agent { .. } => "agent",
        }
    }
}
