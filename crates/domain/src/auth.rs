use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    Customer,
    SupportAgent,
    SalesManager,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anonymous" | "guest" => Some(Role::Anonymous),
            "customer" | "user" => Some(Role::Customer),
            "support_agent" | "support" | "agent" => Some(Role::SupportAgent),
            "sales_manager" => Some(Role::SalesManager),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::Customer => "customer",
            Role::SupportAgent => "support_agent",
            Role::SalesManager => "sales_manager",
            Role::Admin => "admin",
        }
    }

    pub fn can_handle_support(&self) -> bool {
        matches!(self, Role::SupportAgent | Role::Admin)
    }
}
