//! Role-specialized runners.
//!
//! Every runner composes an [`AgentRunner`](crate::agent::AgentRunner) with
//! a role-specific system prompt and turns its domain input (a plan, a diff,
//! a research query, …) into a [`Task`](crate::agent::Task) with one user
//! message. None of them re-implement the loop.

pub mod artist;
pub mod coder;
pub mod lead;
pub mod pm;
pub mod prompts;
pub mod researcher;
pub mod reviewer;

pub use artist::ArtistRunner;
pub use coder::CoderRunner;
pub use lead::LeadRunner;
pub use pm::PmRunner;
pub use researcher::ResearcherRunner;
pub use reviewer::ReviewerRunner;

use serde::{Deserialize, Serialize};

/// The six agent roles the runtime coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Product manager: classifies requests, plans, coordinates.
    Pm,
    /// Implements plans against the repository.
    Coder,
    /// Reviews diffs and raises issues.
    Reviewer,
    /// Investigates questions against code and docs.
    Researcher,
    /// Proposes UX and interface design.
    Artist,
    /// Runs retrospectives and synthesis.
    Lead,
}

impl Role {
    /// All roles, in scheduling order.
    pub const ALL: [Self; 6] = [
        Self::Pm,
        Self::Coder,
        Self::Reviewer,
        Self::Researcher,
        Self::Artist,
        Self::Lead,
    ];

    /// Lowercase identifier used in conversation paths and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pm => "pm",
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
            Self::Researcher => "researcher",
            Self::Artist => "artist",
            Self::Lead => "lead",
        }
    }

    /// Who a stuck agent escalates to: the coder hands off to the PM, the
    /// PM and lead go to the user, everyone else goes to the PM.
    #[must_use]
    pub const fn escalation_target(&self) -> EscalationTarget {
        match self {
            Self::Pm | Self::Lead => EscalationTarget::User,
            _ => EscalationTarget::Pm,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pm" => Ok(Self::Pm),
            "coder" => Ok(Self::Coder),
            "reviewer" => Ok(Self::Reviewer),
            "researcher" => Ok(Self::Researcher),
            "artist" => Ok(Self::Artist),
            "lead" => Ok(Self::Lead),
            other => Err(crate::error::Error::validation(format!(
                "unknown role '{other}'"
            ))),
        }
    }
}

/// Where an escalation message is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationTarget {
    /// Route to the product manager agent.
    Pm,
    /// Route to the human user.
    User,
}

impl EscalationTarget {
    /// Salutation used at the top of the escalation message.
    #[must_use]
    pub const fn salutation(&self) -> &'static str {
        match self {
            Self::Pm => "PM",
            Self::User => "user",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn escalation_routing() {
        assert_eq!(Role::Coder.escalation_target(), EscalationTarget::Pm);
        assert_eq!(Role::Researcher.escalation_target(), EscalationTarget::Pm);
        assert_eq!(Role::Pm.escalation_target(), EscalationTarget::User);
        assert_eq!(Role::Lead.escalation_target(), EscalationTarget::User);
    }

    #[test]
    fn parse_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
        assert!(Role::from_str("intern").is_err());
    }
}
