pub mod coach_agent;

pub use coach_agent::{AgentError, CoachAgent, CoachAgentArguments, CoachAgentMsg};
