//! Observable service events
//!
//! Events are explicit and typed; each carries its own severity.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    ServiceStart,
    ConfigLoaded,
    /// Listener bound, ready for requests
    Serving,
    ServeFailed,

    // Ruleset
    RulesetCompiled,
    RulesetCompileFailed,

    // Facts
    FactsLoaded,
    FactsRejected,
    /// The least recently loaded session was dropped to admit a new one
    SessionEvicted,

    // Queries
    QueryEvaluated,
    QueryRejected,

    // Requests
    EvalCancelled,
    KillSwitchRefused,
    /// An internal fault while serving a request
    RequestFailed,
}

impl Event {
    pub const ALL: [Event; 14] = [
        Event::ServiceStart,
        Event::ConfigLoaded,
        Event::Serving,
        Event::ServeFailed,
        Event::RulesetCompiled,
        Event::RulesetCompileFailed,
        Event::FactsLoaded,
        Event::FactsRejected,
        Event::SessionEvicted,
        Event::QueryEvaluated,
        Event::QueryRejected,
        Event::EvalCancelled,
        Event::KillSwitchRefused,
        Event::RequestFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ServiceStart => "RULESBRAIN_STARTUP_BEGIN",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::Serving => "RULESBRAIN_SERVING",
            Event::ServeFailed => "RULESBRAIN_SERVE_FAILED",
            Event::RulesetCompiled => "RULESET_COMPILED",
            Event::RulesetCompileFailed => "RULESET_COMPILE_FAILED",
            Event::FactsLoaded => "FACTS_LOADED",
            Event::FactsRejected => "FACTS_REJECTED",
            Event::SessionEvicted => "SESSION_EVICTED",
            Event::QueryEvaluated => "QUERY_EVALUATED",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::EvalCancelled => "EVAL_CANCELLED",
            Event::KillSwitchRefused => "KILL_SWITCH_REFUSED",
            Event::RequestFailed => "REQUEST_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Event::ServeFailed => Severity::Fatal,
            Event::RulesetCompileFailed | Event::RequestFailed => Severity::Error,
            Event::FactsRejected
            | Event::QueryRejected
            | Event::EvalCancelled
            | Event::KillSwitchRefused => Severity::Warn,
            Event::QueryEvaluated => Severity::Trace,
            _ => Severity::Info,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
