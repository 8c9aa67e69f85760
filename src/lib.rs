pub mod action;
pub mod agent;
pub mod browser;
pub mod dom;
pub mod error;
pub mod executor;
pub mod gemini;
pub mod planner;
pub mod scraper;
pub mod simplify;
pub mod store;

pub use action::{Action, Locator, Outcome, ScrollDirection};
pub use agent::{Agent, AgentConfig, AgentState, Computer, Goal, Reasoner, RunReport, TerminationReason};
pub use browser::{Browser, BrowserConfig, ChromiumComputer};
pub use gemini::{GeminiClient, GeminiConfig};
pub use store::{JsonFileSink, NullSink, ResultSink, ResultStore, StepRecord};
