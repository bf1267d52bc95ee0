pub mod client;
pub mod errors;
pub mod json;
pub mod poll;
pub mod session;
pub mod types;

pub use client::EngineGateway;
pub use errors::{EngineError, EngineResult};
pub use json::{decode_json_value, decode_list, parse_optional_json, value_as_text};
pub use poll::{poll_until, PollSpec};
pub use session::{EngineSession, CSRF_HEADER};
pub use types::{CaseInfo, CaseVariable, Contract, FlowNode, HumanTask, TaskOutcome};
