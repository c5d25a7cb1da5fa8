//! Plain JSON serialization — `WorkflowResult` already derives `Serialize`,
//! so this is a thin pretty-printer rather than a second mapping layer.

use super::parse_err;
use crate::error::Result;
use crate::model::WorkflowResult;

pub fn render(result: &WorkflowResult) -> Result<String> {
    serde_json::to_string_pretty(result).map_err(parse_err)
}
