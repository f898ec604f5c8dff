//! Component C: the LLM-callable action catalog and its local validation.
//!
//! The catalog never touches the browser itself for element-bound actions;
//! it only validates shape and hands the result to the Action Loop's
//! dispatcher (§4.C). `extract` is the one exception — it resolves via a
//! second, single-shot `LlmProvider` call over the page's rendered content,
//! not via the browser.

use serde_json::Value;
use url::Url;

use crate::browser::BrowserAction;
use webloop_core_types::ElementRef;

/// The result handed back to the Action Loop after a tool call resolves,
/// whether or not the browser was ever reached (§4.C).
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub success: bool,
    pub action: String,
    pub ref_: Option<String>,
    pub value: Option<String>,
    pub error: Option<String>,
    pub is_recoverable: bool,
    pub is_terminal: bool,
    pub result: Option<String>,
    pub reason: Option<String>,
    pub extracted_data: Option<String>,
}

impl ToolResult {
    pub fn validation_failure(action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: action.into(),
            error: Some(error.into()),
            is_recoverable: true,
            ..Default::default()
        }
    }

    pub fn done(result: impl Into<String>) -> Self {
        Self {
            success: true,
            action: "done".to_string(),
            is_terminal: true,
            result: Some(result.into()),
            ..Default::default()
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            action: "abort".to_string(),
            is_terminal: true,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// One resolved tool call: the browser action to dispatch (if any) plus
/// its validated arguments. `done`/`abort` carry no browser action.
#[derive(Debug, Clone)]
pub struct ValidatedCall {
    pub browser_action: Option<BrowserAction>,
    pub ref_: Option<ElementRef>,
    pub value: Option<String>,
}

/// Validate a raw tool-call payload against the catalog's local rules
/// (§4.C). Returns `Err(ToolResult)` with `success:false, is_recoverable:true`
/// the moment a shape/value rule is violated, without ever consulting the
/// browser.
pub fn validate_call(tool_name: &str, input: &Value) -> Result<ValidatedCall, ToolResult> {
    let get_str = |key: &str| -> Option<String> {
        input.get(key).and_then(Value::as_str).map(str::to_string)
    };

    let require_ref = || -> Result<ElementRef, ToolResult> {
        get_str("ref")
            .map(ElementRef)
            .ok_or_else(|| ToolResult::validation_failure(tool_name, "missing required field 'ref'"))
    };

    let require_value = || -> Result<String, ToolResult> {
        get_str("value")
            .ok_or_else(|| ToolResult::validation_failure(tool_name, "missing required field 'value'"))
    };

    match tool_name {
        "click" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Click),
            ref_: Some(require_ref()?),
            value: None,
        }),
        "hover" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Hover),
            ref_: Some(require_ref()?),
            value: None,
        }),
        "fill" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Fill),
            ref_: Some(require_ref()?),
            value: Some(require_value()?),
        }),
        "fill_and_enter" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::FillAndEnter),
            ref_: Some(require_ref()?),
            value: Some(require_value()?),
        }),
        "focus" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Focus),
            ref_: Some(require_ref()?),
            value: None,
        }),
        "check" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Check),
            ref_: Some(require_ref()?),
            value: None,
        }),
        "uncheck" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Uncheck),
            ref_: Some(require_ref()?),
            value: None,
        }),
        "select" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Select),
            ref_: Some(require_ref()?),
            value: Some(require_value()?),
        }),
        "enter" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Enter),
            ref_: Some(require_ref()?),
            value: None,
        }),
        "wait" => {
            let seconds = input.get("seconds").and_then(Value::as_u64).ok_or_else(|| {
                ToolResult::validation_failure(tool_name, "missing required integer field 'seconds'")
            })?;
            if seconds > 30 {
                return Err(ToolResult::validation_failure(
                    tool_name,
                    "seconds must be within [0, 30]",
                ));
            }
            Ok(ValidatedCall {
                browser_action: Some(BrowserAction::Wait),
                ref_: None,
                value: Some(seconds.to_string()),
            })
        }
        "goto" => {
            let url = get_str("url").ok_or_else(|| {
                ToolResult::validation_failure(tool_name, "missing required field 'url'")
            })?;
            Url::parse(&url)
                .map_err(|_| ToolResult::validation_failure(tool_name, "url is not syntactically valid"))?;
            Ok(ValidatedCall {
                browser_action: Some(BrowserAction::Goto),
                ref_: None,
                value: Some(url),
            })
        }
        "back" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Back),
            ref_: None,
            value: None,
        }),
        "forward" => Ok(ValidatedCall {
            browser_action: Some(BrowserAction::Forward),
            ref_: None,
            value: None,
        }),
        "extract" => {
            get_str("description").ok_or_else(|| {
                ToolResult::validation_failure(tool_name, "missing required field 'description'")
            })?;
            Ok(ValidatedCall {
                browser_action: Some(BrowserAction::Extract),
                ref_: None,
                value: None,
            })
        }
        "done" => {
            get_str("result").ok_or_else(|| {
                ToolResult::validation_failure(tool_name, "missing required field 'result'")
            })?;
            Ok(ValidatedCall {
                browser_action: Some(BrowserAction::Done),
                ref_: None,
                value: None,
            })
        }
        "abort" => {
            get_str("description").ok_or_else(|| {
                ToolResult::validation_failure(tool_name, "missing required field 'description'")
            })?;
            Ok(ValidatedCall {
                browser_action: Some(BrowserAction::Abort),
                ref_: None,
                value: None,
            })
        }
        "web_search" => {
            let query = get_str("query").ok_or_else(|| {
                ToolResult::validation_failure(tool_name, "missing required field 'query'")
            })?;
            Ok(ValidatedCall {
                browser_action: None,
                ref_: None,
                value: Some(query),
            })
        }
        other => Err(ToolResult::validation_failure(
            other,
            format!("unknown tool '{other}'"),
        )),
    }
}
