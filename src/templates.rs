//! Predefined prompt templates.
//!
//! Factory functions building a [`PromptHandler`] for common device families,
//! pre-configured with their prompts, pager markers, error messages and the
//! interactive questions asked during login.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::{InputAnswer, PromptHandler};
use crate::error::ConnectError;

/// Built-in template names supported by this crate.
pub const BUILTIN_TEMPLATES: &[&str] = &["cisco", "huawei", "h3c", "juniper", "linux", "generic"];

/// Template used when the session configuration names none.
pub const DEFAULT_TEMPLATE: &str = "generic";

/// Key in [`PromptHandler::dyn_param`] holding the login password answer.
pub const PASSWORD_PARAM: &str = "Password";

/// Metadata for a built-in template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    pub name: String,
    pub vendor: String,
    pub family: String,
    /// Command disabling output paging, sent once after login.
    pub paging_command: Option<String>,
}

fn metadata_for(name: &str) -> Option<TemplateMetadata> {
    let (vendor, family, paging) = match name {
        "cisco" => ("Cisco", "IOS/IOS-XE/NX-OS", Some("terminal length 0")),
        "huawei" => ("Huawei", "VRP", Some("screen-length 0 temporary")),
        "h3c" => ("H3C", "Comware", Some("screen-length disable")),
        "juniper" => ("Juniper", "JunOS", Some("set cli screen-length 0")),
        "linux" => ("Generic", "Linux/Unix shell", None),
        "generic" => ("Generic", "Any CLI", None),
        _ => return None,
    };
    Some(TemplateMetadata {
        name: name.to_string(),
        vendor: vendor.to_string(),
        family: family.to_string(),
        paging_command: paging.map(str::to_string),
    })
}

/// Returns the names of all built-in templates.
pub fn available_templates() -> &'static [&'static str] {
    BUILTIN_TEMPLATES
}

/// Returns metadata for one template by name (case-insensitive).
pub fn template_metadata(name: &str) -> Result<TemplateMetadata, ConnectError> {
    metadata_for(&name.to_ascii_lowercase())
        .ok_or_else(|| ConnectError::TemplateNotFound(name.to_string()))
}

/// Creates a built-in template by name (case-insensitive).
pub fn by_name(name: &str) -> Result<PromptHandler, ConnectError> {
    match name.to_ascii_lowercase().as_str() {
        "cisco" => cisco(),
        "huawei" => huawei(),
        "h3c" => h3c(),
        "juniper" => juniper(),
        "linux" => linux(),
        "generic" => generic(),
        _ => Err(ConnectError::TemplateNotFound(name.to_string())),
    }
}

/// Questions asked while logging in, shared by all templates.
///
/// The password is only typed when the session stores one under
/// [`PASSWORD_PARAM`], which happens when hopping through a jump host.
fn login_inputs() -> Vec<(String, InputAnswer, Vec<&'static str>)> {
    vec![
        (
            "Password".to_string(),
            InputAnswer::param(PASSWORD_PARAM),
            vec![r"(?i)password:\s*$"],
        ),
        (
            "HostKey".to_string(),
            InputAnswer::text("yes\n"),
            vec![r"\(yes/no(/\[fingerprint\])?\)\?\s*$"],
        ),
    ]
}

/// Returns a `PromptHandler` for Cisco IOS/IOS-XE/NX-OS devices.
pub fn cisco() -> Result<PromptHandler, ConnectError> {
    PromptHandler::new(
        vec![
            ("Config".to_string(), vec![r"^\S+\(\S+\)#\s*$"]),
            ("Enable".to_string(), vec![r"^[^\s#]+#\s*$"]),
            ("Login".to_string(), vec![r"^[^\s<]+>\s*$"]),
        ],
        login_inputs(),
        vec![r"\s*<--- More --->\s*", r"^\s*--More--\s*$"],
        vec![
            r"% Invalid command at '\^' marker\.",
            r"% Invalid input detected at '\^' marker\.",
            r"^% Incomplete command\.",
            r"^% Ambiguous command:.*",
            r"^Command authorization failed.*",
            r"^Command rejected:.*",
        ],
        vec![],
    )
}

/// Returns a `PromptHandler` for Huawei VRP devices.
pub fn huawei() -> Result<PromptHandler, ConnectError> {
    PromptHandler::new(
        vec![
            ("Config".to_string(), vec![r"^(HRP_M|HRP_S){0,1}\[.+]+\s*$"]),
            ("Enable".to_string(), vec![r"^(RBM_P|RBM_S)?<.+>\s*$"]),
        ],
        login_inputs(),
        vec![r"\s*---- More ----\s*"],
        vec![r"Error: .+$", r"^\s+\^$"],
        vec![],
    )
}

/// Returns a `PromptHandler` for H3C Comware devices.
pub fn h3c() -> Result<PromptHandler, ConnectError> {
    PromptHandler::new(
        vec![
            ("Config".to_string(), vec![r"^(RBM_P|RBM_S)?\[.+\]\s*$"]),
            ("Enable".to_string(), vec![r"^(RBM_P|RBM_S)?<.+>\s*$"]),
        ],
        login_inputs(),
        vec![r"\s*---- More ----\s*"],
        vec![r"^\s*% (Unrecognized|Incomplete|Too many parameters).*"],
        vec![],
    )
}

/// Returns a `PromptHandler` for Juniper JunOS devices.
pub fn juniper() -> Result<PromptHandler, ConnectError> {
    PromptHandler::new(
        vec![
            ("Config".to_string(), vec![r"^\S+@\S+#\s*$"]),
            ("Enable".to_string(), vec![r"^\S+@\S+>\s*$"]),
        ],
        login_inputs(),
        vec![r"---\(more.*\)---"],
        vec![r".*unknown command.*", r"syntax error.*", r"^error:.+"],
        vec![r"warning: statement not found"],
    )
}

/// Returns a `PromptHandler` for Linux/Unix shells, used for jump hosts.
pub fn linux() -> Result<PromptHandler, ConnectError> {
    PromptHandler::new(
        vec![
            ("Root".to_string(), vec![r"^[^\r\n]*#\s*$"]),
            ("User".to_string(), vec![r"^[^\r\n]*[$>%]\s*$"]),
        ],
        login_inputs(),
        vec![r"^--More--\s*$"],
        vec![r".*: command not found$", r".*: No such file or directory$"],
        vec![],
    )
}

/// Returns a permissive `PromptHandler` matching `name#`, `name>`, `<name>` and `[name]` prompts.
pub fn generic() -> Result<PromptHandler, ConnectError> {
    PromptHandler::new(
        vec![
            ("Config".to_string(), vec![r"^\S+\(\S+\)#\s*$", r"^\[\S+\]\s*$"]),
            ("Enable".to_string(), vec![r"^[^\s#]+#\s*$", r"^<\S+>\s*$"]),
            ("Login".to_string(), vec![r"^[^\s>]+[>$%]\s*$"]),
        ],
        login_inputs(),
        vec![
            r"^\s*--More--\s*$",
            r"\s*<--- More --->\s*",
            r"\s*---- More ----\s*",
            r"---\(more.*\)---",
        ],
        vec![
            r"^% Invalid input detected at '\^' marker\.",
            r"^Error: .+$",
            r"^error: .+$",
        ],
        vec![],
    )
}
