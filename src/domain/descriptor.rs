//! Plugin descriptor domain model
//!
//! A descriptor is the resolved, validated configuration of one plugin.
//! It is built once at load time and never mutated afterwards.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backup stage a hook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Runs before the backup (e.g. quiesce a database)
    Pre,
    /// Runs after the backup (e.g. thaw a database)
    Post,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pre => "pre",
            Phase::Post => "post",
        }
    }

    /// Label used in log lines ("Prescript", "Postscript")
    pub fn script_label(&self) -> &'static str {
        match self {
            Phase::Pre => "Prescript",
            Phase::Post => "Postscript",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Phase::Pre => 0,
            Phase::Post => 1,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pre" => Ok(Phase::Pre),
            "post" => Ok(Phase::Post),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// A single script argument as written in configuration
///
/// Every variant becomes exactly one argv token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptParam {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ScriptParam {
    pub fn to_token(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ScriptParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptParam::Bool(b) => write!(f, "{}", b),
            ScriptParam::Integer(i) => write!(f, "{}", i),
            ScriptParam::Float(x) => write!(f, "{}", x),
            ScriptParam::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ScriptParam {
    fn from(s: &str) -> Self {
        ScriptParam::Text(s.to_string())
    }
}

impl From<String> for ScriptParam {
    fn from(s: String) -> Self {
        ScriptParam::Text(s)
    }
}

impl From<i64> for ScriptParam {
    fn from(i: i64) -> Self {
        ScriptParam::Integer(i)
    }
}

/// Script, arguments and retry bound for one phase of a plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseScript {
    pub path: PathBuf,
    pub params: Vec<ScriptParam>,
    /// Additional attempts after the first failed one
    pub max_retries: u32,
}

impl PhaseScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
            max_retries: 0,
        }
    }

    pub fn with_params<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ScriptParam>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Immutable configuration of one plugin for the lifetime of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDescriptor {
    /// Identity, unique within a run
    pub name: String,

    /// Registry lookup key selecting the implementation
    pub kind: String,

    pub pre: PhaseScript,
    pub post: PhaseScript,

    /// Wall-clock budget for one invocation, shared by all its retries
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Whether a failure of this plugin still lets the backup proceed
    pub continue_on_failure: bool,

    /// Program prepended to the script path (`["sh"]` by default)
    pub interpreter: Vec<String>,
}

impl PluginDescriptor {
    /// Creates a script descriptor with default policy
    ///
    /// Defaults: 10 minute timeout, no retries, `continue_on_failure = true`,
    /// scripts run through `sh`.
    pub fn new(
        name: impl Into<String>,
        pre_script: impl Into<PathBuf>,
        post_script: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: super::DEFAULT_PLUGIN_KIND.to_string(),
            pre: PhaseScript::new(pre_script),
            post: PhaseScript::new(post_script),
            timeout: Duration::from_secs(10 * 60),
            continue_on_failure: true,
            interpreter: vec!["sh".to_string()],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }

    pub fn with_interpreter<I, S>(mut self, interpreter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreter = interpreter.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_pre(mut self, pre: PhaseScript) -> Self {
        self.pre = pre;
        self
    }

    pub fn with_post(mut self, post: PhaseScript) -> Self {
        self.post = post;
        self
    }

    /// Returns the script configuration for a phase
    pub fn script(&self, phase: Phase) -> &PhaseScript {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Post => &self.post,
        }
    }

    /// Builds the argv for a phase: interpreter, script path, then parameters
    ///
    /// Arguments stay discrete tokens; nothing is joined into a shell string.
    pub fn command_line(&self, phase: Phase) -> Vec<String> {
        let script = self.script(phase);
        let mut argv = self.interpreter.clone();
        argv.push(script.path.to_string_lossy().into_owned());
        argv.extend(script.params.iter().map(ScriptParam::to_token));
        argv
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_keeps_params_discrete() {
        let descriptor = PluginDescriptor::new("db", "/hooks/pre.sh", "/hooks/post.sh").with_pre(
            PhaseScript::new("/hooks/pre.sh").with_params(["a b", "$(rm -rf /)"]),
        );

        assert_eq!(
            descriptor.command_line(Phase::Pre),
            vec!["sh", "/hooks/pre.sh", "a b", "$(rm -rf /)"]
        );
    }

    #[test]
    fn command_line_without_interpreter() {
        let descriptor = PluginDescriptor::new("db", "/hooks/pre.sh", "/hooks/post.sh")
            .with_interpreter(Vec::<String>::new());

        assert_eq!(descriptor.command_line(Phase::Post), vec!["/hooks/post.sh"]);
    }

    #[test]
    fn params_coerce_to_tokens() {
        let params: Vec<ScriptParam> = serde_json::from_str(r#"["x", 3, 2.5, true]"#).unwrap();
        let tokens: Vec<String> = params.iter().map(ScriptParam::to_token).collect();

        assert_eq!(tokens, vec!["x", "3", "2.5", "true"]);
    }

    #[test]
    fn phase_from_str() {
        assert_eq!("PRE".parse::<Phase>().unwrap(), Phase::Pre);
        assert_eq!("post".parse::<Phase>().unwrap(), Phase::Post);
        assert!("during".parse::<Phase>().is_err());
    }

    #[test]
    fn defaults() {
        let descriptor = PluginDescriptor::new("db", "pre.sh", "post.sh");

        assert_eq!(descriptor.kind, "script");
        assert_eq!(descriptor.timeout, Duration::from_secs(600));
        assert!(descriptor.continue_on_failure);
        assert_eq!(descriptor.pre.max_retries, 0);
    }
}
