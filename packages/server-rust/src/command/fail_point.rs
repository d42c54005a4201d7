//! Deterministic fault injection.
//!
//! A [`FailPoint`] is a named switch checked at fixed points of the dispatch
//! path. Activation state lives behind an [`ArcSwapOption`] so evaluation on
//! the hot path is a lock-free load when the point is off.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use docket_core::{from_document, Document, NamespaceString, RequestContext, Value};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::context::OperationContext;
use super::error::{CommandError, CommandResult, ErrorCode};

/// Name of the fail point consulted by the dispatcher.
pub const FAIL_COMMAND: &str = "failCommand";

/// Error message for every `failCommand` activation.
pub const FAIL_COMMAND_MESSAGE: &str = "Failing command due to 'failCommand' failpoint";

// ---------------------------------------------------------------------------
// FailPoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPointMode {
    Off,
    AlwaysOn,
    /// Fires for the next `n` matching evaluations, then turns off.
    Times(u64),
    /// Lets the first `n` matching evaluations pass, then fires every time.
    Skip(u64),
}

impl FailPointMode {
    /// Parses the `mode` field of `configureFailPoint`: `"off"`,
    /// `"alwaysOn"`, `{times: n}` or `{skip: n}`.
    ///
    /// # Errors
    ///
    /// `BadValue` for any other shape or a negative count.
    pub fn from_value(value: &Value) -> CommandResult<Self> {
        let bad = || CommandError::new(ErrorCode::BadValue, format!("invalid fail point mode: {value:?}"));
        if let Some(s) = value.as_str() {
            return match s {
                "off" => Ok(Self::Off),
                "alwaysOn" => Ok(Self::AlwaysOn),
                _ => Err(bad()),
            };
        }
        let doc = value.as_document().ok_or_else(bad)?;
        let count = |key: &str| -> CommandResult<Option<u64>> {
            doc.get(key)
                .map(|v| v.as_i64().and_then(|n| u64::try_from(n).ok()).ok_or_else(bad))
                .transpose()
        };
        match (count("times")?, count("skip")?) {
            (Some(0), None) => Ok(Self::Off),
            (Some(n), None) => Ok(Self::Times(n)),
            (None, Some(n)) => Ok(Self::Skip(n)),
            _ => Err(bad()),
        }
    }
}

struct Activation {
    mode: FailPointMode,
    data: Document,
    /// Times left to fire, or matches left to skip.
    remaining: AtomicU64,
}

/// A named fault injection switch.
pub struct FailPoint {
    name: String,
    active: ArcSwapOption<Activation>,
    times_entered: AtomicU64,
}

impl FailPoint {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: ArcSwapOption::empty(),
            times_entered: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the activation. Returns how many times the point fired
    /// before the change.
    pub fn set_mode(&self, mode: FailPointMode, data: Document) -> u64 {
        let activation = match mode {
            FailPointMode::Off => None,
            FailPointMode::AlwaysOn => Some(Activation {
                mode,
                data,
                remaining: AtomicU64::new(0),
            }),
            FailPointMode::Times(n) | FailPointMode::Skip(n) => Some(Activation {
                mode,
                data,
                remaining: AtomicU64::new(n),
            }),
        };
        self.active.store(activation.map(Arc::new));
        self.times_entered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn mode(&self) -> FailPointMode {
        self.active
            .load()
            .as_ref()
            .map_or(FailPointMode::Off, |a| a.mode)
    }

    /// Data of the current activation, if any.
    #[must_use]
    pub fn data(&self) -> Option<Document> {
        self.active.load().as_ref().map(|a| a.data.clone())
    }

    #[must_use]
    pub fn times_entered(&self) -> u64 {
        self.times_entered.load(Ordering::Relaxed)
    }

    /// Returns the activation data if the point fires now.
    ///
    /// `predicate` sees the data first; a non-matching evaluation consumes
    /// neither `times` nor `skip` counts.
    pub fn evaluate(&self, predicate: impl FnOnce(&Document) -> bool) -> Option<Document> {
        let current = self.active.load_full();
        let activation = current.as_ref()?;
        if !predicate(&activation.data) {
            return None;
        }
        match activation.mode {
            FailPointMode::Off => return None,
            FailPointMode::AlwaysOn => {}
            FailPointMode::Times(_) => {
                let prev = activation
                    .remaining
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                    .ok()?;
                if prev == 1 {
                    // Only clear our own activation; a concurrent set_mode wins.
                    let _previous = self.active.compare_and_swap(&current, None::<Arc<Activation>>);
                }
            }
            FailPointMode::Skip(_) => {
                let skipped = activation
                    .remaining
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                    .is_ok();
                if skipped {
                    return None;
                }
            }
        }
        self.times_entered.fetch_add(1, Ordering::Relaxed);
        Some(activation.data.clone())
    }
}

/// Every fail point known to the process, fixed at startup.
pub struct FailPointRegistry {
    points: BTreeMap<String, Arc<FailPoint>>,
}

impl FailPointRegistry {
    /// A registry holding the dispatcher's own fail points.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            points: BTreeMap::new(),
        };
        registry.add(FAIL_COMMAND);
        registry
    }

    /// Adds a fail point, returning the existing one if the name is taken.
    pub fn add(&mut self, name: &str) -> Arc<FailPoint> {
        self.points
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FailPoint::new(name)))
            .clone()
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<FailPoint>> {
        self.points.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.points.keys().map(String::as_str)
    }
}

impl Default for FailPointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// failCommand
// ---------------------------------------------------------------------------

/// Stage of dispatch at which `failCommand` is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailCheckpoint {
    PreParse,
    PreAuthorization,
    #[default]
    PreRun,
    PreReply,
}

/// The `data` document of the `failCommand` fail point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailCommandData {
    pub fail_commands: Vec<String>,
    pub error_code: Option<i32>,
    pub close_connection: bool,
    pub error_labels: Vec<String>,
    pub app_name: Option<String>,
    pub namespace: Option<String>,
    pub fail_internal_commands: bool,
    pub fail_at: FailCheckpoint,
}

/// Whether `data` targets this command, namespace, and client.
#[must_use]
pub fn should_activate_fail_command_fail_point(
    data: &FailCommandData,
    command_name: &str,
    ns: &NamespaceString,
    client: &RequestContext,
) -> bool {
    if command_name == "configureFailPoint" {
        return false;
    }
    if client.internal && !data.fail_internal_commands {
        return false;
    }
    if !data.fail_commands.iter().any(|c| c == command_name) {
        return false;
    }
    if data
        .app_name
        .as_deref()
        .is_some_and(|app| client.app_name.as_deref() != Some(app))
    {
        return false;
    }
    if data
        .namespace
        .as_deref()
        .is_some_and(|target| ns.to_string() != target)
    {
        return false;
    }
    true
}

/// Evaluates `failCommand` for one dispatch stage.
///
/// # Errors
///
/// The configured failure when the point fires. With `closeConnection` the
/// client session is ended as well.
pub fn check_fail_command(
    op_ctx: &OperationContext,
    command_name: &str,
    ns: &NamespaceString,
    checkpoint: FailCheckpoint,
) -> CommandResult<()> {
    let Some(point) = op_ctx.service().fail_points().find(FAIL_COMMAND) else {
        return Ok(());
    };
    let mut matched = None;
    point.evaluate(|raw| {
        let Ok(data) = from_document::<FailCommandData>(raw) else {
            return false;
        };
        let hit = data.fail_at == checkpoint
            && should_activate_fail_command_fail_point(&data, command_name, ns, op_ctx.client());
        if hit {
            matched = Some(data);
        }
        hit
    });
    let Some(data) = matched else {
        return Ok(());
    };

    if data.close_connection {
        info!(command = command_name, ?checkpoint, "failCommand closing connection");
        op_ctx.end_session();
        return Err(CommandError::new(
            ErrorCode::FailPointEnabled,
            FAIL_COMMAND_MESSAGE,
        ));
    }
    if let Some(code) = data.error_code {
        info!(command = command_name, code, ?checkpoint, "failCommand failing command");
        let mut err = CommandError::new(
            ErrorCode::from_code(code),
            FAIL_COMMAND_MESSAGE,
        );
        for label in data.error_labels {
            err = err.with_label(label);
        }
        return Err(err);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
