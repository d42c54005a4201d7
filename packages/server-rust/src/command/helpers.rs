//! Stateless helpers shared by the dispatch path and command implementations:
//! namespace parsing from a command body, reply status shaping, and request
//! filtering for forwarding to another node.

use docket_core::namespace::{CONFIG_DB, LOCAL_DB};
use docket_core::request::is_generic_argument;
use docket_core::{
    Document, NamespaceOrUuid, NamespaceString, OpMsgRequest, Value, WriteConcernOptions,
};
use uuid::Uuid;

use super::error::{CommandError, CommandResult, ErrorCode};

// ---------------------------------------------------------------------------
// Namespace parsing
// ---------------------------------------------------------------------------

fn first_element(body: &Document) -> CommandResult<(&str, &Value)> {
    body.first()
        .ok_or_else(|| CommandError::failed_to_parse("empty command body"))
}

/// `ns` is the namespace as the client spelled it, so an empty collection
/// still shows its trailing dot.
fn invalid_namespace(ns: &str) -> CommandError {
    CommandError::new(
        ErrorCode::InvalidNamespace,
        format!("Invalid namespace specified '{ns}'"),
    )
}

/// The first field holds a full `db.coll` namespace (e.g. `renameCollection`).
///
/// # Errors
///
/// `BadValue` if the field is not a string, `InvalidNamespace` if the
/// namespace is not valid and fully qualified.
pub fn parse_ns_fully_qualified(body: &Document) -> CommandResult<NamespaceString> {
    let (_, value) = first_element(body)?;
    let Some(ns) = value.as_str() else {
        return Err(CommandError::new(
            ErrorCode::BadValue,
            format!("collection name has invalid type {}", value.type_name()),
        ));
    };
    let parsed = NamespaceString::parse(ns);
    if !parsed.has_collection() || parsed.validate().is_err() {
        return Err(invalid_namespace(ns));
    }
    Ok(parsed)
}

/// The first field holds a collection name in `db`.
///
/// # Errors
///
/// `InvalidNamespace` if the field is not a non-empty string or the
/// resulting namespace is invalid.
pub fn parse_ns_collection_required(db: &str, body: &Document) -> CommandResult<NamespaceString> {
    let (_, value) = first_element(body)?;
    let Some(coll) = value.as_str() else {
        return Err(CommandError::new(
            ErrorCode::InvalidNamespace,
            format!("collection name has invalid type {}", value.type_name()),
        ));
    };
    let ns = NamespaceString::new(db, coll);
    if coll.is_empty() || ns.validate().is_err() {
        return Err(invalid_namespace(&format!("{db}.{coll}")));
    }
    Ok(ns)
}

/// The first field holds either a collection name or a 16-byte collection UUID.
///
/// # Errors
///
/// `InvalidNamespace` for a malformed name; `BadValue` for binary data that
/// is not a UUID.
pub fn parse_ns_or_uuid(db: &str, body: &Document) -> CommandResult<NamespaceOrUuid> {
    let (_, value) = first_element(body)?;
    if let Value::Bytes(raw) = value {
        let uuid = Uuid::from_slice(raw).map_err(|e| {
            CommandError::new(ErrorCode::BadValue, format!("invalid collection UUID: {e}"))
        })?;
        return Ok(NamespaceOrUuid::Uuid {
            db: db.to_string(),
            uuid,
        });
    }
    parse_ns_collection_required(db, body).map(NamespaceOrUuid::Namespace)
}

/// `db.coll` when the first field is a non-empty string, else just `db`.
#[must_use]
pub fn parse_ns_from_command(db: &str, body: &Document) -> NamespaceString {
    match body.first() {
        Some((_, Value::String(coll))) if !coll.is_empty() => NamespaceString::new(db, coll.as_str()),
        _ => NamespaceString::db_only(db),
    }
}

// ---------------------------------------------------------------------------
// Reply status
// ---------------------------------------------------------------------------

/// Appends `ok` (unless present) and, for a failure, a non-empty `errmsg`
/// (unless present).
pub fn append_simple_command_status(result: &mut Document, ok: bool, errmsg: Option<&str>) {
    if !result.contains_key("ok") {
        result.append("ok", if ok { 1.0 } else { 0.0 });
    }
    if !ok {
        if let Some(msg) = errmsg.filter(|m| !m.is_empty()) {
            if !result.contains_key("errmsg") {
                result.append("errmsg", msg);
            }
        }
    }
}

/// Appends `status` to `result` as `ok: 1` or a failure reply. Returns
/// whether the status was success.
pub fn append_command_status_no_throw(result: &mut Document, status: &CommandResult<()>) -> bool {
    match status {
        Ok(()) => {
            append_simple_command_status(result, true, None);
            true
        }
        Err(e) => {
            append_error_reply(result, e);
            false
        }
    }
}

/// Writes the standard failure fields: `ok: 0`, `errmsg`, `code`,
/// `codeName`, `errorLabels` (when any), then detail fields not already set.
pub fn append_error_reply(result: &mut Document, error: &CommandError) {
    result.insert("ok", 0.0);
    result.insert("errmsg", error.message.as_str());
    result.insert("code", error.code.code());
    result.insert("codeName", error.code.code_name());
    let labels = error.reply_labels();
    if !labels.is_empty() {
        result.insert(
            "errorLabels",
            labels.into_iter().map(Value::from).collect::<Vec<_>>(),
        );
    }
    if let Some(detail) = &error.detail {
        result.extend_missing(detail);
    }
}

/// Returns the reply's `ok`, appending `ok: 1` when absent.
pub fn extract_or_append_ok(body: &mut Document) -> bool {
    match body.get("ok") {
        Some(ok) => ok.is_truthy(),
        None => {
            body.append("ok", 1.0);
            true
        }
    }
}

/// Whether a `help` field asks for command help.
#[must_use]
pub fn is_help_request(help: Option<&Value>) -> bool {
    help.is_some_and(Value::is_truthy)
}

/// # Errors
///
/// `InvalidOptions` if `request` carries document sequences.
pub fn uassert_no_document_sequences(command_name: &str, request: &OpMsgRequest) -> CommandResult<()> {
    if request.sequences.is_empty() {
        Ok(())
    } else {
        Err(CommandError::invalid_options(format!(
            "The {command_name} command does not support document sequences."
        )))
    }
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

/// Generic arguments that are never forwarded to another node.
const REQUEST_STRIP_ARGUMENTS: &[&str] = &[
    "$db",
    "$clusterTime",
    "$client",
    "$configServerState",
    "$audit",
    "lsid",
    "txnNumber",
];

/// Reply fields that describe this node and must not be relayed verbatim.
const REPLY_STRIP_FIELDS: &[&str] = &[
    "$clusterTime",
    "operationTime",
    "$configServerState",
    "$gleStats",
    "lastCommittedOpTime",
];

/// Copies generic arguments from `original` into `request` when `request`
/// does not already set them. Node-local arguments are never copied.
#[must_use]
pub fn append_passthrough_fields(original: &Document, request: &Document) -> Document {
    let mut out = request.clone();
    for (k, v) in original.iter() {
        if is_generic_argument(k) && !REQUEST_STRIP_ARGUMENTS.contains(&k) && !out.contains_key(k) {
            out.append(k, v.clone());
        }
    }
    out
}

/// Forces the write concern of `body` to `majority`, keeping its timeout and
/// journal settings, or falling back to `default` when absent.
///
/// # Errors
///
/// Propagates a malformed existing `writeConcern`.
pub fn append_majority_write_concern(
    body: &mut Document,
    default: &WriteConcernOptions,
) -> CommandResult<()> {
    let base = WriteConcernOptions::from_body(body)?.unwrap_or_else(|| default.clone());
    let majority = WriteConcernOptions {
        j: base.j,
        ..WriteConcernOptions::majority(base.wtimeout)
    };
    body.insert("writeConcern", majority.to_document()?);
    Ok(())
}

/// Prepares a request for forwarding: wraps `$readPreference` in
/// `$queryOptions` and drops node-local arguments.
#[must_use]
pub fn filter_command_request_for_passthrough(body: &Document) -> Document {
    let mut out = Document::new();
    for (k, v) in body.iter() {
        if k == "$readPreference" {
            let mut options = Document::new();
            options.append("$readPreference", v.clone());
            out.append("$queryOptions", options);
        } else if !REQUEST_STRIP_ARGUMENTS.contains(&k) {
            out.append(k, v.clone());
        }
    }
    out
}

/// Drops fields describing the remote node from a forwarded reply.
#[must_use]
pub fn filter_command_reply_for_passthrough(reply: &Document) -> Document {
    reply
        .iter()
        .filter(|(k, _)| !REPLY_STRIP_FIELDS.contains(k))
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Commands that may run inside a multi-document transaction.
const TRANSACTION_COMMANDS: &[&str] = &[
    "abortTransaction",
    "aggregate",
    "commitTransaction",
    "create",
    "createIndexes",
    "delete",
    "distinct",
    "find",
    "findAndModify",
    "findandmodify",
    "getMore",
    "insert",
    "killCursors",
    "prepareTransaction",
    "update",
];

/// # Errors
///
/// `OperationNotSupportedInTransaction` if `command_name` is not allowed in
/// a transaction or `ns` is a database or collection transactions may not
/// touch.
pub fn can_use_transactions(
    ns: &NamespaceString,
    command_name: &str,
    allow_transactions_on_config_database: bool,
) -> CommandResult<()> {
    let refuse = |msg: String| {
        Err(CommandError::new(
            ErrorCode::OperationNotSupportedInTransaction,
            msg,
        ))
    };
    if !TRANSACTION_COMMANDS.contains(&command_name) {
        return refuse(format!(
            "Cannot run '{command_name}' in a multi-document transaction."
        ));
    }
    if ns.db() == CONFIG_DB && !allow_transactions_on_config_database {
        return refuse("Cannot run command against the config database in a transaction.".into());
    }
    if ns.db() == LOCAL_DB {
        return refuse("Cannot run command against the local database in a transaction.".into());
    }
    if ns.is_system() {
        return refuse(format!(
            "Cannot run command against the '{ns}' collection in a transaction."
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use docket_core::{doc, DocumentSequence};

    use super::*;

    #[test]
    fn ns_from_command_uses_string_first_field() {
        assert_eq!(
            parse_ns_from_command("shop", &doc! { "find" => "orders" }).to_string(),
            "shop.orders"
        );
        assert_eq!(
            parse_ns_from_command("shop", &doc! { "ping" => 1 }).to_string(),
            "shop"
        );
        assert_eq!(
            parse_ns_from_command("shop", &doc! { "find" => "" }).to_string(),
            "shop"
        );
    }

    #[test]
    fn collection_required_rejects_non_strings() {
        let err = parse_ns_collection_required("shop", &doc! { "find" => 1 }).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNamespace);
        let err = parse_ns_collection_required("shop", &doc! { "find" => "" }).unwrap_err();
        assert_eq!(err.message, "Invalid namespace specified 'shop.'");
    }

    #[test]
    fn fully_qualified_needs_collection() {
        assert_eq!(
            parse_ns_fully_qualified(&doc! { "renameCollection" => "a.b" })
                .unwrap()
                .to_string(),
            "a.b"
        );
        assert_eq!(
            parse_ns_fully_qualified(&doc! { "renameCollection" => "a" })
                .unwrap_err()
                .code,
            ErrorCode::InvalidNamespace
        );
        assert_eq!(
            parse_ns_fully_qualified(&doc! { "renameCollection" => true })
                .unwrap_err()
                .code,
            ErrorCode::BadValue
        );
    }

    #[test]
    fn ns_or_uuid_accepts_binary_uuid() {
        let id = Uuid::new_v4();
        let parsed = parse_ns_or_uuid("shop", &doc! { "find" => id.as_bytes().to_vec() }).unwrap();
        assert_eq!(
            parsed,
            NamespaceOrUuid::Uuid {
                db: "shop".into(),
                uuid: id
            }
        );
        assert!(parse_ns_or_uuid("shop", &doc! { "find" => vec![1_u8, 2] }).is_err());
        assert!(matches!(
            parse_ns_or_uuid("shop", &doc! { "find" => "c" }),
            Ok(NamespaceOrUuid::Namespace(_))
        ));
    }

    #[test]
    fn simple_status_respects_existing_fields() {
        let mut result = doc! { "ok" => 1.0 };
        append_simple_command_status(&mut result, false, Some("boom"));
        assert_eq!(result, doc! { "ok" => 1.0, "errmsg" => "boom" });

        let mut result = Document::new();
        append_simple_command_status(&mut result, true, Some("ignored"));
        assert_eq!(result, doc! { "ok" => 1.0 });
    }

    #[test]
    fn error_reply_carries_code_and_labels() {
        let mut result = doc! { "partial" => 1 };
        let err = CommandError::new(ErrorCode::NotWritablePrimary, "not primary")
            .with_detail(doc! { "topologyVersion" => 3, "code" => 999 });
        assert!(!append_command_status_no_throw(&mut result, &Err(err)));
        assert_eq!(result.get("ok"), Some(&Value::Float(0.0)));
        assert_eq!(result.get_str("errmsg"), Some("not primary"));
        assert_eq!(result.get("code"), Some(&Value::Int(10107)));
        assert_eq!(result.get_str("codeName"), Some("NotWritablePrimary"));
        assert_eq!(
            result.get("errorLabels"),
            Some(&Value::Array(vec!["RetryableError".into()]))
        );
        assert_eq!(result.get("topologyVersion"), Some(&Value::Int(3)));
    }

    #[test]
    fn extract_or_append_ok_normalizes_missing() {
        let mut body = doc! { "n" => 1 };
        assert!(extract_or_append_ok(&mut body));
        assert_eq!(body.get("ok"), Some(&Value::Float(1.0)));

        let mut body = doc! { "ok" => 0 };
        assert!(!extract_or_append_ok(&mut body));
    }

    #[test]
    fn help_request_detection() {
        assert!(is_help_request(Some(&Value::Bool(true))));
        assert!(!is_help_request(Some(&Value::Int(0))));
        assert!(!is_help_request(None));
    }

    #[test]
    fn document_sequences_can_be_refused() {
        let plain = OpMsgRequest::new("db", doc! { "ping" => 1 });
        assert!(uassert_no_document_sequences("ping", &plain).is_ok());
        let with_seq = plain.with_sequence(DocumentSequence::new("documents", vec![]));
        let err = uassert_no_document_sequences("ping", &with_seq).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOptions);
    }

    #[test]
    fn passthrough_request_rewrites_read_preference() {
        let body = doc! {
            "find" => "c",
            "$readPreference" => doc! { "mode" => "secondary" },
            "$db" => "shop",
            "lsid" => doc! {},
            "maxTimeMS" => 5,
        };
        let out = filter_command_request_for_passthrough(&body);
        assert_eq!(
            out,
            doc! {
                "find" => "c",
                "$queryOptions" => doc! { "$readPreference" => doc! { "mode" => "secondary" } },
                "maxTimeMS" => 5,
            }
        );
    }

    #[test]
    fn passthrough_reply_drops_node_fields() {
        let reply = doc! { "n" => 1, "operationTime" => 5, "$clusterTime" => doc! {}, "ok" => 1.0 };
        assert_eq!(
            filter_command_reply_for_passthrough(&reply),
            doc! { "n" => 1, "ok" => 1.0 }
        );
    }

    #[test]
    fn passthrough_fields_fill_missing_generic_arguments() {
        let original = doc! { "count" => "c", "maxTimeMS" => 10, "comment" => "x", "$db" => "d", "query" => doc! {} };
        let request = doc! { "count" => "c", "comment" => "y" };
        assert_eq!(
            append_passthrough_fields(&original, &request),
            doc! { "count" => "c", "comment" => "y", "maxTimeMS" => 10 }
        );
    }

    #[test]
    fn majority_write_concern_keeps_timeout() {
        let mut body = doc! { "insert" => "c", "writeConcern" => doc! { "w" => 1, "wtimeout" => 250 } };
        append_majority_write_concern(&mut body, &WriteConcernOptions::default()).unwrap();
        assert_eq!(
            body.get_document("writeConcern"),
            Some(&doc! { "w" => "majority", "wtimeout" => 250 })
        );

        let mut body = doc! { "insert" => "c" };
        append_majority_write_concern(&mut body, &WriteConcernOptions::default()).unwrap();
        assert_eq!(body.get_document("writeConcern"), Some(&doc! { "w" => "majority" }));
    }

    #[test]
    fn transactions_reject_unlisted_commands_and_system_namespaces() {
        let ns = NamespaceString::new("shop", "orders");
        assert!(can_use_transactions(&ns, "find", false).is_ok());
        assert_eq!(
            can_use_transactions(&ns, "count", false).unwrap_err().code,
            ErrorCode::OperationNotSupportedInTransaction
        );
        let config = NamespaceString::new("config", "x");
        assert!(can_use_transactions(&config, "find", false).is_err());
        assert!(can_use_transactions(&config, "find", true).is_ok());
        assert!(can_use_transactions(&NamespaceString::new("local", "x"), "find", true).is_err());
        assert!(can_use_transactions(&NamespaceString::new("shop", "system.views"), "find", true).is_err());
    }
}
